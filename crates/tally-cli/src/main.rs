use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tally_config::LoadedConfig;
use tally_engine::{ReconcileJob, Reconciler};
use tally_source::DateWindow;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Ledger vs bank statement reconciliation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile one ledger against any number of bank statements
    Reconcile {
        /// Ledger CSV path
        #[arg(long)]
        ledger: String,

        /// Bank statement CSV path (repeatable)
        #[arg(long = "statement")]
        statements: Vec<String>,

        /// Window start, DD-MM-YYYY (inclusive)
        #[arg(long)]
        start: String,

        /// Window end, DD-MM-YYYY (exclusive)
        #[arg(long)]
        end: String,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    // stdout carries the report; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Reconcile {
            ledger,
            statements,
            start,
            end,
            config_paths,
        } => {
            let loaded = load_config(&config_paths)?;
            let window = DateWindow::parse(&start, &end)?;

            if statements.len() > loaded.config.reconcile.max_sources {
                anyhow::bail!(
                    "{} statement sources requested; at most {} allowed",
                    statements.len(),
                    loaded.config.reconcile.max_sources
                );
            }

            let run_id = Uuid::new_v4();
            info!(run_id = %run_id, config_hash = %loaded.config_hash, "reconcile/start");

            let job = ReconcileJob {
                ledger,
                statements,
                window,
            };
            let report = Reconciler::new()
                .with_timeout(loaded.config.reconcile.timeout())
                .run(run_id, job)
                .await
                .with_context(|| format!("reconcile run {run_id} failed"))?;

            let out = serde_json::to_string_pretty(&report.to_response())?;
            println!("{out}");
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = tally_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }
    }

    Ok(())
}

fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    if paths.is_empty() {
        return LoadedConfig::defaults();
    }
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    tally_config::load_layered_yaml(&path_refs)
}
