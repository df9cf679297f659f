use std::io::Write;

use assert_cmd::prelude::*;
use predicates::prelude::*;

fn write_csv(dir: &tempfile::TempDir, name: &str, rows: &[&str]) -> String {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "trx_id,amount,type,transaction_time").unwrap();
    for r in rows {
        writeln!(f, "{r}").unwrap();
    }
    path.to_string_lossy().into_owned()
}

/// `tally reconcile` prints the report JSON on stdout.
#[test]
fn cli_reconcile_prints_report() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ledger = write_csv(
        &dir,
        "ledger.csv",
        &[
            "A,100,KREDIT,2024-01-05T10:00:00Z",
            "B,250,DEBIT,2024-01-06T10:00:00Z",
        ],
    );
    let bank = write_csv(&dir, "bank.csv", &["X,-250,DEBIT,2024-01-06T11:00:00Z"]);

    let mut cmd = std::process::Command::cargo_bin("tally")?;
    cmd.args([
        "reconcile",
        "--ledger",
        &ledger,
        "--statement",
        &bank,
        "--start",
        "01-01-2024",
        "--end",
        "01-02-2024",
    ]);

    let out = cmd.assert().success().get_output().stdout.clone();
    let json: serde_json::Value = serde_json::from_slice(&out)?;
    assert_eq!(json["total_transactions_proceed"], 2);
    assert_eq!(json["total_matched_transactions"], 1);
    let missing = json["total_unmatched_transactions"]["missing_transactions"]
        .as_array()
        .unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0]["trx_id"], "A");
    Ok(())
}

#[test]
fn cli_reconcile_rejects_bad_window() -> anyhow::Result<()> {
    let mut cmd = std::process::Command::cargo_bin("tally")?;
    cmd.args([
        "reconcile",
        "--ledger",
        "ledger.csv",
        "--start",
        "2024-01-01",
        "--end",
        "01-02-2024",
    ]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("start_date"));
    Ok(())
}

#[test]
fn cli_reconcile_fails_on_missing_ledger() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("nope.csv");

    let mut cmd = std::process::Command::cargo_bin("tally")?;
    cmd.args([
        "reconcile",
        "--ledger",
        &missing.to_string_lossy(),
        "--start",
        "01-01-2024",
        "--end",
        "01-02-2024",
    ]);

    cmd.assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("nope.csv"));
    Ok(())
}

#[test]
fn cli_reconcile_honours_max_sources_from_config() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = dir.path().join("tally.yaml");
    std::fs::write(&cfg, "reconcile:\n  max_sources: 1\n")?;

    let mut cmd = std::process::Command::cargo_bin("tally")?;
    cmd.args([
        "reconcile",
        "--ledger",
        "ledger.csv",
        "--statement",
        "a.csv",
        "--statement",
        "b.csv",
        "--start",
        "01-01-2024",
        "--end",
        "01-02-2024",
        "--config",
        &cfg.to_string_lossy(),
    ]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("at most 1 allowed"));
    Ok(())
}
