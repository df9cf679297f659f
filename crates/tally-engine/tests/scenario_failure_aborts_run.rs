//! Fatal errors: no partial report, and every loader is joined before return.

use std::io::Write;
use std::time::Duration;

use tally_engine::{cancel_pair, ReconcileError, ReconcileJob, Reconciler};
use tally_source::{DateWindow, SourceError};
use uuid::Uuid;

fn write_rows(dir: &tempfile::TempDir, name: &str, rows: &[String]) -> String {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "trx_id,amount,type,transaction_time").unwrap();
    for r in rows {
        writeln!(f, "{r}").unwrap();
    }
    path.to_string_lossy().into_owned()
}

fn many(prefix: &str, n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("{prefix}{i},{},KREDIT,2024-01-10T00:00:00Z", i + 1))
        .collect()
}

fn january() -> DateWindow {
    DateWindow::parse("01-01-2024", "31-01-2024").unwrap()
}

/// Joined tasks can take a scheduler tick to release their slot.
async fn assert_no_tasks_left() {
    let metrics = tokio::runtime::Handle::current().metrics();
    for _ in 0..200 {
        if metrics.num_alive_tasks() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "{} task(s) still alive after the run returned",
        metrics.num_alive_tasks()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_malformed_statement_mid_stream_aborts_everything() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = write_rows(&dir, "ledger.csv", &many("L", 500));
    let good_a = write_rows(&dir, "good_a.csv", &many("A", 5_000));
    let good_b = write_rows(&dir, "good_b.csv", &many("B", 5_000));
    let mut bad_rows = many("X", 10);
    bad_rows.push("BROKEN,not-a-number,KREDIT,2024-01-10T00:00:00Z".to_string());
    bad_rows.extend(many("Y", 10));
    let bad = write_rows(&dir, "bad.csv", &bad_rows);

    let reconciler = Reconciler::new();
    let run = reconciler.run(
        Uuid::new_v4(),
        ReconcileJob {
            ledger,
            statements: vec![good_a, bad.clone(), good_b],
            window: january(),
        },
    );
    let result = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("run must return once peers are cancelled");

    match result {
        Err(ReconcileError::Statement(SourceError::MalformedRecord { path, field, row, .. })) => {
            assert_eq!(path, bad);
            assert_eq!(field, "amount");
            assert_eq!(row, 12);
        }
        other => panic!("expected statement failure, got {other:?}"),
    }
    assert_no_tasks_left().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_failure_unblocks_peers_waiting_to_publish() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = write_rows(&dir, "ledger.csv", &many("L", 10));
    let peers: Vec<String> = (0..4)
        .map(|i| write_rows(&dir, &format!("peer{i}.csv"), &many("P", 20_000)))
        .collect();
    let mut bad_rows = many("X", 50);
    bad_rows.push("BROKEN,100,KREDIT,not-a-date".to_string());
    let bad = write_rows(&dir, "bad.csv", &bad_rows);

    let mut statements = peers;
    statements.insert(2, bad.clone());

    let reconciler = Reconciler::new();
    let run = reconciler.run(
        Uuid::new_v4(),
        ReconcileJob {
            ledger,
            statements,
            window: january(),
        },
    );
    let err = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("blocked peers must observe cancellation")
        .unwrap_err();

    match err {
        ReconcileError::Statement(SourceError::MalformedRecord { path, field, .. }) => {
            assert_eq!(path, bad);
            assert_eq!(field, "transaction_time");
        }
        other => panic!("expected statement failure, got {other:?}"),
    }
    assert_no_tasks_left().await;
}

#[tokio::test]
async fn scenario_unreadable_statement_source_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = write_rows(&dir, "ledger.csv", &many("L", 3));
    let good = write_rows(&dir, "good.csv", &many("A", 3));
    let missing = dir.path().join("missing.csv").to_string_lossy().into_owned();

    let err = Reconciler::new()
        .run(
            Uuid::new_v4(),
            ReconcileJob {
                ledger,
                statements: vec![good, missing],
                window: january(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::Statement(SourceError::Unavailable { .. })
    ));
    assert_eq!(err.kind(), "source_unavailable");
    assert_no_tasks_left().await;
}

#[tokio::test]
async fn scenario_ledger_failures_are_classified() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_rows(&dir, "good.csv", &many("A", 3));

    let err = Reconciler::new()
        .run(
            Uuid::new_v4(),
            ReconcileJob {
                ledger: dir.path().join("nope.csv").to_string_lossy().into_owned(),
                statements: vec![good.clone()],
                window: january(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::LedgerUnavailable(_)));

    let broken = write_rows(
        &dir,
        "ledger_bad.csv",
        &["A,100,KREDIT,not-a-date".to_string()],
    );
    let err = Reconciler::new()
        .run(
            Uuid::new_v4(),
            ReconcileJob {
                ledger: broken,
                statements: vec![good],
                window: january(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::MalformedLedger(_)));
    assert_eq!(err.kind(), "malformed_ledger");
}

#[tokio::test]
async fn scenario_duplicate_source_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = write_rows(&dir, "ledger.csv", &many("L", 1));
    let bank = write_rows(&dir, "bank.csv", &many("A", 1));

    let err = Reconciler::new()
        .run(
            Uuid::new_v4(),
            ReconcileJob {
                ledger,
                statements: vec![bank.clone(), bank.clone()],
                window: january(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, ReconcileError::DuplicateSource(bank));
}

#[tokio::test]
async fn scenario_stop_signal_cancels_run() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = write_rows(&dir, "ledger.csv", &many("L", 10));
    let bank = write_rows(&dir, "bank.csv", &many("A", 10));

    let (stop, signal) = cancel_pair();
    stop.cancel();

    let err = Reconciler::new()
        .run_until(
            Uuid::new_v4(),
            ReconcileJob {
                ledger,
                statements: vec![bank],
                window: january(),
            },
            signal,
        )
        .await
        .unwrap_err();
    assert_eq!(err, ReconcileError::Cancelled);
    assert_no_tasks_left().await;
}

#[tokio::test]
async fn scenario_elapsed_deadline_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = write_rows(&dir, "ledger.csv", &many("L", 10));
    let bank = write_rows(&dir, "bank.csv", &many("A", 10));

    let err = Reconciler::new()
        .with_timeout(Some(Duration::ZERO))
        .run(
            Uuid::new_v4(),
            ReconcileJob {
                ledger,
                statements: vec![bank],
                window: january(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, ReconcileError::TimedOut(Duration::ZERO));
    assert_eq!(err.kind(), "timed_out");
}
