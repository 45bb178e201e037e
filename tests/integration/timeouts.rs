//! Backend timeouts: kill on expiry, keep partial output, report the kind.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use zoneops::backend::{BatchExecutor, FailureKind, ScriptExecutor, TaskRunner};
use zoneops::model::{EventStatus, Task, ZoneKind};
use zoneops::stats::StatsAggregator;
use zoneops::stream;
use zoneops::Error;

/// Given a one-second timeout
/// When a batch command prints and then sleeps five seconds
/// Then the result is a timeout failure that keeps the printed output
#[tokio::test]
async fn test_batch_timeout_keeps_partial_output() {
    let stats = Arc::new(StatsAggregator::new());
    let (tx, rx) = stream::channel();
    let exec = BatchExecutor::new(Duration::from_secs(1))
        .with_events(tx, false)
        .with_stats(Arc::clone(&stats));

    let started = Instant::now();
    let result = exec
        .run("echo partial; echo oops >&2; sleep 5; echo never", None)
        .await;
    drop(exec);

    assert!(started.elapsed() < Duration::from_secs(4), "process must be killed");
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert!(result.error.as_deref().unwrap().contains("timed out"));
    assert!(result.stdout.contains("partial"));
    assert!(!result.stdout.contains("never"));
    assert!(result.stderr.contains("oops"));

    let snap = stats.snapshot();
    assert_eq!(snap.command_stats.executions, 1);
    assert_eq!(snap.command_stats.failures, 1);

    // Partial stdout is surfaced on timeout even without display mode.
    let events = rx.collect_events().await;
    assert!(events.iter().any(|e| e.message == "partial"));
    assert_eq!(events.last().unwrap().status, EventStatus::Error);
}

#[tokio::test]
async fn test_streaming_timeout_is_task_error() {
    let mut script = tempfile::NamedTempFile::new().unwrap();
    writeln!(script, "echo started\nsleep 5\necho late").unwrap();
    let mut scripts = HashMap::new();
    scripts.insert("default".to_string(), script.path().to_path_buf());
    let exec = ScriptExecutor::new(scripts, Some(Duration::from_secs(1)));

    let task = Task::zone(
        "c1",
        ZoneKind::Game,
        9,
        "status",
        vec!["c1".into(), "10.0.0.1".into(), "/data/sh_9".into(), "status".into()],
        "check".into(),
    );
    let stats = StatsAggregator::new();
    let (tx, rx) = stream::channel();

    let started = Instant::now();
    exec.run_task(&task, &tx, &stats).await;
    drop(tx);
    assert!(started.elapsed() < Duration::from_secs(4));

    let events = rx.collect_events().await;
    assert_eq!(events[0].status, EventStatus::Start);
    assert!(events.iter().any(|e| e.message == "started"));
    assert!(!events.iter().any(|e| e.message == "late"));
    let last = events.last().unwrap();
    assert_eq!(last.status, EventStatus::Error);
    assert!(last.message.contains("timed out"));
    assert_eq!(stats.snapshot().per_task["c1_Game_9"].failures, 1);
}

#[tokio::test]
async fn test_run_streaming_reports_timeout_error() {
    let exec = ScriptExecutor::new(HashMap::new(), Some(Duration::from_millis(300)));
    let mut lines = Vec::new();
    let err = exec
        .run_streaming("echo one; sleep 3", |line| lines.push(line))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(300)));
    assert_eq!(lines, vec!["one"]);
}
