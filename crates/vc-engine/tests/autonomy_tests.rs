//! Autonomy loop: tri-state accounting, the consecutive-error threshold,
//! and stop-reason/iteration-count pinning.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{agent_output, executor, issue, MemoryTracker, ScriptedRun, ScriptedSpawner};
use vc_engine::{continue_until_blocked, AutonomyOptions, IssueStatus};

fn options(max_iterations: u32, error_threshold: u32) -> AutonomyOptions {
    AutonomyOptions {
        max_iterations,
        timeout_minutes: 120,
        error_threshold,
    }
}

#[tokio::test]
async fn no_ready_work_stops_immediately() {
    let tracker = Arc::new(MemoryTracker::new());
    let exec = executor(tracker.clone(), Arc::new(ScriptedSpawner::always(vec![])));

    let report = continue_until_blocked(
        &CancellationToken::new(),
        &exec,
        tracker.as_ref(),
        options(10, 3),
    )
    .await
    .unwrap();

    assert_eq!(report.stop_reason, "no more ready work");
    // The empty scan is not counted as an iteration.
    assert_eq!(report.iterations, 0);
    assert!(report.completed.is_empty());
    assert!(report.partial.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn completes_ready_issues_in_priority_order() {
    let tracker = Arc::new(MemoryTracker::new());
    tracker
        .insert(issue("vc-low", "Low priority", IssueStatus::Open, 3))
        .await;
    tracker
        .insert(issue("vc-high", "High priority", IssueStatus::Open, 0))
        .await;
    let exec = executor(tracker.clone(), Arc::new(ScriptedSpawner::always(vec!["done"])));

    let report = continue_until_blocked(
        &CancellationToken::new(),
        &exec,
        tracker.as_ref(),
        options(10, 3),
    )
    .await
    .unwrap();

    assert_eq!(report.stop_reason, "no more ready work");
    assert_eq!(report.iterations, 2);
    assert_eq!(report.completed, vec!["vc-high", "vc-low"]);
    assert_eq!(tracker.issue("vc-high").await.status, IssueStatus::Closed);
}

#[tokio::test]
async fn three_consecutive_errors_trip_the_threshold() {
    let tracker = Arc::new(MemoryTracker::new());
    tracker
        .insert(issue("vc-1", "Doomed", IssueStatus::Open, 2))
        .await;
    let spawner = Arc::new(ScriptedSpawner::new(vec![
        ScriptedRun::SpawnFailure("boom 1"),
        ScriptedRun::SpawnFailure("boom 2"),
        ScriptedRun::SpawnFailure("boom 3"),
    ]));
    let exec = executor(tracker.clone(), spawner);

    let report = continue_until_blocked(
        &CancellationToken::new(),
        &exec,
        tracker.as_ref(),
        options(10, 3),
    )
    .await
    .unwrap();

    assert_eq!(
        report.stop_reason,
        "error threshold exceeded (3 consecutive errors)"
    );
    // The tripping attempt is included in the count.
    assert_eq!(report.iterations, 3);
    assert_eq!(report.failed.len(), 3);
    assert!(report.completed.is_empty());
    assert!(report.partial.is_empty());
}

#[tokio::test]
async fn partial_success_resets_the_error_counter() {
    let tracker = Arc::new(MemoryTracker::new());
    tracker
        .insert(issue("vc-1", "Flaky", IssueStatus::Open, 2))
        .await;
    // error, error, partial, error, error, error: the counter runs
    // 1, 2, 0, 1, 2, 3 and trips on the sixth attempt.
    let spawner = Arc::new(ScriptedSpawner::new(vec![
        ScriptedRun::SpawnFailure("boom 1"),
        ScriptedRun::SpawnFailure("boom 2"),
        ScriptedRun::Finish(agent_output(vec!["STATUS: partial"])),
        ScriptedRun::SpawnFailure("boom 3"),
        ScriptedRun::SpawnFailure("boom 4"),
        ScriptedRun::SpawnFailure("boom 5"),
    ]));
    let exec = executor(tracker.clone(), spawner);

    let report = continue_until_blocked(
        &CancellationToken::new(),
        &exec,
        tracker.as_ref(),
        options(10, 3),
    )
    .await
    .unwrap();

    assert_eq!(
        report.stop_reason,
        "error threshold exceeded (3 consecutive errors)"
    );
    assert_eq!(report.iterations, 6);
    assert_eq!(report.failed.len(), 5);
    assert_eq!(report.partial.len(), 1);
}

#[tokio::test]
async fn gate_failures_count_toward_the_threshold() {
    let tracker = Arc::new(MemoryTracker::new());
    tracker
        .insert(issue("vc-1", "Gated", IssueStatus::Open, 2))
        .await;
    let spawner = Arc::new(ScriptedSpawner::new(vec![
        ScriptedRun::Finish(agent_output(vec!["GATES: fail"])),
        ScriptedRun::Finish(agent_output(vec!["GATES: fail"])),
    ]));
    let exec = executor(tracker.clone(), spawner);

    let report = continue_until_blocked(
        &CancellationToken::new(),
        &exec,
        tracker.as_ref(),
        options(10, 2),
    )
    .await
    .unwrap();

    assert_eq!(
        report.stop_reason,
        "error threshold exceeded (2 consecutive errors)"
    );
    assert_eq!(report.failed.len(), 2);
}

#[tokio::test]
async fn max_iterations_bounds_an_endless_backlog() {
    let tracker = Arc::new(MemoryTracker::new());
    tracker
        .insert(issue("vc-1", "Sisyphean", IssueStatus::Open, 2))
        .await;
    // Every run reports partial, so the issue reopens and stays ready.
    let spawner = Arc::new(ScriptedSpawner::new(
        (0..5)
            .map(|_| ScriptedRun::Finish(agent_output(vec!["STATUS: partial"])))
            .collect(),
    ));
    let exec = executor(tracker.clone(), spawner);

    let report = continue_until_blocked(
        &CancellationToken::new(),
        &exec,
        tracker.as_ref(),
        options(3, 5),
    )
    .await
    .unwrap();

    assert_eq!(report.stop_reason, "max iterations reached");
    assert_eq!(report.iterations, 3);
    assert_eq!(report.partial.len(), 3);
}

#[tokio::test]
async fn cancellation_stops_with_timeout_reason() {
    let tracker = Arc::new(MemoryTracker::new());
    tracker
        .insert(issue("vc-1", "Never reached", IssueStatus::Open, 2))
        .await;
    let exec = executor(tracker.clone(), Arc::new(ScriptedSpawner::always(vec![])));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = continue_until_blocked(&cancel, &exec, tracker.as_ref(), options(10, 3))
        .await
        .unwrap();

    assert_eq!(report.stop_reason, "timeout or interruption");
    assert_eq!(report.iterations, 0);
}

#[tokio::test]
async fn ready_work_scan_failure_propagates() {
    let tracker = Arc::new(MemoryTracker::new());
    tracker.fail_ready.store(true, Ordering::SeqCst);
    let exec = executor(tracker.clone(), Arc::new(ScriptedSpawner::always(vec![])));

    let err = continue_until_blocked(
        &CancellationToken::new(),
        &exec,
        tracker.as_ref(),
        options(10, 3),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("ready work"));
}
