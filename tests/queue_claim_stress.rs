// SPDX-License-Identifier: MIT OR Apache-2.0
//! Claim-protocol properties under concurrency and lease faults.

use std::collections::HashSet;
use std::sync::Arc;
use swb_core::{NewRun, RunStatus, ScheduleMode};
use swb_queue::{QueueError, RunQueue};
use tokio::task::JoinSet;
use uuid::Uuid;

fn enqueue_immediate(queue: &RunQueue, count: usize) -> Vec<Uuid> {
    (0..count)
        .map(|i| {
            queue
                .enqueue(NewRun {
                    session_id: Uuid::new_v4(),
                    prompt: format!("task-{i}"),
                    schedule_mode: ScheduleMode::Immediate,
                    scheduled_at: None,
                })
                .run_id
        })
        .collect()
}

// ---------------------------------------------------------------------------
// P1: 100 concurrent claimers on 10 queued runs → exactly 10 succeed.
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn claim_uniqueness_under_contention() {
    let queue = Arc::new(RunQueue::new());
    let expected: HashSet<Uuid> = enqueue_immediate(&queue, 10).into_iter().collect();

    let barrier = Arc::new(tokio::sync::Barrier::new(100));
    let mut set = JoinSet::new();
    for i in 0..100 {
        let queue = Arc::clone(&queue);
        let barrier = Arc::clone(&barrier);
        set.spawn(async move {
            barrier.wait().await;
            queue.claim(&format!("worker-{i}"), 30, &[ScheduleMode::Immediate])
        });
    }

    let mut claimed = Vec::new();
    let mut nulls = 0usize;
    while let Some(result) = set.join_next().await {
        match result.unwrap() {
            Some(run) => claimed.push(run.run_id),
            None => nulls += 1,
        }
    }

    assert_eq!(claimed.len(), 10, "exactly the queued runs are claimable");
    assert_eq!(nulls, 90);
    let unique: HashSet<Uuid> = claimed.into_iter().collect();
    assert_eq!(unique, expected, "no run claimed twice");
}

// ---------------------------------------------------------------------------
// P2: an expired lease is requeued exactly once, worker cleared.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lease_recovery_requeues_once() {
    let queue = RunQueue::new();
    let ids = enqueue_immediate(&queue, 1);
    let run = queue.claim("w1", 1, &[ScheduleMode::Immediate]).unwrap();
    assert_eq!(run.run_id, ids[0]);
    queue.start(run.run_id, "w1").unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    let requeued = queue.sweep_expired();
    assert_eq!(requeued.len(), 1);
    assert_eq!(requeued[0].status, RunStatus::Queued);
    assert!(requeued[0].worker_id.is_none());
    assert!(requeued[0].lease_expires_at.is_none());
    assert!(queue.sweep_expired().is_empty(), "one requeue per expiry");
}

// ---------------------------------------------------------------------------
// Scenario 5: worker A loses its lease mid-flight; worker B finishes.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lease_loss_hands_run_to_next_worker() {
    let queue = RunQueue::new();
    enqueue_immediate(&queue, 1);

    let run = queue.claim("worker-a", 1, &[ScheduleMode::Immediate]).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    queue.sweep_expired();

    // Worker A comes back after the sweep.
    assert!(matches!(
        queue.start(run.run_id, "worker-a"),
        Err(QueueError::InvalidTransition { .. }) | Err(QueueError::LeaseLost { .. })
    ));

    // Worker B picks it up and runs it to completion.
    let reclaimed = queue.claim("worker-b", 30, &[ScheduleMode::Immediate]).unwrap();
    assert_eq!(reclaimed.run_id, run.run_id);
    queue.start(run.run_id, "worker-b").unwrap();
    let done = queue.complete(run.run_id, "worker-b").unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.progress, 100);
}

// ---------------------------------------------------------------------------
// Scheduled eligibility is a pure function of the clock.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scheduled_runs_become_eligible_by_time() {
    let queue = RunQueue::new();
    queue.enqueue(NewRun {
        session_id: Uuid::new_v4(),
        prompt: "due soon".into(),
        schedule_mode: ScheduleMode::Scheduled,
        scheduled_at: Some(chrono::Utc::now() + chrono::Duration::milliseconds(300)),
    });

    assert!(queue.claim("w1", 30, &[ScheduleMode::Scheduled]).is_none());
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    assert!(queue.claim("w1", 30, &[ScheduleMode::Scheduled]).is_some());
}
