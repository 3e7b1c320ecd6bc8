// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run queue with the claim/lease protocol.
//!
//! Runs move `queued → claimed → running → {completed, failed}` (or
//! `canceled` at any pre-terminal point). A claim hands ownership to
//! exactly one worker under a time-bounded lease; expired leases are
//! requeued by [`RunQueue::sweep_expired`] and every owner-side
//! transition revalidates the lease.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use swb_core::{CallbackStatus, NewRun, Run, RunStatus, ScheduleMode};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors from queue transitions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// The run does not exist.
    #[error("run not found: {0}")]
    NotFound(Uuid),
    /// The caller no longer owns the run's lease.
    #[error("lease lost for run {run_id} (worker {worker_id})")]
    LeaseLost {
        /// The run whose lease was lost.
        run_id: Uuid,
        /// The worker that attempted the transition.
        worker_id: String,
    },
    /// The run is not in a state that admits the transition.
    #[error("run {run_id} is {status}, cannot {operation}")]
    InvalidTransition {
        /// The run.
        run_id: Uuid,
        /// Its current status.
        status: RunStatus,
        /// The attempted operation.
        operation: &'static str,
    },
}

impl From<QueueError> for swb_error::Error {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::NotFound(run_id) => swb_error::Error::new(
                swb_error::ErrorKind::TaskNotFound,
                format!("Run not found: {run_id}"),
            ),
            QueueError::LeaseLost { run_id, worker_id } => swb_error::Error::lease_lost(format!(
                "Worker {worker_id} no longer holds the lease for run {run_id}"
            )),
            QueueError::InvalidTransition {
                run_id,
                status,
                operation,
            } => swb_error::Error::bad_request(format!(
                "Run {run_id} is {status}, cannot {operation}"
            )),
        }
    }
}

/// Queue statistics snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    /// Runs waiting to be claimed.
    pub queued: usize,
    /// Runs claimed under a live lease.
    pub claimed: usize,
    /// Runs executing.
    pub running: usize,
    /// Runs in a terminal state.
    pub terminal: usize,
}

/// In-memory run queue, the Backend's source of truth for runs.
#[derive(Default)]
pub struct RunQueue {
    runs: Mutex<HashMap<Uuid, Run>>,
}

impl RunQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Run>> {
        self.runs.lock().expect("run queue lock poisoned")
    }

    /// Enqueue a new run in `queued` state.
    pub fn enqueue(&self, new: NewRun) -> Run {
        let run = Run {
            run_id: Uuid::new_v4(),
            session_id: new.session_id,
            prompt: new.prompt,
            schedule_mode: new.schedule_mode,
            scheduled_at: new.scheduled_at,
            status: RunStatus::Queued,
            worker_id: None,
            lease_expires_at: None,
            progress: 0,
            started_at: None,
            finished_at: None,
            error_message: None,
            created_at: Utc::now(),
        };
        self.lock().insert(run.run_id, run.clone());
        debug!(run_id = %run.run_id, session_id = %run.session_id, mode = %run.schedule_mode, "run enqueued");
        run
    }

    /// Atomically claim the oldest eligible queued run.
    ///
    /// Eligible: status `queued`, schedule mode in `modes`,
    /// `scheduled_at` absent or past, and no other run of the same
    /// session currently claimed or running. FIFO over
    /// `(scheduled_at | created_at)`, ties by run id. Returns `None`
    /// when nothing qualifies.
    pub fn claim(
        &self,
        worker_id: &str,
        lease_seconds: i64,
        modes: &[ScheduleMode],
    ) -> Option<Run> {
        let now = Utc::now();
        let lease = Duration::seconds(lease_seconds.max(0));
        let mut runs = self.lock();

        let busy_sessions: Vec<Uuid> = runs
            .values()
            .filter(|r| r.status.is_active())
            .map(|r| r.session_id)
            .collect();

        let chosen = runs
            .values()
            .filter(|r| {
                r.status == RunStatus::Queued
                    && modes.contains(&r.schedule_mode)
                    && r.scheduled_at.is_none_or(|at| at <= now)
                    && !busy_sessions.contains(&r.session_id)
            })
            .min_by(|a, b| {
                a.eligible_at()
                    .cmp(&b.eligible_at())
                    .then_with(|| a.run_id.cmp(&b.run_id))
            })
            .map(|r| r.run_id)?;

        let run = runs.get_mut(&chosen)?;
        run.status = RunStatus::Claimed;
        run.worker_id = Some(worker_id.to_string());
        run.lease_expires_at = Some(now + lease);
        info!(run_id = %run.run_id, worker_id, "run claimed");
        Some(run.clone())
    }

    fn checked_owner<'a>(
        run: &'a mut Run,
        worker_id: &str,
        operation: &'static str,
    ) -> Result<&'a mut Run, QueueError> {
        if !run.status.is_active() {
            return Err(QueueError::InvalidTransition {
                run_id: run.run_id,
                status: run.status,
                operation,
            });
        }
        let owner_ok = run.worker_id.as_deref() == Some(worker_id);
        let lease_ok = run.lease_expires_at.is_some_and(|at| at > Utc::now());
        if !owner_ok || !lease_ok {
            return Err(QueueError::LeaseLost {
                run_id: run.run_id,
                worker_id: worker_id.to_string(),
            });
        }
        Ok(run)
    }

    /// Mark a claimed run running. Validates lease ownership.
    pub fn start(&self, run_id: Uuid, worker_id: &str) -> Result<Run, QueueError> {
        let mut runs = self.lock();
        let run = runs.get_mut(&run_id).ok_or(QueueError::NotFound(run_id))?;
        let run = Self::checked_owner(run, worker_id, "start")?;
        if run.status == RunStatus::Claimed {
            run.status = RunStatus::Running;
            if run.started_at.is_none() {
                run.started_at = Some(Utc::now());
            }
        }
        Ok(run.clone())
    }

    /// Mark an active run failed. Validates lease ownership.
    pub fn fail(
        &self,
        run_id: Uuid,
        worker_id: &str,
        error_message: Option<String>,
    ) -> Result<Run, QueueError> {
        let mut runs = self.lock();
        let run = runs.get_mut(&run_id).ok_or(QueueError::NotFound(run_id))?;
        let run = Self::checked_owner(run, worker_id, "fail")?;
        run.status = RunStatus::Failed;
        run.finished_at = Some(Utc::now());
        run.error_message = error_message;
        Ok(run.clone())
    }

    /// Mark an active run completed. Validates lease ownership.
    pub fn complete(&self, run_id: Uuid, worker_id: &str) -> Result<Run, QueueError> {
        let mut runs = self.lock();
        let run = runs.get_mut(&run_id).ok_or(QueueError::NotFound(run_id))?;
        let run = Self::checked_owner(run, worker_id, "complete")?;
        run.status = RunStatus::Completed;
        run.progress = 100;
        run.finished_at = Some(Utc::now());
        Ok(run.clone())
    }

    /// Cancel a run that has not reached a terminal state. No lease
    /// validation: cancels come from the user, not the worker.
    pub fn cancel(&self, run_id: Uuid) -> Result<Run, QueueError> {
        let mut runs = self.lock();
        let run = runs.get_mut(&run_id).ok_or(QueueError::NotFound(run_id))?;
        if run.status.is_terminal() {
            return Err(QueueError::InvalidTransition {
                run_id,
                status: run.status,
                operation: "cancel",
            });
        }
        run.status = RunStatus::Canceled;
        run.finished_at = Some(Utc::now());
        info!(run_id = %run_id, "run canceled");
        Ok(run.clone())
    }

    /// Cancel the active run of `session_id`, if one exists.
    pub fn cancel_active_for_session(&self, session_id: Uuid) -> Option<Run> {
        let run_id = self.active_for_session(session_id)?.run_id;
        self.cancel(run_id).ok()
    }

    /// Requeue every active run whose lease has expired. Progress is
    /// retained for observability; worker and lease are cleared.
    pub fn sweep_expired(&self) -> Vec<Run> {
        let now = Utc::now();
        let mut runs = self.lock();
        let mut requeued = Vec::new();
        for run in runs.values_mut() {
            if run.status.is_active() && run.lease_expires_at.is_some_and(|at| at < now) {
                warn!(
                    run_id = %run.run_id,
                    worker_id = run.worker_id.as_deref().unwrap_or(""),
                    "lease expired, requeuing run"
                );
                run.status = RunStatus::Queued;
                run.worker_id = None;
                run.lease_expires_at = None;
                requeued.push(run.clone());
            }
        }
        requeued
    }

    /// Fetch a run by id.
    pub fn get(&self, run_id: Uuid) -> Option<Run> {
        self.lock().get(&run_id).cloned()
    }

    /// The session's most recent run in `{claimed, running}`.
    pub fn active_for_session(&self, session_id: Uuid) -> Option<Run> {
        self.lock()
            .values()
            .filter(|r| r.session_id == session_id && r.status.is_active())
            .max_by_key(|r| r.created_at)
            .cloned()
    }

    /// The session's most recent run in any state.
    pub fn latest_for_session(&self, session_id: Uuid) -> Option<Run> {
        self.lock()
            .values()
            .filter(|r| r.session_id == session_id)
            .max_by_key(|r| r.created_at)
            .cloned()
    }

    /// Apply a callback's status/progress to the session's active run
    /// (spec'd run-transition rules: progress always, `claimed →
    /// running` on the first running callback, terminal status with
    /// forced 100% progress on completion).
    pub fn sync_from_callback(
        &self,
        session_id: Uuid,
        status: CallbackStatus,
        progress: u8,
    ) -> Option<Run> {
        let mut runs = self.lock();
        let run_id = runs
            .values()
            .filter(|r| r.session_id == session_id && r.status.is_active())
            .max_by_key(|r| r.created_at)
            .map(|r| r.run_id)?;
        let run = runs.get_mut(&run_id)?;

        run.progress = progress.min(100);
        match status {
            CallbackStatus::Running if run.status == RunStatus::Claimed => {
                run.status = RunStatus::Running;
                if run.started_at.is_none() {
                    run.started_at = Some(Utc::now());
                }
            }
            CallbackStatus::Completed => {
                run.status = RunStatus::Completed;
                run.progress = 100;
                run.finished_at = Some(Utc::now());
            }
            CallbackStatus::Failed => {
                run.status = RunStatus::Failed;
                run.finished_at = Some(Utc::now());
            }
            _ => {}
        }
        Some(run.clone())
    }

    /// Copy of every run, in no particular order.
    pub fn snapshot(&self) -> Vec<Run> {
        self.lock().values().cloned().collect()
    }

    /// Snapshot statistics.
    pub fn stats(&self) -> QueueStats {
        let runs = self.lock();
        let mut stats = QueueStats {
            queued: 0,
            claimed: 0,
            running: 0,
            terminal: 0,
        };
        for run in runs.values() {
            match run.status {
                RunStatus::Queued => stats.queued += 1,
                RunStatus::Claimed => stats.claimed += 1,
                RunStatus::Running => stats.running += 1,
                _ => stats.terminal += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(session_id: Uuid, count: usize) -> (RunQueue, Vec<Uuid>) {
        let queue = RunQueue::new();
        let ids = (0..count)
            .map(|i| {
                queue
                    .enqueue(NewRun {
                        session_id: if count > 1 { Uuid::new_v4() } else { session_id },
                        prompt: format!("task {i}"),
                        schedule_mode: ScheduleMode::Immediate,
                        scheduled_at: None,
                    })
                    .run_id
            })
            .collect();
        (queue, ids)
    }

    #[test]
    fn claim_is_fifo_and_exclusive() {
        let queue = RunQueue::new();
        let first = queue.enqueue(NewRun {
            session_id: Uuid::new_v4(),
            prompt: "first".into(),
            schedule_mode: ScheduleMode::Immediate,
            scheduled_at: None,
        });
        queue.enqueue(NewRun {
            session_id: Uuid::new_v4(),
            prompt: "second".into(),
            schedule_mode: ScheduleMode::Immediate,
            scheduled_at: None,
        });

        let claimed = queue
            .claim("w1", 30, &[ScheduleMode::Immediate])
            .expect("claim");
        assert_eq!(claimed.run_id, first.run_id);
        assert_eq!(claimed.status, RunStatus::Claimed);
        assert_eq!(claimed.worker_id.as_deref(), Some("w1"));
    }

    #[test]
    fn claim_respects_schedule_mode_and_time() {
        let queue = RunQueue::new();
        queue.enqueue(NewRun {
            session_id: Uuid::new_v4(),
            prompt: "later".into(),
            schedule_mode: ScheduleMode::Scheduled,
            scheduled_at: Some(Utc::now() + Duration::minutes(10)),
        });
        assert!(queue.claim("w1", 30, &[ScheduleMode::Scheduled]).is_none());
        assert!(queue.claim("w1", 30, &[ScheduleMode::Immediate]).is_none());

        queue.enqueue(NewRun {
            session_id: Uuid::new_v4(),
            prompt: "due".into(),
            schedule_mode: ScheduleMode::Scheduled,
            scheduled_at: Some(Utc::now() - Duration::seconds(1)),
        });
        let claimed = queue.claim("w1", 30, &[ScheduleMode::Scheduled]).unwrap();
        assert_eq!(claimed.prompt, "due");
    }

    #[test]
    fn one_active_run_per_session() {
        let session_id = Uuid::new_v4();
        let queue = RunQueue::new();
        for i in 0..2 {
            queue.enqueue(NewRun {
                session_id,
                prompt: format!("r{i}"),
                schedule_mode: ScheduleMode::Immediate,
                scheduled_at: None,
            });
        }
        assert!(queue.claim("w1", 30, &[ScheduleMode::Immediate]).is_some());
        assert!(
            queue.claim("w1", 30, &[ScheduleMode::Immediate]).is_none(),
            "second run of the same session must stay queued"
        );
    }

    #[test]
    fn lease_loss_blocks_owner_transitions() {
        let (queue, _) = queue_with(Uuid::new_v4(), 1);
        let run = queue.claim("w1", 30, &[ScheduleMode::Immediate]).unwrap();
        assert!(queue.start(run.run_id, "w1").is_ok());
        // A different worker never owns it.
        assert!(matches!(
            queue.fail(run.run_id, "w2", None),
            Err(QueueError::LeaseLost { .. })
        ));
    }

    #[test]
    fn zero_length_lease_expires_immediately() {
        let (queue, _) = queue_with(Uuid::new_v4(), 1);
        let run = queue.claim("w1", 0, &[ScheduleMode::Immediate]).unwrap();
        assert!(matches!(
            queue.start(run.run_id, "w1"),
            Err(QueueError::LeaseLost { .. })
        ));
        assert_eq!(queue.sweep_expired().len(), 1);
        assert_eq!(queue.get(run.run_id).unwrap().status, RunStatus::Queued);
    }

    #[test]
    fn sweep_requeues_expired_leases_once() {
        let (queue, _) = queue_with(Uuid::new_v4(), 1);
        let run = queue.claim("w1", 30, &[ScheduleMode::Immediate]).unwrap();
        {
            let mut runs = queue.lock();
            runs.get_mut(&run.run_id).unwrap().lease_expires_at =
                Some(Utc::now() - Duration::seconds(1));
        }
        let requeued = queue.sweep_expired();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].status, RunStatus::Queued);
        assert!(requeued[0].worker_id.is_none());
        assert!(queue.sweep_expired().is_empty(), "sweep is idempotent");

        // The prior owner lost the lease.
        assert!(matches!(
            queue.start(run.run_id, "w1"),
            Err(QueueError::InvalidTransition { .. })
        ));
        // A new worker can claim it again.
        assert!(queue.claim("w2", 30, &[ScheduleMode::Immediate]).is_some());
    }

    #[test]
    fn callback_sync_transitions() {
        let session_id = Uuid::new_v4();
        let queue = RunQueue::new();
        queue.enqueue(NewRun {
            session_id,
            prompt: "hi".into(),
            schedule_mode: ScheduleMode::Immediate,
            scheduled_at: None,
        });
        queue.claim("w1", 30, &[ScheduleMode::Immediate]).unwrap();

        let run = queue
            .sync_from_callback(session_id, CallbackStatus::Running, 40)
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.progress, 40);
        assert!(run.started_at.is_some());

        let run = queue
            .sync_from_callback(session_id, CallbackStatus::Completed, 90)
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.progress, 100, "completion forces progress to 100");
    }

    #[test]
    fn cancel_is_terminal() {
        let (queue, ids) = queue_with(Uuid::new_v4(), 1);
        let canceled = queue.cancel(ids[0]).unwrap();
        assert_eq!(canceled.status, RunStatus::Canceled);
        assert!(queue.cancel(ids[0]).is_err());
        assert!(queue.claim("w1", 30, &[ScheduleMode::Immediate]).is_none());
    }
}
