// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run records and the claim/lease wire types.

use crate::config::TaskConfig;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// When a run becomes eligible for claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Claimed as soon as a worker has capacity.
    Immediate,
    /// Eligible only once `scheduled_at` has passed.
    Scheduled,
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("immediate"),
            Self::Scheduled => f.write_str("scheduled"),
        }
    }
}

/// Lifecycle state of a [`Run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting in the queue.
    Queued,
    /// Claimed by a worker under a live lease.
    Claimed,
    /// Dispatched and executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Canceled by an explicit request.
    Canceled,
}

impl RunStatus {
    /// Whether this state admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Whether a worker currently owns this run.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Claimed | Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// One execution attempt bound to a session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Run {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Prompt handed to the agent.
    pub prompt: String,
    /// Scheduling class of this run.
    pub schedule_mode: ScheduleMode,
    /// Earliest eligible claim time for scheduled runs.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub status: RunStatus,
    /// Worker holding the lease, if any.
    pub worker_id: Option<String>,
    /// Lease expiry; a run past this instant may be requeued.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Last reported progress, 0-100.
    pub progress: u8,
    /// When the executor first reported running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure detail for failed runs.
    pub error_message: Option<String>,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// The instant used for FIFO ordering: `scheduled_at` when present,
    /// otherwise `created_at`.
    #[must_use]
    pub fn eligible_at(&self) -> DateTime<Utc> {
        self.scheduled_at.unwrap_or(self.created_at)
    }
}

/// Parameters for enqueuing a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NewRun {
    /// Owning session.
    pub session_id: Uuid,
    /// Prompt handed to the agent.
    pub prompt: String,
    /// Scheduling class.
    pub schedule_mode: ScheduleMode,
    /// Earliest eligible claim time for scheduled runs.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// A claimed run joined with the session data a worker needs to dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClaimedRun {
    /// The claimed run.
    pub run: Run,
    /// Owner of the session.
    pub user_id: String,
    /// Prompt handed to the agent.
    pub prompt: String,
    /// Config snapshot captured at session creation.
    pub config_snapshot: TaskConfig,
    /// Resumable SDK session token, when one has been assigned.
    pub sdk_session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_mode_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ScheduleMode::Immediate).unwrap(),
            "\"immediate\""
        );
        assert_eq!(
            serde_json::to_string(&ScheduleMode::Scheduled).unwrap(),
            "\"scheduled\""
        );
    }

    #[test]
    fn terminal_and_active_partitions() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(!RunStatus::Claimed.is_terminal());
        assert!(RunStatus::Claimed.is_active());
        assert!(RunStatus::Running.is_active());
        assert!(!RunStatus::Queued.is_active());
    }

    #[test]
    fn eligible_at_prefers_scheduled_time() {
        let created = Utc::now();
        let scheduled = created + chrono::Duration::minutes(5);
        let run = Run {
            run_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            prompt: "hi".into(),
            schedule_mode: ScheduleMode::Scheduled,
            scheduled_at: Some(scheduled),
            status: RunStatus::Queued,
            worker_id: None,
            lease_expires_at: None,
            progress: 0,
            started_at: None,
            finished_at: None,
            error_message: None,
            created_at: created,
        };
        assert_eq!(run.eligible_at(), scheduled);
    }
}
