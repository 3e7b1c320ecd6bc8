// SPDX-License-Identifier: MIT OR Apache-2.0
//! Background skill-import jobs.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// State of a skill-import job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkillImportStatus {
    /// Waiting for a worker.
    Queued,
    /// Being processed.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failed,
}

impl SkillImportStatus {
    /// Whether the job is finished.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// A durable import job: unpack an uploaded archive into per-user skill
/// objects. Drained by a backend worker loop; progress is broadcast on
/// the owner's user channel.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SkillImportJob {
    /// Unique job identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Blob key of the uploaded archive.
    pub archive_key: String,
    /// Which entries of the archive to import.
    pub selections: Vec<Value>,
    /// Current state.
    pub status: SkillImportStatus,
    /// Progress, 0-100.
    pub progress: u8,
    /// Import result, on success.
    pub result: Option<Value>,
    /// Failure detail, on failure.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// When processing began.
    pub started_at: Option<DateTime<Utc>>,
    /// When processing finished.
    pub finished_at: Option<DateTime<Utc>>,
}

impl SkillImportJob {
    /// New queued job.
    #[must_use]
    pub fn new(user_id: impl Into<String>, archive_key: impl Into<String>, selections: Vec<Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            archive_key: archive_key.into(),
            selections,
            status: SkillImportStatus::Queued,
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}
