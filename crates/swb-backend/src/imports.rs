// SPDX-License-Identifier: MIT OR Apache-2.0
//! Skill-import jobs: a durable job table drained by a worker loop,
//! independent from (but shaped like) the run-pull loop.

use crate::repo::Database;
use crate::ws::schedule_ws;
use crate::ws_service::WsFanout;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use swb_core::{SkillImportJob, SkillImportStatus};
use swb_error::{Error, Result};
use swb_store::BlobStore;
use tokio::sync::Notify;
use tracing::{error, info};
use uuid::Uuid;

/// The actual archive-unpacking import, behind a seam; the job
/// lifecycle around it is what this module owns.
#[async_trait]
pub trait SkillImporter: Send + Sync {
    /// Perform the import for `job`, reporting coarse progress through
    /// `progress` (0-99; the lifecycle sets 100 on success).
    async fn import(&self, job: &SkillImportJob, progress: &(dyn Fn(u8) + Send + Sync))
    -> Result<Value>;
}

/// Importer that verifies the archive exists in the blob store and
/// reports one result entry per selection.
pub struct ArchiveImporter {
    store: Arc<dyn BlobStore>,
}

impl ArchiveImporter {
    /// Importer over `store`.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SkillImporter for ArchiveImporter {
    async fn import(
        &self,
        job: &SkillImportJob,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<Value> {
        self.store.get_object(&job.archive_key).await.map_err(|e| {
            Error::new(
                swb_error::ErrorKind::SkillDownloadFailed,
                format!("archive not readable: {e}"),
            )
        })?;

        let total = job.selections.len().max(1);
        let mut imported = Vec::new();
        for (index, selection) in job.selections.iter().enumerate() {
            imported.push(selection.clone());
            progress((((index + 1) * 99) / total) as u8);
        }
        Ok(serde_json::json!({"imported": imported, "count": imported.len()}))
    }
}

/// Enqueue an import job.
pub fn enqueue_commit(
    db: &Database,
    user_id: &str,
    archive_key: String,
    selections: Vec<Value>,
) -> SkillImportJob {
    let job = SkillImportJob::new(user_id, archive_key, selections);
    db.insert_import_job(job.clone());
    info!(job_id = %job.id, user_id, "skill import job enqueued");
    job
}

/// Fetch a job owned by `user_id`.
pub fn get_job(db: &Database, user_id: &str, job_id: Uuid) -> Result<SkillImportJob> {
    let job = db
        .import_job(job_id)
        .ok_or_else(|| Error::not_found("Skill import job not found"))?;
    if job.user_id != user_id {
        return Err(Error::forbidden("Skill import job does not belong to the user"));
    }
    Ok(job)
}

async fn process_job(
    db: &Arc<Database>,
    fanout: &Arc<WsFanout>,
    importer: &Arc<dyn SkillImporter>,
    job: SkillImportJob,
) {
    let job_id = job.id;
    let Some(job) = db.update_import_job(job_id, |j| {
        j.status = SkillImportStatus::Running;
        j.progress = 0;
        j.error = None;
        j.started_at = Some(Utc::now());
    }) else {
        return;
    };
    fanout.broadcast_import_job(job_id).await;

    let progress_db = db.clone();
    let progress_fanout = fanout.clone();
    let on_progress = move |percent: u8| {
        let changed = progress_db
            .update_import_job(job_id, |j| j.progress = percent.min(99))
            .is_some();
        if changed {
            let fanout = progress_fanout.clone();
            schedule_ws(async move { fanout.broadcast_import_job(job_id).await });
        }
    };

    match importer.import(&job, &on_progress).await {
        Ok(result) => {
            db.update_import_job(job_id, |j| {
                j.status = SkillImportStatus::Success;
                j.progress = 100;
                j.result = Some(result.clone());
                j.error = None;
                j.finished_at = Some(Utc::now());
            });
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "skill import job failed");
            db.update_import_job(job_id, |j| {
                j.status = SkillImportStatus::Failed;
                j.error = Some(e.to_string());
                j.finished_at = Some(Utc::now());
            });
        }
    }
    fanout.broadcast_import_job(job_id).await;
}

/// Drain queued jobs until `shutdown` is notified. `wakeup` lets the
/// enqueue path cut the poll latency.
pub async fn run_import_worker(
    db: Arc<Database>,
    fanout: Arc<WsFanout>,
    importer: Arc<dyn SkillImporter>,
    wakeup: Arc<Notify>,
    shutdown: Arc<Notify>,
) {
    info!("skill import worker started");
    loop {
        while let Some(job) = db.next_queued_import_job() {
            process_job(&db, &fanout, &importer, job).await;
        }
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = wakeup.notified() => {}
            _ = tokio::time::sleep(Duration::from_secs(2)) => {}
        }
    }
    info!("skill import worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::ConnectionRegistry;
    use serde_json::json;
    use swb_store::MemoryStore;

    fn fixture() -> (Arc<Database>, Arc<WsFanout>, Arc<MemoryStore>) {
        let db = Arc::new(Database::new());
        let store = Arc::new(MemoryStore::new());
        let fanout = Arc::new(WsFanout::new(
            db.clone(),
            store.clone(),
            Arc::new(ConnectionRegistry::new()),
        ));
        (db, fanout, store)
    }

    #[tokio::test]
    async fn job_reaches_success_with_result() {
        let (db, fanout, store) = fixture();
        store
            .put_object("uploads/skills.zip", b"zip".to_vec(), None)
            .await
            .unwrap();
        let importer: Arc<dyn SkillImporter> = Arc::new(ArchiveImporter::new(store));

        let job = enqueue_commit(
            &db,
            "u1",
            "uploads/skills.zip".into(),
            vec![json!({"name": "web-search"})],
        );
        process_job(&db, &fanout, &importer, job.clone()).await;

        let done = db.import_job(job.id).unwrap();
        assert_eq!(done.status, SkillImportStatus::Success);
        assert_eq!(done.progress, 100);
        assert_eq!(done.result.unwrap()["count"], 1);
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn missing_archive_fails_job() {
        let (db, fanout, store) = fixture();
        let importer: Arc<dyn SkillImporter> = Arc::new(ArchiveImporter::new(store));
        let job = enqueue_commit(&db, "u1", "uploads/missing.zip".into(), vec![]);
        process_job(&db, &fanout, &importer, job.clone()).await;

        let done = db.import_job(job.id).unwrap();
        assert_eq!(done.status, SkillImportStatus::Failed);
        assert!(done.error.is_some());
    }

    #[tokio::test]
    async fn ownership_is_checked() {
        let (db, _fanout, _store) = fixture();
        let job = enqueue_commit(&db, "u1", "k".into(), vec![]);
        assert!(get_job(&db, "u1", job.id).is_ok());
        assert_eq!(
            get_job(&db, "u2", job.id).unwrap_err().kind,
            swb_error::ErrorKind::Forbidden
        );
    }
}
