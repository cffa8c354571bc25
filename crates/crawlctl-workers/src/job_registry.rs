//! Async job bookkeeping (§4.10): create/run/complete/fail plus a stale-job
//! sweeper, all persisted through the `KVStore`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crawlctl_persistence::KVStore;
use crawlctl_types::{CoreError, CoreResult, Job, JobKind, JobStatus, WebhookConfig};
use tokio::sync::Mutex;

const JOB_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_STALE_DEADLINE: Duration = Duration::from_secs(60 * 60);

fn job_key(id: &str) -> String {
    format!("job:{id}")
}

pub struct JobRegistry {
    kvstore: Arc<dyn KVStore>,
    known_ids: Mutex<HashSet<String>>,
    stale_deadline: Duration,
}

impl JobRegistry {
    pub fn new(kvstore: Arc<dyn KVStore>) -> Self {
        Self::with_stale_deadline(kvstore, DEFAULT_STALE_DEADLINE)
    }

    pub fn with_stale_deadline(kvstore: Arc<dyn KVStore>, stale_deadline: Duration) -> Self {
        Self {
            kvstore,
            known_ids: Mutex::new(HashSet::new()),
            stale_deadline,
        }
    }

    pub async fn create_job(
        &self,
        kind: JobKind,
        urls: Vec<String>,
        webhook_config: Option<WebhookConfig>,
    ) -> CoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            kind,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
            urls,
            result: None,
            error: None,
            webhook_config,
        };
        self.save(&job).await?;
        self.known_ids.lock().await.insert(id.clone());
        Ok(id)
    }

    pub async fn mark_running(&self, id: &str) {
        self.transition(id, JobStatus::Running, |job| {
            job.status = JobStatus::Running;
        })
        .await;
    }

    pub async fn mark_completed(&self, id: &str, result: serde_json::Value) {
        self.transition(id, JobStatus::Completed, |job| {
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.finished_at = Some(Utc::now());
        })
        .await;
    }

    pub async fn mark_failed(&self, id: &str, error: String) {
        self.transition(id, JobStatus::Failed, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error);
            job.finished_at = Some(Utc::now());
        })
        .await;
    }

    async fn transition(&self, id: &str, target: JobStatus, apply: impl FnOnce(&mut Job)) {
        let Some(mut job) = self.get(id).await else {
            tracing::warn!(job_id = id, ?target, "transition on unknown job, ignoring");
            return;
        };
        if job.status.is_terminal() {
            tracing::warn!(
                job_id = id,
                current = ?job.status,
                attempted = ?target,
                "ignoring transition on already-terminal job"
            );
            return;
        }
        apply(&mut job);
        if let Err(err) = self.save(&job).await {
            tracing::warn!(job_id = id, error = %err, "failed to persist job transition");
        }
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        let raw = self.kvstore.get(&job_key(id)).await?;
        match serde_json::from_str(&raw) {
            Ok(job) => Some(job),
            Err(err) => {
                tracing::warn!(job_id = id, error = %err, "corrupt job record, treating as absent");
                None
            }
        }
    }

    async fn save(&self, job: &Job) -> CoreResult<()> {
        let payload = serde_json::to_string(job).map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
        self.kvstore.set(&job_key(&job.id), &payload, Some(JOB_TTL)).await;
        Ok(())
    }

    /// Scans in-process-known job ids and fails any non-terminal job whose
    /// `created_at` is older than `stale_deadline`.
    pub async fn sweep_stale(&self) {
        let now = Utc::now();
        let ids: Vec<String> = self.known_ids.lock().await.iter().cloned().collect();
        for id in ids {
            let Some(job) = self.get(&id).await else {
                continue;
            };
            if job.status.is_terminal() {
                self.known_ids.lock().await.remove(&id);
                continue;
            }
            let age = now.signed_duration_since(job.created_at);
            if age.to_std().unwrap_or_default() > self.stale_deadline {
                self.mark_failed(&id, "timeout".to_string()).await;
            }
        }
    }

    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_stale().await,
                _ = shutdown.changed() => {
                    tracing::info!("job sweeper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlctl_persistence::InMemoryKVStore;

    fn registry() -> JobRegistry {
        JobRegistry::new(Arc::new(InMemoryKVStore::default()))
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = registry();
        let id = registry
            .create_job(JobKind::Crawl, vec!["https://x".to_string()], None)
            .await
            .unwrap();
        assert!(id.len() >= 8);
        let job = registry.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn state_machine_enforced_strictly() {
        let registry = registry();
        let id = registry.create_job(JobKind::Crawl, vec![], None).await.unwrap();

        registry.mark_running(&id).await;
        assert_eq!(registry.get(&id).await.unwrap().status, JobStatus::Running);

        registry.mark_completed(&id, serde_json::json!({"ok": true})).await;
        assert_eq!(registry.get(&id).await.unwrap().status, JobStatus::Completed);

        // Double-complete is a no-op, not an overwrite to Failed.
        registry.mark_failed(&id, "late error".to_string()).await;
        let job = registry.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn sweeper_fails_stale_pending_jobs() {
        let registry = registry();
        let id = registry.create_job(JobKind::Crawl, vec![], None).await.unwrap();
        // Force staleness by rewriting created_at into the past.
        let mut job = registry.get(&id).await.unwrap();
        job.created_at = Utc::now() - chrono::Duration::hours(2);
        registry.save(&job).await.unwrap();

        let registry = JobRegistry::with_stale_deadline(registry.kvstore.clone(), Duration::from_secs(60));
        registry.known_ids.lock().await.insert(id.clone());
        registry.sweep_stale().await;

        let job = registry.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("timeout"));
    }
}
