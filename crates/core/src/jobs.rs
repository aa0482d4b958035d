use crate::models::IndexSummary;
use crate::RagError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded { summary: IndexSummary },
    Failed { error: String },
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    #[serde(flatten)]
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Finished jobs kept for status polling before the oldest are forgotten.
pub const DEFAULT_FINISHED_RETENTION: usize = 256;

/// Background indexing runs with pollable status and a completion channel.
/// Queued and running jobs are always kept; only finished ones are pruned.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, Arc<watch::Sender<JobStatus>>>>>,
    max_finished: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_FINISHED_RETENTION)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(max_finished: usize) -> Self {
        Self {
            jobs: Arc::default(),
            max_finished,
        }
    }

    fn prune_finished(&self, jobs: &mut HashMap<JobId, Arc<watch::Sender<JobStatus>>>) {
        let mut finished = jobs
            .iter()
            .filter_map(|(id, sender)| {
                let status = sender.borrow();
                status.finished_at.map(|finished_at| (finished_at, *id))
            })
            .collect::<Vec<_>>();
        if finished.len() <= self.max_finished {
            return;
        }

        finished.sort_unstable();
        let excess = finished.len() - self.max_finished;
        for (_, id) in finished.into_iter().take(excess) {
            debug!(job = %id, "forgetting finished job");
            jobs.remove(&id);
        }
    }

    /// Spawns `work` on the runtime and returns immediately.
    pub async fn submit<F>(&self, work: F) -> JobId
    where
        F: Future<Output = Result<IndexSummary, RagError>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (sender, _receiver) = watch::channel(JobStatus {
            id,
            state: JobState::Queued,
            submitted_at: Utc::now(),
            finished_at: None,
        });
        let sender = Arc::new(sender);
        {
            let mut jobs = self.jobs.write().await;
            self.prune_finished(&mut jobs);
            jobs.insert(id, Arc::clone(&sender));
        }

        tokio::spawn(async move {
            sender.send_modify(|status| status.state = JobState::Running);
            info!(job = %id, "indexing job started");

            let state = match tokio::spawn(work).await {
                Ok(Ok(summary)) => {
                    info!(job = %id, chunks = summary.chunks, documents = summary.documents, "indexing job finished");
                    JobState::Succeeded { summary }
                }
                Ok(Err(error)) => {
                    warn!(job = %id, %error, "indexing job failed");
                    JobState::Failed {
                        error: error.to_string(),
                    }
                }
                Err(join_error) => {
                    warn!(job = %id, error = %join_error, "indexing job aborted");
                    JobState::Failed {
                        error: format!("indexing task aborted: {join_error}"),
                    }
                }
            };

            sender.send_modify(|status| {
                status.state = state;
                status.finished_at = Some(Utc::now());
            });
        });

        id
    }

    pub async fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs
            .read()
            .await
            .get(&id)
            .map(|sender| sender.borrow().clone())
    }

    pub async fn subscribe(&self, id: JobId) -> Result<watch::Receiver<JobStatus>, RagError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .map(|sender| sender.subscribe())
            .ok_or(RagError::UnknownJob(id))
    }

    /// Resolves once the job has succeeded or failed.
    pub async fn wait(&self, id: JobId) -> Result<JobStatus, RagError> {
        let mut receiver = self.subscribe(id).await?;
        let status = receiver
            .wait_for(|status| status.state.is_finished())
            .await
            .map(|status| (*status).clone())
            .map_err(|_| RagError::UnknownJob(id))?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IngestError;

    #[tokio::test]
    async fn successful_job_reports_counts() {
        let registry = JobRegistry::new();
        let id = registry
            .submit(async {
                Ok(IndexSummary {
                    files: 2,
                    documents: 3,
                    chunks: 12,
                    skipped: 1,
                })
            })
            .await;

        let status = registry.wait(id).await.unwrap();
        assert_eq!(status.id, id);
        assert!(status.finished_at.is_some());
        match status.state {
            JobState::Succeeded { summary } => {
                assert_eq!(summary.chunks, 12);
                assert_eq!(summary.skipped, 1);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_job_keeps_error_text() {
        let registry = JobRegistry::new();
        let id = registry
            .submit(async {
                Err(RagError::Ingest(IngestError::InvalidArgument(
                    "bad upload".to_string(),
                )))
            })
            .await;

        let status = registry.wait(id).await.unwrap();
        assert_eq!(
            status.state,
            JobState::Failed {
                error: "invalid argument: bad upload".to_string()
            }
        );
    }

    #[tokio::test]
    async fn panicking_job_is_marked_failed() {
        let registry = JobRegistry::new();
        let id = registry
            .submit(async {
                if true {
                    panic!("boom");
                }
                Ok(IndexSummary::default())
            })
            .await;

        let status = registry.wait(id).await.unwrap();
        assert!(matches!(status.state, JobState::Failed { .. }));
    }

    #[tokio::test]
    async fn oldest_finished_jobs_are_pruned() {
        let registry = JobRegistry::with_retention(1);
        let first = registry.submit(async { Ok(IndexSummary::default()) }).await;
        registry.wait(first).await.unwrap();
        let second = registry.submit(async { Ok(IndexSummary::default()) }).await;
        registry.wait(second).await.unwrap();

        let third = registry.submit(async { Ok(IndexSummary::default()) }).await;

        assert!(registry.status(first).await.is_none());
        assert!(registry.status(second).await.is_some());
        assert!(registry.status(third).await.is_some());
    }

    #[tokio::test]
    async fn unknown_jobs_are_reported() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        assert!(registry.status(id).await.is_none());
        assert!(matches!(
            registry.subscribe(id).await,
            Err(RagError::UnknownJob(_))
        ));
    }

    #[test]
    fn status_serializes_with_flat_state() {
        let status = JobStatus {
            id: Uuid::nil(),
            state: JobState::Failed {
                error: "x".to_string(),
            },
            submitted_at: Utc::now(),
            finished_at: None,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "failed");
        assert_eq!(value["error"], "x");
    }
}
