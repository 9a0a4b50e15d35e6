//! In-memory job API for tests and local development.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::JobApi;
use crate::error::{ProviderError, ProviderResult};
use crate::job::{Job, JobListStub, JobSummary, TaskGroupSummary};

/// Job API backed by a map.
///
/// Every registered task group is reported as fully running. Data is lost
/// when the process exits.
#[derive(Debug)]
pub struct InMemoryJobApi {
    jobs: RwLock<BTreeMap<String, Job>>,
    datacenter: Option<String>,
    index: AtomicU64,
    registrations: AtomicUsize,
}

impl InMemoryJobApi {
    #[must_use]
    pub fn new() -> Self {
        Self::with_datacenter("dc1")
    }

    #[must_use]
    pub fn with_datacenter(datacenter: impl Into<String>) -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            datacenter: Some(datacenter.into()),
            index: AtomicU64::new(0),
            registrations: AtomicUsize::new(0),
        }
    }

    /// An API whose agent lookup always fails.
    #[must_use]
    pub fn without_agent() -> Self {
        Self {
            datacenter: None,
            ..Self::new()
        }
    }

    /// Number of successful `register` calls so far.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Snapshot of a stored job.
    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.jobs
            .read()
            .ok()
            .and_then(|jobs| jobs.get(job_id).cloned())
    }
}

impl Default for InMemoryJobApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobApi for InMemoryJobApi {
    async fn register(&self, job: &Job, enforce_index: Option<u64>) -> ProviderResult<()> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| ProviderError::internal("lock poisoned"))?;

        if let Some(expected) = enforce_index {
            let current = jobs.get(&job.id).map_or(0, |j| j.job_modify_index);
            if current != expected {
                return Err(ProviderError::Conflict(format!(
                    "Enforcing job modify index {expected}: job exists with conflicting job modify index: {current}"
                )));
            }
        }

        let index = self.index.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = job.clone();
        stored.modify_index = index;
        stored.job_modify_index = index;
        stored.status = Some("running".to_owned());
        jobs.insert(stored.id.clone(), stored);

        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> ProviderResult<Vec<JobListStub>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| ProviderError::internal("lock poisoned"))?;

        Ok(jobs
            .values()
            .filter(|job| job.id.starts_with(prefix))
            .map(|job| JobListStub {
                id: job.id.clone(),
                name: job.name.clone(),
                status: job.status.clone().unwrap_or_default(),
                job_modify_index: job.job_modify_index,
            })
            .collect())
    }

    async fn info(&self, job_id: &str) -> ProviderResult<Option<Job>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| ProviderError::internal("lock poisoned"))?;

        Ok(jobs.get(job_id).cloned())
    }

    async fn summary(&self, job_id: &str) -> ProviderResult<Option<JobSummary>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| ProviderError::internal("lock poisoned"))?;

        Ok(jobs.get(job_id).map(|job| JobSummary {
            job_id: job.id.clone(),
            summary: job
                .task_groups
                .iter()
                .map(|group| {
                    (
                        group.name.clone(),
                        TaskGroupSummary {
                            running: u64::from(group.count),
                            ..TaskGroupSummary::default()
                        },
                    )
                })
                .collect::<HashMap<_, _>>(),
        }))
    }

    async fn deregister(&self, job_id: &str) -> ProviderResult<bool> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| ProviderError::internal("lock poisoned"))?;

        Ok(jobs.remove(job_id).is_some())
    }

    async fn agent_datacenter(&self) -> ProviderResult<String> {
        self.datacenter
            .clone()
            .ok_or_else(|| ProviderError::scheduler("agent unavailable"))
    }
}
