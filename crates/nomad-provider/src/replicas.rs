//! Replica reads and scaling.

use std::sync::Arc;

use crate::error::{ProviderError, ProviderResult};
use crate::job::{from_job, job_id, Job};
use crate::nomad::JobApi;
use crate::types::FunctionStatus;

/// Attempts at a scale write before a modify-index conflict is surfaced.
const MAX_SCALE_ATTEMPTS: usize = 3;

/// Reads and rewrites the replica count of function jobs.
#[derive(Debug, Clone)]
pub struct ReplicaController {
    jobs: Arc<dyn JobApi>,
}

impl ReplicaController {
    pub fn new(jobs: Arc<dyn JobApi>) -> Self {
        Self { jobs }
    }

    /// Desired and running replicas of `function`.
    pub async fn read(&self, function: &str) -> ProviderResult<FunctionStatus> {
        let id = job_id(function);
        let job = self
            .jobs
            .info(&id)
            .await?
            .ok_or_else(|| ProviderError::FunctionNotFound(function.to_owned()))?;

        status_of(self.jobs.as_ref(), &job)
            .await?
            .ok_or_else(|| ProviderError::FunctionNotFound(function.to_owned()))
    }

    /// Set the desired replica count of `function`.
    ///
    /// Every write is made against a freshly read job and guarded by its
    /// modify index; a conflicting write triggers another read.
    pub async fn update(&self, function: &str, replicas: i64) -> ProviderResult<()> {
        let desired = u32::try_from(replicas).map_err(|_| {
            ProviderError::InvalidReplicaCount(format!("{replicas} is not a valid replica count"))
        })?;
        let id = job_id(function);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut job = self
                .jobs
                .info(&id)
                .await?
                .ok_or_else(|| ProviderError::FunctionNotFound(function.to_owned()))?;

            let max = from_job(&job)
                .map(|summary| summary.scaling.max)
                .ok_or_else(|| ProviderError::FunctionNotFound(function.to_owned()))?;
            if desired > max {
                return Err(ProviderError::InvalidReplicaCount(format!(
                    "{desired} exceeds the maximum of {max} for {function}"
                )));
            }

            let index = job.job_modify_index;
            let Some(group) = job.primary_group_mut() else {
                return Err(ProviderError::internal(format!("job {id} has no task group")));
            };
            if group.count == desired {
                tracing::debug!(
                    function = %function,
                    replicas = desired,
                    "Replica count unchanged"
                );
                return Ok(());
            }
            let previous = group.count;
            group.count = desired;

            match self.jobs.register(&job, Some(index)).await {
                Ok(()) => {
                    tracing::info!(
                        function = %function,
                        from = previous,
                        to = desired,
                        "Scaled function"
                    );
                    return Ok(());
                }
                Err(ProviderError::Conflict(msg)) if attempt < MAX_SCALE_ATTEMPTS => {
                    tracing::debug!(
                        function = %function,
                        attempt,
                        conflict = %msg,
                        "Retrying scale after conflict"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Status of a function job, or `None` if the job is not one of ours.
pub(crate) async fn status_of(
    jobs: &dyn JobApi,
    job: &Job,
) -> ProviderResult<Option<FunctionStatus>> {
    let Some(summary) = from_job(job) else {
        return Ok(None);
    };

    let available = jobs
        .summary(&job.id)
        .await?
        .map(|s| s.running())
        .unwrap_or_default();

    Ok(Some(FunctionStatus {
        name: summary.name,
        image: summary.image,
        invocation_count: 0,
        replicas: u64::from(summary.replicas),
        available_replicas: available,
        env_process: summary.env_process.unwrap_or_default(),
        labels: summary.labels,
        annotations: summary.annotations,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::function::{FunctionSpec, ScalingBounds};
    use crate::job::{to_job, ProviderDefaults};
    use crate::job::{JobListStub, JobSummary};
    use crate::nomad::InMemoryJobApi;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn register_echo(jobs: &InMemoryJobApi, min: u32, max: u32) {
        let mut spec = FunctionSpec::new("echo", "ghcr.io/openfaas/echo:latest");
        spec.scaling = ScalingBounds { min, max };
        let defaults = ProviderDefaults::from_config(&ProviderConfig::default(), "dc1");
        let job = to_job(&spec, &defaults).unwrap();
        jobs.register(&job, None).await.unwrap();
    }

    async fn deployed(min: u32, max: u32) -> (Arc<InMemoryJobApi>, ReplicaController) {
        let jobs = Arc::new(InMemoryJobApi::new());
        register_echo(&jobs, min, max).await;

        let controller = ReplicaController::new(jobs.clone());
        (jobs, controller)
    }

    /// Another writer re-registers the job just ahead of each guarded write,
    /// until `races` runs out.
    #[derive(Debug)]
    struct RacingJobs {
        inner: InMemoryJobApi,
        races: AtomicUsize,
        reads: AtomicUsize,
    }

    impl RacingJobs {
        async fn new(races: usize) -> Arc<Self> {
            let inner = InMemoryJobApi::new();
            register_echo(&inner, 1, 5).await;
            Arc::new(Self {
                inner,
                races: AtomicUsize::new(races),
                reads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl JobApi for RacingJobs {
        async fn register(&self, job: &Job, enforce_index: Option<u64>) -> ProviderResult<()> {
            if enforce_index.is_some() && self.races.load(Ordering::SeqCst) > 0 {
                self.races.fetch_sub(1, Ordering::SeqCst);
                let current = self.inner.info(&job.id).await?.unwrap();
                self.inner.register(&current, None).await?;
            }
            self.inner.register(job, enforce_index).await
        }

        async fn list(&self, prefix: &str) -> ProviderResult<Vec<JobListStub>> {
            self.inner.list(prefix).await
        }

        async fn info(&self, job_id: &str) -> ProviderResult<Option<Job>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.info(job_id).await
        }

        async fn summary(&self, job_id: &str) -> ProviderResult<Option<JobSummary>> {
            self.inner.summary(job_id).await
        }

        async fn deregister(&self, job_id: &str) -> ProviderResult<bool> {
            self.inner.deregister(job_id).await
        }

        async fn agent_datacenter(&self) -> ProviderResult<String> {
            self.inner.agent_datacenter().await
        }
    }

    #[tokio::test]
    async fn read_reports_desired_and_available() {
        let (_, controller) = deployed(2, 5).await;

        let status = controller.read("echo").await.unwrap();
        assert_eq!(status.name, "echo");
        assert_eq!(status.replicas, 2);
        assert_eq!(status.available_replicas, 2);
    }

    #[tokio::test]
    async fn read_unknown_function() {
        let controller = ReplicaController::new(Arc::new(InMemoryJobApi::new()));
        assert!(matches!(
            controller.read("echo").await,
            Err(ProviderError::FunctionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_rewrites_count() {
        let (jobs, controller) = deployed(1, 5).await;

        controller.update("echo", 3).await.unwrap();

        assert_eq!(controller.read("echo").await.unwrap().replicas, 3);
        assert_eq!(jobs.registrations(), 2);
    }

    #[tokio::test]
    async fn update_is_idempotent() {
        let (jobs, controller) = deployed(1, 5).await;

        controller.update("echo", 3).await.unwrap();
        controller.update("echo", 3).await.unwrap();

        assert_eq!(controller.read("echo").await.unwrap().replicas, 3);
        assert_eq!(jobs.registrations(), 2);
    }

    #[tokio::test]
    async fn update_unknown_function_submits_nothing() {
        let jobs = Arc::new(InMemoryJobApi::new());
        let controller = ReplicaController::new(jobs.clone());

        assert!(matches!(
            controller.update("echo", 2).await,
            Err(ProviderError::FunctionNotFound(_))
        ));
        assert_eq!(jobs.registrations(), 0);
    }

    #[tokio::test]
    async fn update_rejects_out_of_range_counts() {
        let (jobs, controller) = deployed(1, 5).await;

        assert!(matches!(
            controller.update("echo", -1).await,
            Err(ProviderError::InvalidReplicaCount(_))
        ));
        assert!(matches!(
            controller.update("echo", 6).await,
            Err(ProviderError::InvalidReplicaCount(_))
        ));
        assert_eq!(jobs.registrations(), 1);
    }

    #[tokio::test]
    async fn conflicting_write_is_retried_on_fresh_read() {
        let jobs = RacingJobs::new(1).await;
        let controller = ReplicaController::new(jobs.clone());

        controller.update("echo", 3).await.unwrap();

        assert_eq!(jobs.reads.load(Ordering::SeqCst), 2);
        // deploy, the racing write, then ours
        assert_eq!(jobs.inner.registrations(), 3);
        let stored = jobs.inner.job("faas-echo").unwrap();
        assert_eq!(stored.primary_group().unwrap().count, 3);
    }

    #[tokio::test]
    async fn persistent_conflict_is_surfaced() {
        let jobs = RacingJobs::new(MAX_SCALE_ATTEMPTS).await;
        let controller = ReplicaController::new(jobs.clone());

        let err = controller.update("echo", 3).await.unwrap_err();

        assert!(matches!(err, ProviderError::Conflict(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(jobs.reads.load(Ordering::SeqCst), MAX_SCALE_ATTEMPTS);
        let stored = jobs.inner.job("faas-echo").unwrap();
        assert_eq!(stored.primary_group().unwrap().count, 1);
    }

    #[tokio::test]
    async fn scale_to_zero_is_allowed() {
        let (_, controller) = deployed(1, 5).await;

        controller.update("echo", 0).await.unwrap();
        assert_eq!(controller.read("echo").await.unwrap().replicas, 0);
    }
}
