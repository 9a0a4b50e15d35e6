//! Nomad job API abstractions.

mod client;
mod memory;

pub use client::NomadClient;
pub use memory::InMemoryJobApi;

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::job::{Job, JobListStub, JobSummary};

/// The slice of the Nomad job API the provider depends on.
///
/// Implementations never cache: every call reflects the scheduler's state at
/// the time it is made.
#[async_trait]
pub trait JobApi: Send + Sync + std::fmt::Debug {
    /// Register (create or replace) a job.
    ///
    /// With `enforce_index`, the write only succeeds if the job's current
    /// `JobModifyIndex` still equals it; otherwise `ProviderError::Conflict`.
    async fn register(&self, job: &Job, enforce_index: Option<u64>) -> ProviderResult<()>;

    /// List jobs whose ID starts with `prefix`.
    async fn list(&self, prefix: &str) -> ProviderResult<Vec<JobListStub>>;

    /// Fetch a job by ID.
    async fn info(&self, job_id: &str) -> ProviderResult<Option<Job>>;

    /// Allocation counts for a job.
    async fn summary(&self, job_id: &str) -> ProviderResult<Option<JobSummary>>;

    /// Stop and purge a job. Returns `false` if it did not exist.
    async fn deregister(&self, job_id: &str) -> ProviderResult<bool>;

    /// Datacenter of the agent the provider talks to.
    async fn agent_datacenter(&self) -> ProviderResult<String>;
}
