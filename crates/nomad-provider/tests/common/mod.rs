//! Common test utilities for provider integration tests.
#![allow(dead_code)]

pub mod fixtures;

use async_trait::async_trait;
use axum::{body::Body, body::Bytes, http::Request, http::StatusCode, Router};
use http_body_util::BodyExt;
use nomad_provider::{
    api::{router, AppState},
    config::{ConsulConfig, ProviderConfig},
    job::{from_job, job_id, ProviderDefaults},
    metrics::RecordingSink,
    nomad::InMemoryJobApi,
    resolver::{CatalogResolver, ServiceCatalog, ServiceInstance},
    ProviderResult,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Catalog that reports one healthy instance at `upstream` for every
/// function job that exists and is scaled above zero.
#[derive(Debug)]
pub struct JobBackedCatalog {
    jobs: Arc<InMemoryJobApi>,
    upstream: SocketAddr,
}

#[async_trait]
impl ServiceCatalog for JobBackedCatalog {
    async fn healthy_instances(&self, service: &str) -> ProviderResult<Vec<ServiceInstance>> {
        let Some(summary) = self.jobs.job(&job_id(service)).as_ref().and_then(from_job) else {
            return Ok(Vec::new());
        };
        if summary.replicas == 0 {
            return Ok(Vec::new());
        }

        Ok(vec![ServiceInstance::new(
            self.upstream.ip().to_string(),
            self.upstream.port(),
        )
        .with_timeout(summary.timeout)])
    }
}

/// Complete test provider with every component wired together.
pub struct TestProvider {
    pub jobs: Arc<InMemoryJobApi>,
    pub sink: Arc<RecordingSink>,
    pub app: Router,
}

impl TestProvider {
    /// A provider whose functions all resolve to `upstream`.
    pub fn new(upstream: SocketAddr) -> Self {
        Self::with_timeout(upstream, Duration::from_secs(5))
    }

    pub fn with_timeout(upstream: SocketAddr, invocation_timeout: Duration) -> Self {
        let jobs = Arc::new(InMemoryJobApi::new());
        let sink = Arc::new(RecordingSink::new());

        let catalog = Arc::new(JobBackedCatalog {
            jobs: jobs.clone(),
            upstream,
        });
        let resolver = CatalogResolver::from_config(catalog, &ConsulConfig::default());

        let state = AppState::new(
            jobs.clone(),
            Arc::new(resolver),
            sink.clone(),
            ProviderDefaults::from_config(&ProviderConfig::default(), "dc1"),
            invocation_timeout,
        )
        .unwrap();

        Self {
            jobs,
            sink,
            app: router(Arc::new(state), None),
        }
    }

    /// Send one request through the router.
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        body: impl Into<Body>,
    ) -> (StatusCode, Bytes) {
        let response = self
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(body.into())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    pub async fn send_json(
        &self,
        method: &str,
        uri: &str,
        body: &serde_json::Value,
    ) -> StatusCode {
        self.send(method, uri, body.to_string()).await.0
    }

    /// Desired replicas reported by the replica read route.
    pub async fn desired_replicas(&self, name: &str) -> Option<u64> {
        let (status, body) = self
            .send("GET", &format!("/system/function/{name}"), Body::empty())
            .await;
        if status != StatusCode::OK {
            return None;
        }
        let read: serde_json::Value = serde_json::from_slice(&body).unwrap();
        read["replicas"].as_u64()
    }
}
