//! HTTP client for the Nomad API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::JobApi;
use crate::config::NomadConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::job::{Job, JobListStub, JobSummary};

/// Fragment of the error Nomad returns when `EnforceIndex` does not match.
const CONFLICT_MARKER: &str = "conflicting job modify index";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RegisterRequest<'a> {
    job: &'a Job,
    enforce_index: bool,
    job_modify_index: u64,
}

#[derive(Deserialize)]
struct AgentSelf {
    config: AgentConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentConfig {
    datacenter: String,
}

/// Client for the Nomad HTTP API.
#[derive(Debug, Clone)]
pub struct NomadClient {
    client: Client,
    base_url: String,
    region: String,
    token: Option<String>,
}

impl NomadClient {
    /// Create a new Nomad client from configuration.
    pub fn new(config: &NomadConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("nomad client: {e}")))?;

        Ok(Self {
            client,
            base_url: with_scheme(&config.address),
            region: config.region.clone(),
            token: config.token.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self
            .client
            .request(method, url)
            .query(&[("region", self.region.as_str())]);

        match &self.token {
            Some(token) => builder.header("X-Nomad-Token", token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> ProviderResult<Response> {
        builder
            .send()
            .await
            .map_err(|e| ProviderError::scheduler(format!("request failed: {e}")))
    }
}

async fn failure(operation: &str, response: Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if body.contains(CONFLICT_MARKER) {
        return ProviderError::Conflict(body);
    }

    ProviderError::scheduler(format!("{operation} failed: {status}: {}", body.trim()))
}

async fn decode<T: serde::de::DeserializeOwned>(
    operation: &str,
    response: Response,
) -> ProviderResult<T> {
    response
        .json()
        .await
        .map_err(|e| ProviderError::scheduler(format!("{operation}: invalid response: {e}")))
}

#[async_trait]
impl JobApi for NomadClient {
    async fn register(&self, job: &Job, enforce_index: Option<u64>) -> ProviderResult<()> {
        let body = RegisterRequest {
            job,
            enforce_index: enforce_index.is_some(),
            job_modify_index: enforce_index.unwrap_or_default(),
        };

        let response = self
            .send(self.request(reqwest::Method::POST, "jobs").json(&body))
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(failure("register job", response).await)
        }
    }

    async fn list(&self, prefix: &str) -> ProviderResult<Vec<JobListStub>> {
        let response = self
            .send(
                self.request(reqwest::Method::GET, "jobs")
                    .query(&[("prefix", prefix)]),
            )
            .await?;

        if !response.status().is_success() {
            return Err(failure("list jobs", response).await);
        }

        decode("list jobs", response).await
    }

    async fn info(&self, job_id: &str) -> ProviderResult<Option<Job>> {
        let response = self
            .send(self.request(reqwest::Method::GET, &format!("job/{job_id}")))
            .await?;

        match response.status() {
            StatusCode::OK => decode("read job", response).await.map(Some),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(failure("read job", response).await),
        }
    }

    async fn summary(&self, job_id: &str) -> ProviderResult<Option<JobSummary>> {
        let response = self
            .send(self.request(reqwest::Method::GET, &format!("job/{job_id}/summary")))
            .await?;

        match response.status() {
            StatusCode::OK => decode("read job summary", response).await.map(Some),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(failure("read job summary", response).await),
        }
    }

    async fn deregister(&self, job_id: &str) -> ProviderResult<bool> {
        let response = self
            .send(
                self.request(reqwest::Method::DELETE, &format!("job/{job_id}"))
                    .query(&[("purge", "true")]),
            )
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(failure("deregister job", response).await),
        }
    }

    async fn agent_datacenter(&self) -> ProviderResult<String> {
        let response = self
            .send(self.request(reqwest::Method::GET, "agent/self"))
            .await?;

        if !response.status().is_success() {
            return Err(failure("read agent", response).await);
        }

        let agent: AgentSelf = decode("read agent", response).await?;
        Ok(agent.config.datacenter)
    }
}

/// Accepts bare `host:port` addresses as older deployments configured them.
fn with_scheme(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, Query},
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };
    use std::collections::HashMap;

    async fn mock_nomad() -> String {
        let app = Router::new()
            .route(
                "/v1/job/{id}",
                get(|Path(id): Path<String>| async move {
                    if id == "faas-echo" {
                        Ok(Json(serde_json::json!({
                            "ID": "faas-echo",
                            "Name": "faas-echo",
                            "JobModifyIndex": 7
                        })))
                    } else {
                        Err(AxumStatus::NOT_FOUND)
                    }
                }),
            )
            .route(
                "/v1/jobs",
                post(|Json(body): Json<serde_json::Value>| async move {
                    if body["EnforceIndex"] == true && body["JobModifyIndex"] != 7 {
                        (
                            AxumStatus::INTERNAL_SERVER_ERROR,
                            "Enforcing job modify index 3: job exists with conflicting job modify index: 7",
                        )
                    } else {
                        (AxumStatus::OK, "{}")
                    }
                }),
            )
            .route(
                "/v1/agent/self",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let dc = if q.get("region").map(String::as_str) == Some("eu") {
                        "eu-dc"
                    } else {
                        "dc1"
                    };
                    Json(serde_json::json!({"config": {"Datacenter": dc}}))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }

    fn client(address: String, region: &str) -> NomadClient {
        NomadClient::new(&NomadConfig {
            address,
            region: region.to_owned(),
            ..NomadConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn scheme_is_added_when_missing() {
        assert_eq!(with_scheme("localhost:4646"), "http://localhost:4646");
        assert_eq!(with_scheme("https://nomad:4646/"), "https://nomad:4646");
    }

    #[tokio::test]
    async fn info_maps_not_found_to_none() {
        let nomad = client(mock_nomad().await, "global");

        let job = nomad.info("faas-echo").await.unwrap().unwrap();
        assert_eq!(job.job_modify_index, 7);
        assert!(nomad.info("faas-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_detects_index_conflict() {
        let nomad = client(mock_nomad().await, "global");
        let job = Job {
            id: "faas-echo".to_owned(),
            name: "faas-echo".to_owned(),
            ..Job::default()
        };

        assert!(nomad.register(&job, Some(7)).await.is_ok());
        assert!(matches!(
            nomad.register(&job, Some(3)).await,
            Err(ProviderError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn agent_datacenter_uses_region() {
        let address = mock_nomad().await;
        assert_eq!(
            client(address.clone(), "eu").agent_datacenter().await.unwrap(),
            "eu-dc"
        );
        assert_eq!(
            client(address, "global").agent_datacenter().await.unwrap(),
            "dc1"
        );
    }

    #[tokio::test]
    async fn unreachable_scheduler_is_reported() {
        let nomad = client("127.0.0.1:1".to_owned(), "global");
        assert!(matches!(
            nomad.info("faas-echo").await,
            Err(ProviderError::Scheduler(_))
        ));
    }
}
