//! Test fixtures for provider integration tests.

use axum::{body::Bytes, extract::Request, Router};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Builder for deploy request bodies.
pub struct DeploymentBuilder {
    service: String,
    image: String,
    env_process: Option<String>,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

impl DeploymentBuilder {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            image: format!("ghcr.io/openfaas/{service}:latest"),
            env_process: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    pub fn with_env_process(mut self, process: &str) -> Self {
        self.env_process = Some(process.to_string());
        self
    }

    /// Sets the `com.openfaas.scale.min/max` labels.
    pub fn with_scaling(mut self, min: u32, max: u32) -> Self {
        self.labels
            .insert("com.openfaas.scale.min".to_string(), min.to_string());
        self.labels
            .insert("com.openfaas.scale.max".to_string(), max.to_string());
        self
    }

    /// Sets the `com.openfaas.timeout` annotation.
    pub fn with_timeout(mut self, timeout: &str) -> Self {
        self.annotations
            .insert("com.openfaas.timeout".to_string(), timeout.to_string());
        self
    }

    pub fn build(self) -> Value {
        let mut body = json!({
            "service": self.service,
            "image": self.image,
            "labels": self.labels,
            "annotations": self.annotations,
        });
        if let Some(process) = self.env_process {
            body["envProcess"] = Value::String(process);
        }
        body
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

/// Upstream that answers every request with its own body, prefixed by the request path.
pub async fn spawn_echo_upstream() -> SocketAddr {
    serve(Router::new().fallback(|request: Request| async move {
        let path = request.uri().path().to_owned();
        let body = axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .unwrap();
        let mut reply = format!("{path} ").into_bytes();
        reply.extend_from_slice(&body);
        Bytes::from(reply)
    }))
    .await
}

/// Upstream that waits `delay` before answering and counts the requests it received.
pub async fn spawn_slow_upstream(delay: Duration) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    let addr = serve(Router::new().fallback(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            "late"
        }
    }))
    .await;

    (addr, hits)
}
