//! Request metrics middleware and the Prometheus exporter.

use axum::{extract::MatchedPath, routing::get, Router};
use http::{Request, Response};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

use crate::config::MetricsConfig;
use crate::error::ProviderError;
use crate::metrics::MetricsSink;

/// Tower layer that records one sink entry per administrative request.
#[derive(Debug, Clone)]
pub struct MetricsLayer {
    sink: Arc<dyn MetricsSink>,
}

impl MetricsLayer {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            sink: self.sink.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    sink: Arc<dyn MetricsSink>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.method().to_string();
        // Matched route template keeps label cardinality bounded
        let route = req.extensions().get::<MatchedPath>().map_or_else(
            || req.uri().path().to_owned(),
            |matched| matched.as_str().to_owned(),
        );

        let start = Instant::now();
        let sink = self.sink.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let result = inner.call(req).await;

            let status = match &result {
                Ok(response) => response.status().as_u16(),
                Err(_) => 500,
            };
            sink.record_request(&route, &method, status, start.elapsed());

            result
        })
    }
}

/// Install the global Prometheus recorder, tagged with the node instance.
pub fn install_recorder(config: &MetricsConfig) -> Result<PrometheusHandle, ProviderError> {
    PrometheusBuilder::new()
        .add_global_label("instance", config.instance_tag())
        .install_recorder()
        .map_err(|e| ProviderError::Config(format!("metrics recorder: {e}")))
}

/// Serve the exporter endpoint until `cancel` fires.
pub async fn run_metrics_server(
    config: &MetricsConfig,
    handle: PrometheusHandle,
    cancel: CancellationToken,
) -> Result<(), ProviderError> {
    let path = config.path.clone();

    let app = Router::new().route(
        &path,
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = config.bind_address;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, path = %path, "Metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

/// Install the recorder and serve it in a background task.
pub fn spawn_metrics_server(
    config: MetricsConfig,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<Result<(), ProviderError>>, ProviderError> {
    let handle = install_recorder(&config)?;
    Ok(tokio::spawn(async move {
        run_metrics_server(&config, handle, cancel).await
    }))
}
