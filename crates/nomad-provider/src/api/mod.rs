//! HTTP surface of the provider.

mod extract;
mod functions;
mod system;

pub use extract::{FunctionNameExtractor, RoutePrefixExtractor};

use axum::{
    extract::{Request, State},
    response::Response,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProviderResult;
use crate::job::ProviderDefaults;
use crate::metrics::MetricsSink;
use crate::middleware::{BasicAuthLayer, Credentials, MetricsLayer};
use crate::nomad::JobApi;
use crate::proxy::InvocationProxy;
use crate::replicas::ReplicaController;
use crate::resolver::FunctionResolver;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    jobs: Arc<dyn JobApi>,
    resolver: Arc<dyn FunctionResolver>,
    extractor: Arc<dyn FunctionNameExtractor>,
    sink: Arc<dyn MetricsSink>,
    defaults: ProviderDefaults,
    proxy: InvocationProxy,
    replicas: ReplicaController,
}

impl AppState {
    pub fn new(
        jobs: Arc<dyn JobApi>,
        resolver: Arc<dyn FunctionResolver>,
        sink: Arc<dyn MetricsSink>,
        defaults: ProviderDefaults,
        invocation_timeout: Duration,
    ) -> ProviderResult<Self> {
        Self::with_extractor(
            jobs,
            resolver,
            Arc::new(RoutePrefixExtractor::default()),
            sink,
            defaults,
            invocation_timeout,
        )
    }

    pub fn with_extractor(
        jobs: Arc<dyn JobApi>,
        resolver: Arc<dyn FunctionResolver>,
        extractor: Arc<dyn FunctionNameExtractor>,
        sink: Arc<dyn MetricsSink>,
        defaults: ProviderDefaults,
        invocation_timeout: Duration,
    ) -> ProviderResult<Self> {
        let proxy = InvocationProxy::new(
            resolver.clone(),
            extractor.clone(),
            sink.clone(),
            invocation_timeout,
        )?;
        let replicas = ReplicaController::new(jobs.clone());

        Ok(Self {
            jobs,
            resolver,
            extractor,
            sink,
            defaults,
            proxy,
            replicas,
        })
    }
}

/// Build the provider router.
///
/// With `credentials`, every `/system` route requires basic authentication.
pub fn router(state: Arc<AppState>, credentials: Option<Credentials>) -> Router {
    let mut system = Router::new()
        .route(
            "/system/functions",
            get(functions::list)
                .post(functions::deploy)
                .put(functions::deploy)
                .delete(functions::delete),
        )
        .route("/system/function/{name}", get(functions::replicas))
        .route("/system/scale-function/{name}", post(functions::scale))
        .route("/system/info", get(system::info))
        .route_layer(MetricsLayer::new(state.sink.clone()));

    if let Some(credentials) = credentials {
        system = system.layer(BasicAuthLayer::new(credentials));
    }

    Router::new()
        .route("/healthz", get(system::health))
        .route("/function", any(invoke))
        .route("/function/", any(invoke))
        .route("/function/{name}", any(invoke))
        .route("/function/{name}/", any(invoke))
        .route("/function/{name}/{*path}", any(invoke))
        .merge(system)
        .with_state(state)
}

async fn invoke(State(state): State<Arc<AppState>>, request: Request) -> Response {
    state.proxy.invoke(request).await
}
