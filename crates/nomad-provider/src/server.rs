//! Provider bootstrap and HTTP server.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::{router, AppState};
use crate::config::ProviderConfig;
use crate::error::ProviderResult;
use crate::job::ProviderDefaults;
use crate::metrics::{MetricsSink, NoopSink, PrometheusSink};
use crate::middleware::{spawn_metrics_server, Credentials};
use crate::nomad::{JobApi, NomadClient};
use crate::resolver::{CatalogResolver, ConsulCatalog};
use crate::types::ProviderInfo;

/// Run the provider until `cancel` fires.
pub async fn run(config: ProviderConfig, cancel: CancellationToken) -> ProviderResult<()> {
    let sink: Arc<dyn MetricsSink> = if config.metrics.enabled {
        let _metrics_task = spawn_metrics_server(config.metrics.clone(), cancel.clone())?;
        tracing::info!(
            address = %config.metrics.bind_address,
            path = %config.metrics.path,
            instance = %config.metrics.instance_tag(),
            "Metrics enabled"
        );
        Arc::new(PrometheusSink::new())
    } else {
        Arc::new(NoopSink)
    };

    let info = ProviderInfo::current();
    tracing::info!(
        version = %info.version.release,
        sha = %info.version.sha,
        "Started provider"
    );
    sink.incr("started", None);

    tracing::info!(
        address = %config.nomad.address,
        region = %config.nomad.region,
        "Creating Nomad client"
    );
    let jobs: Arc<dyn JobApi> = Arc::new(NomadClient::new(&config.nomad)?);
    let datacenter = agent_datacenter(jobs.as_ref(), &config.nomad.default_datacenter).await;

    let catalog = Arc::new(ConsulCatalog::new(&config.consul)?);
    let resolver = CatalogResolver::from_config(catalog, &config.consul);
    tracing::info!(
        consul = %config.consul.address,
        dns_fallback = config.consul.dns_enabled,
        cache_ttl = ?config.consul.cache_ttl,
        "Service resolver configured"
    );

    let credentials = if config.auth.enabled {
        Some(Credentials::load(&config.auth.secret_path)?)
    } else {
        None
    };
    tracing::info!(enabled = config.auth.enabled, "Basic authentication");

    let state = AppState::new(
        jobs,
        Arc::new(resolver),
        sink,
        ProviderDefaults::from_config(&config, datacenter),
        config.invocation.timeout,
    )?;
    let app = router(Arc::new(state), credentials);

    let addr = config.server.bind_address;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, timeout = ?config.invocation.timeout, "Provider listening");

    let shutdown = cancel.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .into_future();

    let drain_timeout = config.server.shutdown_timeout;
    tokio::select! {
        result = server => result?,
        () = async {
            cancel.cancelled().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            tracing::warn!(
                timeout = ?drain_timeout,
                "In-flight requests did not drain before shutdown timeout"
            );
        }
    }

    tracing::info!("Provider shutdown complete");
    Ok(())
}

/// Datacenter reported by the Nomad agent, or `fallback` when the agent cannot be asked.
pub async fn agent_datacenter(jobs: &dyn JobApi, fallback: &str) -> String {
    match jobs.agent_datacenter().await {
        Ok(datacenter) => {
            tracing::info!(datacenter = %datacenter, "Datacenter from agent");
            datacenter
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                fallback = %fallback,
                "Unable to read the agent's datacenter"
            );
            fallback.to_owned()
        }
    }
}
