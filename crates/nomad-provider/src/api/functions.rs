//! Function lifecycle handlers.

use axum::{
    body::Bytes,
    extract::State,
    http::{StatusCode, Uri},
    Json,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::AppState;
use crate::error::{ProviderError, ProviderResult};
use crate::function::validate_function_name;
use crate::job::{job_id, to_job, JOB_PREFIX};
use crate::replicas::status_of;
use crate::types::{
    DeleteFunctionRequest, FunctionDeployment, FunctionStatus, ScaleServiceRequest,
};

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ProviderResult<T> {
    serde_json::from_slice(body).map_err(|e| ProviderError::InvalidBody(e.to_string()))
}

/// Every deployed function with its replica counts.
pub(super) async fn list(
    State(state): State<Arc<AppState>>,
) -> ProviderResult<Json<Vec<FunctionStatus>>> {
    let stubs = state.jobs.list(JOB_PREFIX).await?;

    let mut functions = Vec::with_capacity(stubs.len());
    for stub in stubs {
        // A job can disappear between list and fetch
        let Some(job) = state.jobs.info(&stub.id).await? else {
            continue;
        };
        if let Some(status) = status_of(state.jobs.as_ref(), &job).await? {
            functions.push(status);
        }
    }

    Ok(Json(functions))
}

/// Create the function's job, or replace it if it already exists.
pub(super) async fn deploy(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ProviderResult<StatusCode> {
    let deployment: FunctionDeployment = parse_body(&body)?;
    let spec = deployment.into_spec()?;
    let job = to_job(&spec, &state.defaults)?;

    let existed = state.jobs.info(&job.id).await?.is_some();
    state.jobs.register(&job, None).await?;

    if existed {
        state.resolver.invalidate(&spec.name);
        state.sink.incr("update", Some(&spec.name));
        tracing::info!(function = %spec.name, image = %spec.image, "Updated function");
    } else {
        state.sink.incr("deploy", Some(&spec.name));
        tracing::info!(function = %spec.name, image = %spec.image, "Deployed function");
    }

    Ok(StatusCode::ACCEPTED)
}

/// Remove a function's job.
pub(super) async fn delete(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ProviderResult<StatusCode> {
    let request: DeleteFunctionRequest = parse_body(&body)?;
    let name = request.function_name;
    if name.is_empty() {
        return Err(ProviderError::MissingFunctionName);
    }
    validate_function_name(&name)?;

    let id = job_id(&name);
    if state.jobs.info(&id).await?.is_none() || !state.jobs.deregister(&id).await? {
        return Err(ProviderError::FunctionNotFound(name));
    }

    state.resolver.invalidate(&name);
    state.sink.incr("delete", Some(&name));
    tracing::info!(function = %name, "Deleted function");

    Ok(StatusCode::ACCEPTED)
}

/// Replica counts of one function.
pub(super) async fn replicas(
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> ProviderResult<Json<FunctionStatus>> {
    let name = state.extractor.extract(uri.path())?;
    Ok(Json(state.replicas.read(&name).await?))
}

/// Set the desired replica count of one function.
pub(super) async fn scale(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    body: Bytes,
) -> ProviderResult<StatusCode> {
    let name = state.extractor.extract(uri.path())?;
    let request: ScaleServiceRequest = parse_body(&body)?;

    state.replicas.update(&name, request.replicas).await?;
    state.sink.incr("scale", Some(&name));

    Ok(StatusCode::ACCEPTED)
}
