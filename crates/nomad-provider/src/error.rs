//! Provider error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type alias using [`ProviderError`].
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid function spec: {0}")]
    InvalidSpec(String),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("No healthy instance for function: {0}")]
    NoInstance(String),

    #[error("Service catalog unavailable: {0}")]
    ResolverUnavailable(String),

    #[error("Invalid replica count: {0}")]
    InvalidReplicaCount(String),

    #[error("Missing function name")]
    MissingFunctionName,

    #[error("Invalid function name: {0}")]
    InvalidFunctionName(String),

    #[error("Upstream timed out after {0:?}")]
    UpstreamTimeout(std::time::Duration),

    #[error("Upstream connection failed: {0}")]
    UpstreamConnection(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Job modify index conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Create a scheduler error.
    #[must_use]
    pub fn scheduler(msg: impl Into<String>) -> Self {
        Self::Scheduler(msg.into())
    }

    /// Create an invalid spec error.
    #[must_use]
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidSpec(_) => "invalid_spec",
            Self::FunctionNotFound(_) => "function_not_found",
            Self::NoInstance(_) => "no_instance",
            Self::ResolverUnavailable(_) => "resolver_unavailable",
            Self::InvalidReplicaCount(_) => "invalid_replica_count",
            Self::MissingFunctionName => "missing_function_name",
            Self::InvalidFunctionName(_) => "invalid_function_name",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::UpstreamConnection(_) => "upstream_connection",
            Self::InvalidBody(_) => "invalid_body",
            Self::Scheduler(_) => "scheduler_error",
            Self::Conflict(_) => "conflict",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidSpec(_)
            | Self::InvalidReplicaCount(_)
            | Self::MissingFunctionName
            | Self::InvalidFunctionName(_)
            | Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::FunctionNotFound(_) | Self::NoInstance(_) => StatusCode::NOT_FOUND,
            Self::ResolverUnavailable(_) | Self::UpstreamConnection(_) | Self::Scheduler(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Conflict(_) | Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProviderError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Caller input and function identity are safe to echo back
        let message = match &self {
            Self::InvalidSpec(_)
            | Self::FunctionNotFound(_)
            | Self::NoInstance(_)
            | Self::InvalidReplicaCount(_)
            | Self::MissingFunctionName
            | Self::InvalidFunctionName(_)
            | Self::UpstreamTimeout(_)
            | Self::InvalidBody(_) => self.to_string(),
            Self::ResolverUnavailable(_) => "Service catalog unavailable".to_owned(),
            Self::UpstreamConnection(_) => "Unable to reach function".to_owned(),
            Self::Scheduler(_) => "Scheduler unavailable".to_owned(),
            Self::Conflict(_) | Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                "Internal server error".to_owned()
            }
        };

        (status, message).into_response()
    }
}
