//! Health and provider info.

use axum::{http::StatusCode, Json};

use crate::types::ProviderInfo;

pub(super) async fn health() -> StatusCode {
    StatusCode::OK
}

pub(super) async fn info() -> Json<ProviderInfo> {
    Json(ProviderInfo::current())
}
