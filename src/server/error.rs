use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

use crate::downloader::DownloadError;
use crate::github::GithubError;
use crate::webdav::WebDavError;

/// Everything a route can fail with, rendered as `{ "error", "details"? }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Github(#[from] GithubError),
    #[error(transparent)]
    Files(#[from] WebDavError),
    #[error("Invalid file path")]
    InvalidPath,
    #[error("File storage not configured")]
    FilesNotConfigured,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Github(e) => e.status(),
            ApiError::Files(e) => files_status(e),
            ApiError::InvalidPath => StatusCode::BAD_REQUEST,
            ApiError::FilesNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn details(&self) -> Option<&Value> {
        match self {
            ApiError::Github(e) => e.details(),
            _ => None,
        }
    }
}

fn files_status(error: &WebDavError) -> StatusCode {
    match error {
        WebDavError::InvalidPath(_) => StatusCode::BAD_REQUEST,
        WebDavError::Network(e) => network_status(e),
        WebDavError::Download(e) => download_status(e),
        WebDavError::Listing(_) | WebDavError::Method(_) => StatusCode::BAD_GATEWAY,
    }
}

// Missing files and share auth failures keep their status.
fn network_status(error: &reqwest::Error) -> StatusCode {
    match error.status() {
        Some(s) if s == StatusCode::NOT_FOUND || s == StatusCode::UNAUTHORIZED || s == StatusCode::FORBIDDEN => s,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn download_status(error: &DownloadError) -> StatusCode {
    match error {
        DownloadError::Network(e) => network_status(e),
        DownloadError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
        DownloadError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        DownloadError::SizeUnknown(_)
        | DownloadError::ChunkFetch { .. }
        | DownloadError::ChunkRetryExhausted { .. }
        | DownloadError::RangeUnsupported(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, error = %self, "request failed");
        }
        let mut body = json!({ "error": self.to_string() });
        if let Some(details) = self.details() {
            body["details"] = details.clone();
        }
        (status, Json(body)).into_response()
    }
}
