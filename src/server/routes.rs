// src/server/routes.rs

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::ApiError;
use super::AppState;
use crate::cache::CacheStats;
use crate::github::types::ProxyRequest;
use crate::github::{Cached, RepoListQuery};
use crate::integrity::sha256_hex;
use crate::webdav::{self, DirEntry};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CONTENT_SHA256: HeaderName = HeaderName::from_static("x-content-sha256");

/// Cache policy advertised for proxied GET requests.
const PROXY_CACHE_CONTROL: &str = "public, s-maxage=600, stale-while-revalidate=300";

/// RFC 5987 `attr-char`: everything else in `filename*` is percent-encoded.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Listing {
    pub path: String,
    pub entries: Vec<DirEntry>,
}

/// `Cache-Control` value for an entry living `ttl`.
pub fn cache_control(ttl: Duration) -> String {
    let secs = ttl.as_secs();
    format!("public, s-maxage={secs}, stale-while-revalidate={}", secs / 2)
}

fn cached_response<T: serde::Serialize>(cached: Cached<T>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(X_CACHE, HeaderValue::from_static(cached.status.as_header()));
    if let Ok(value) = HeaderValue::from_str(&cache_control(cached.ttl)) {
        headers.insert(CACHE_CONTROL, value);
    }
    (headers, Json(cached.value)).into_response()
}

pub async fn proxy_get(State(state): State<AppState>, Query(query): Query<ProxyQuery>) -> Result<Response, ApiError> {
    let body = state.github.proxy("GET", query.endpoint.as_deref(), None).await?;
    Ok(([(CACHE_CONTROL, PROXY_CACHE_CONTROL)], Json(body)).into_response())
}

pub async fn proxy_post(
    State(state): State<AppState>,
    Json(request): Json<ProxyRequest>,
) -> Result<Json<Value>, ApiError> {
    let body = state
        .github
        .proxy(&request.method, request.endpoint.as_deref(), request.body.as_ref())
        .await?;
    Ok(Json(body))
}

pub async fn repository(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let cached = state.github.repository(&owner, &repo).await?;
    Ok(cached_response(cached))
}

pub async fn user_stats(State(state): State<AppState>, Path(username): Path<String>) -> Result<Response, ApiError> {
    let cached = state.github.user_stats(&username).await?;
    Ok(cached_response(cached))
}

pub async fn user_repositories(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<RepoListQuery>,
) -> Result<Response, ApiError> {
    let cached = state.github.user_repositories(&username, &query).await?;
    Ok(cached_response(cached))
}

/// Fetches a share file window by window and returns it as an attachment.
/// Dropping the request cancels the download.
pub async fn file(State(state): State<AppState>, Path(path): Path<String>) -> Result<Response, ApiError> {
    let files = state.files.as_ref().ok_or(ApiError::FilesNotConfigured)?;
    let name = webdav::file_name(&path).ok_or(ApiError::InvalidPath)?;

    let token = CancellationToken::new();
    let _guard = token.clone().drop_guard();
    let output = files
        .download(&path, token, |p| debug!(path = %path, percent = p.percent, "file download progress"))
        .await?;

    let digest = sha256_hex(&output.bytes);
    info!(path = %path, size = output.total_size, sha256 = %digest, "serving file");

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(output.total_size));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&name)) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&digest) {
        headers.insert(X_CONTENT_SHA256, value);
    }
    Ok((headers, output.bytes).into_response())
}

/// Lists one share directory; `path` defaults to the share root.
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Listing>, ApiError> {
    let files = state.files.as_ref().ok_or(ApiError::FilesNotConfigured)?;
    let path = query.path.filter(|p| !p.is_empty()).unwrap_or_else(|| "/".to_string());
    let entries = files.list(&path).await?;
    Ok(Json(Listing { path, entries }))
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.github.cache_stats())
}

pub async fn healthz() -> &'static str {
    "ok"
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' { c } else { '_' })
        .collect();
    let encoded = utf8_percent_encode(name, ATTR_CHAR);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
