//! Local fixture servers for integration tests: a range-capable file server
//! and a fake GitHub API. Both bind `127.0.0.1:0` and run `axum::serve` in
//! the background.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, LINK, RANGE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{Datelike, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use url::Url;

pub const TEST_TOKEN: &str = "test-token";

/// Binds an ephemeral port and serves `app` on it.
pub async fn spawn(app: Router) -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind fixture server");
    listener.set_nonblocking(true).expect("failed to set fixture listener non-blocking");
    let addr = listener.local_addr().expect("fixture listener has no address");

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::from_std(listener).expect("failed to convert fixture listener");
        axum::serve(listener, app).await.unwrap();
    });

    Url::parse(&format!("http://{addr}/")).expect("failed to build fixture url")
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

// File server

#[derive(Debug, Default)]
pub struct FileBehavior {
    /// Remaining 503 responses per window start offset.
    pub failures: HashMap<u64, u32>,
    /// Window starts whose next response is cut short.
    pub truncate_once: Vec<u64>,
    /// Answer every GET with the full body and `200 OK`.
    pub ignore_range: bool,
    /// Send HEAD responses without `Content-Length`.
    pub omit_length: bool,
    /// Delay before each window response.
    pub delay: Option<Duration>,
    /// Required `Authorization` header value.
    pub expect_auth: Option<String>,
    /// Multistatus body returned for every PROPFIND.
    pub listing: Option<String>,
}

pub struct FileState {
    pub data: Bytes,
    pub behavior: Mutex<FileBehavior>,
    /// `Range` headers of every GET, in arrival order.
    pub ranges: Mutex<Vec<String>>,
    pub heads: Mutex<usize>,
    pub paths: Mutex<Vec<String>>,
    /// `"<path> depth=<Depth>"` for every PROPFIND.
    pub propfinds: Mutex<Vec<String>>,
}

impl FileState {
    pub fn ranges(&self) -> Vec<String> {
        self.ranges.lock().clone()
    }

    pub fn requests_for(&self, range: &str) -> usize {
        self.ranges.lock().iter().filter(|r| r.as_str() == range).count()
    }

    pub fn head_count(&self) -> usize {
        *self.heads.lock()
    }
}

pub struct FileServer {
    pub base: Url,
    pub state: Arc<FileState>,
}

impl FileServer {
    pub async fn start(data: Bytes, behavior: FileBehavior) -> Self {
        let state = Arc::new(FileState {
            data,
            behavior: Mutex::new(behavior),
            ranges: Mutex::new(Vec::new()),
            heads: Mutex::new(0),
            paths: Mutex::new(Vec::new()),
            propfinds: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/{*path}", get(serve_file).fallback(serve_propfind))
            .with_state(state.clone());
        let base = spawn(app).await;
        Self { base, state }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base.join(path.trim_start_matches('/')).expect("invalid fixture path")
    }
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn serve_file(
    State(state): State<Arc<FileState>>,
    method: Method,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.paths.lock().push(path);

    let (expect_auth, omit_length, ignore_range, delay) = {
        let b = state.behavior.lock();
        (b.expect_auth.clone(), b.omit_length, b.ignore_range, b.delay)
    };
    if let Some(expected) = expect_auth {
        let given = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if given != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    if method == Method::HEAD {
        *state.heads.lock() += 1;
        if omit_length {
            let stream = futures_util::stream::iter([Ok::<_, std::io::Error>(Bytes::new())]);
            return (StatusCode::OK, Body::from_stream(stream)).into_response();
        }
        return (StatusCode::OK, state.data.clone()).into_response();
    }

    let range = headers.get(RANGE).and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
    state.ranges.lock().push(range.clone());
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    if ignore_range || range.is_empty() {
        return (StatusCode::OK, state.data.clone()).into_response();
    }
    let Some((start, end)) = parse_range(&range) else {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    };

    {
        let mut b = state.behavior.lock();
        if let Some(remaining) = b.failures.get_mut(&start) {
            if *remaining > 0 {
                *remaining -= 1;
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        }
        if let Some(pos) = b.truncate_once.iter().position(|s| *s == start) {
            b.truncate_once.remove(pos);
            let half = state.data.slice(start as usize..(start + (end - start) / 2) as usize);
            return (StatusCode::PARTIAL_CONTENT, half).into_response();
        }
    }

    let total = state.data.len() as u64;
    let end = end.min(total - 1);
    let body = state.data.slice(start as usize..=end as usize);
    let content_range = HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")).unwrap();
    (StatusCode::PARTIAL_CONTENT, [(CONTENT_RANGE, content_range)], body).into_response()
}

async fn serve_propfind(
    State(state): State<Arc<FileState>>,
    method: Method,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    if method.as_str() != "PROPFIND" {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let (expect_auth, listing) = {
        let b = state.behavior.lock();
        (b.expect_auth.clone(), b.listing.clone())
    };
    if let Some(expected) = expect_auth {
        let given = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if given != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    let depth = headers.get("depth").and_then(|v| v.to_str().ok()).unwrap_or("infinity");
    state.propfinds.lock().push(format!("{path} depth={depth}"));

    match listing {
        Some(body) => (
            StatusCode::MULTI_STATUS,
            [(CONTENT_TYPE, "application/xml; charset=utf-8")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// GitHub API

#[derive(Default)]
pub struct GithubState {
    hits: Mutex<HashMap<String, usize>>,
    pub queries: Mutex<Vec<String>>,
    /// REST calls answer 503 while set.
    pub rest_fails: AtomicBool,
    /// GraphQL calls answer 502 while set.
    pub graphql_fails: AtomicBool,
}

impl GithubState {
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().get(path).copied().unwrap_or(0)
    }

    pub fn fail_rest(&self, fail: bool) {
        self.rest_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_graphql(&self, fail: bool) {
        self.graphql_fails.store(fail, Ordering::SeqCst);
    }

    fn record(&self, path: &str) {
        *self.hits.lock().entry(path.to_string()).or_default() += 1;
    }
}

pub struct GithubFixture {
    pub base: Url,
    pub state: Arc<GithubState>,
}

impl GithubFixture {
    pub async fn start() -> Self {
        let state = Arc::new(GithubState::default());
        let app = Router::new()
            .route("/repos/{owner}/{repo}", get(gh_repo))
            .route("/repos/{owner}/{repo}/languages", get(gh_languages))
            .route("/users/{user}", get(gh_user))
            .route("/users/{user}/repos", get(gh_user_repos))
            .route("/graphql", post(gh_graphql))
            .with_state(state.clone());
        let base = spawn(app).await;
        Self { base, state }
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {TEST_TOKEN}");
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some(expected.as_str())
}

fn gate(state: &GithubState, headers: &HeaderMap, path: &str) -> Option<Response> {
    state.record(path);
    if !authorized(headers) {
        return Some((StatusCode::UNAUTHORIZED, Json(json!({ "message": "Bad credentials" }))).into_response());
    }
    if state.rest_fails.load(Ordering::SeqCst) {
        return Some((StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "message": "unavailable" }))).into_response());
    }
    None
}

pub fn repo_json(owner: &str, name: &str, stars: u64) -> Value {
    json!({
        "id": 1296269,
        "name": name,
        "full_name": format!("{owner}/{name}"),
        "description": "My first repository",
        "html_url": format!("https://github.com/{owner}/{name}"),
        "homepage": null,
        "language": "Rust",
        "topics": ["demo"],
        "stargazers_count": stars,
        "forks_count": 3,
        "license": { "key": "mit", "name": "MIT License", "spdx_id": "MIT" },
        "created_at": "2011-01-26T19:01:12Z",
        "updated_at": "2024-01-26T19:14:43Z",
        "pushed_at": "2024-01-26T19:06:43Z",
        "open_issues_count": 0,
        "default_branch": "main",
        "size": 108,
        "watchers_count": stars
    })
}

async fn gh_repo(
    State(state): State<Arc<GithubState>>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = gate(&state, &headers, &format!("/repos/{owner}/{repo}")) {
        return resp;
    }
    Json(repo_json(&owner, &repo, 80)).into_response()
}

async fn gh_languages(
    State(state): State<Arc<GithubState>>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = gate(&state, &headers, &format!("/repos/{owner}/{repo}/languages")) {
        return resp;
    }
    Json(json!({ "Rust": 3000, "Shell": 1000 })).into_response()
}

async fn gh_user(State(state): State<Arc<GithubState>>, Path(user): Path<String>, headers: HeaderMap) -> Response {
    if let Some(resp) = gate(&state, &headers, &format!("/users/{user}")) {
        return resp;
    }
    if user == "ghost" {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response();
    }
    let created = format!("{}-03-04T05:06:07Z", Utc::now().year() - 1);
    Json(json!({
        "login": user,
        "name": "The Octocat",
        "avatar_url": "https://avatars.githubusercontent.com/u/583231",
        "bio": null,
        "public_repos": 8,
        "followers": 10,
        "following": 1,
        "created_at": created,
    }))
    .into_response()
}

async fn gh_user_repos(
    State(state): State<Arc<GithubState>>,
    Path(user): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = gate(&state, &headers, &format!("/users/{user}/repos")) {
        return resp;
    }
    state.queries.lock().push(query.unwrap_or_default());
    let link = concat!(
        "<https://api.github.com/user/1/repos?per_page=2&page=3>; rel=\"next\", ",
        "<https://api.github.com/user/1/repos?per_page=2&page=5>; rel=\"last\", ",
        "<https://api.github.com/user/1/repos?per_page=2&page=1>; rel=\"first\", ",
        "<https://api.github.com/user/1/repos?per_page=2&page=1>; rel=\"prev\""
    );
    let body = json!([repo_json(&user, "alpha", 5), repo_json(&user, "beta", 2)]);
    ([(LINK, link)], Json(body)).into_response()
}

fn languages(entries: &[(&str, u64)]) -> Value {
    let edges: Vec<Value> = entries
        .iter()
        .map(|(name, size)| json!({ "size": size, "node": { "name": name } }))
        .collect();
    json!({ "edges": edges })
}

fn repo_node(name_with_owner: &str, stars: u64, forks: u64, is_fork: bool, langs: &[(&str, u64)]) -> Value {
    let owner = name_with_owner.split('/').next().unwrap_or_default();
    json!({
        "nameWithOwner": name_with_owner,
        "stargazerCount": stars,
        "forkCount": forks,
        "isFork": is_fork,
        "owner": { "login": owner },
        "languages": languages(langs),
    })
}

fn contributions(total: u64, commits: u64, repos: Vec<(Value, u64)>) -> Value {
    let by_repo: Vec<Value> = repos
        .into_iter()
        .map(|(repository, count)| json!({ "contributions": { "totalCount": count }, "repository": repository }))
        .collect();
    json!({
        "totalCommitContributions": commits,
        "totalIssueContributions": 2,
        "totalPullRequestContributions": 3,
        "totalPullRequestReviewContributions": 1,
        "contributionCalendar": {
            "totalContributions": total,
            "weeks": [{ "contributionDays": [{ "contributionCount": 4, "date": "2024-01-01" }] }]
        },
        "commitContributionsByRepository": by_repo,
    })
}

/// Repositories arrive in two pages. Contributions exist for last year and
/// this year; `rust-lang/rust` is the only contributed repository.
async fn gh_graphql(State(state): State<Arc<GithubState>>, headers: HeaderMap, Json(request): Json<Value>) -> Response {
    state.record("/graphql");
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Bad credentials" }))).into_response();
    }
    if state.graphql_fails.load(Ordering::SeqCst) {
        return (StatusCode::BAD_GATEWAY, Json(json!({ "message": "Server Error" }))).into_response();
    }

    let query = request["query"].as_str().unwrap_or_default();
    let variables = &request["variables"];

    if query.contains("contributionsCollection") {
        let year: i32 = variables["from"].as_str().unwrap_or_default()[..4].parse().unwrap_or_default();
        let rust = repo_node("rust-lang/rust", 90000, 12000, false, &[("Rust", 10000)]);
        let own = repo_node("octocat/hello", 10, 2, false, &[("Rust", 3000)]);
        let collection = if year == Utc::now().year() {
            contributions(60, 30, vec![(rust, 10)])
        } else {
            contributions(100, 40, vec![(rust, 50), (own, 20)])
        };
        return Json(json!({ "data": { "user": { "contributionsCollection": collection } } })).into_response();
    }

    let page = if variables["after"].is_null() {
        json!({
            "pageInfo": { "hasNextPage": true, "endCursor": "c1" },
            "nodes": [
                repo_node("octocat/hello", 10, 2, false, &[("Rust", 3000), ("Shell", 1000)]),
                repo_node("octocat/forked", 100, 9, true, &[("C", 50000)]),
            ]
        })
    } else {
        json!({
            "pageInfo": { "hasNextPage": false, "endCursor": null },
            "nodes": [repo_node("octocat/tools", 5, 1, false, &[("Go", 2000)])]
        })
    };
    Json(json!({ "data": { "user": { "repositories": page } } })).into_response()
}
