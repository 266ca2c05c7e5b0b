use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::error::GithubError;
use super::types::GraphQlResponse;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const CLIENT_USER_AGENT: &str = "homepage-services";
const REST_ACCEPT: &str = "application/vnd.github.v3+json";

/// Successful REST response: decoded JSON plus the headers we care about.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub body: Value,
    pub link: Option<String>,
}

/// Thin GitHub REST + GraphQL client authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: Client,
    api_base: Url,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(http: Client, api_base: Url, token: Option<String>) -> Self {
        let token = token.filter(|t| !t.trim().is_empty());
        Self { http, api_base, token }
    }

    /// Builds the shared reqwest client used for GitHub calls.
    pub fn build_http(timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder()
            .user_agent(CLIENT_USER_AGENT)
            .timeout(timeout)
            .build()
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn headers(&self) -> Result<HeaderMap, GithubError> {
        let token = self.token.as_deref().ok_or(GithubError::TokenNotConfigured)?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(REST_ACCEPT));
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| GithubError::TokenNotConfigured)?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Resolves an API path such as `/users/octocat` against the API base.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, GithubError> {
        if !endpoint.starts_with('/') || endpoint.starts_with("//") {
            return Err(GithubError::InvalidEndpoint(endpoint.to_string()));
        }
        let base = self.api_base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{endpoint}"))
            .map_err(|_| GithubError::InvalidEndpoint(endpoint.to_string()))
    }

    /// `GET` a REST endpoint.
    pub async fn get(&self, endpoint: &str) -> Result<RestResponse, GithubError> {
        self.request(Method::GET, endpoint, None).await
    }

    /// Sends a REST request. `body` is only forwarded for POST, PUT and PATCH.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<RestResponse, GithubError> {
        let headers = self.headers()?;
        let url = self.endpoint_url(endpoint)?;
        debug!(%method, %url, "github rest request");

        let sends_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);
        let mut request = self.http.request(method, url).headers(headers);
        if let (true, Some(body)) = (sends_body, body) {
            request = request.header(CONTENT_TYPE, "application/json").json(body);
        }

        let resp = check_status(request.send().await?).await?;
        let link = resp
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = resp.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok(RestResponse { body, link })
    }

    /// Runs a GraphQL query and decodes `data`. GraphQL-level errors become
    /// [`GithubError::GraphQl`].
    pub async fn graphql<T, V>(&self, query: &str, variables: &V) -> Result<T, GithubError>
    where
        T: DeserializeOwned,
        V: Serialize,
    {
        let headers = self.headers()?;
        let url = self.endpoint_url("/graphql")?;
        let resp = self
            .http
            .post(url)
            .headers(headers)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let payload: GraphQlResponse<T> = serde_json::from_slice(&resp.bytes().await?)?;

        if let Some(errors) = payload.errors.filter(|e| !e.is_empty()) {
            let message = errors.into_iter().map(|e| e.message).collect::<Vec<_>>().join("; ");
            warn!(%message, "github graphql returned errors");
            return Err(GithubError::GraphQl(message));
        }
        payload
            .data
            .ok_or_else(|| GithubError::GraphQl("response carried no data".to_string()))
    }
}

/// Maps non-success responses to errors carrying upstream status and body.
async fn check_status(resp: Response) -> Result<Response, GithubError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let details = resp.json::<Value>().await.unwrap_or(Value::Null);
    let message = format!(
        "GitHub API error: {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    );
    warn!(status = status.as_u16(), %message, "github request failed");
    if status == StatusCode::UNAUTHORIZED {
        return Err(GithubError::UpstreamAuth { message, details });
    }
    Err(GithubError::Upstream { status, message, details })
}
