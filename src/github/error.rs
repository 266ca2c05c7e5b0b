use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("GitHub token not configured")]
    TokenNotConfigured,
    #[error("GitHub rejected the token: {message}")]
    UpstreamAuth { message: String, details: Value },
    /// Non-success upstream response, rate limiting included.
    #[error("{message}")]
    Upstream {
        status: StatusCode,
        message: String,
        details: Value,
    },
    #[error("Invalid username format")]
    InvalidUsername,
    #[error("User not found")]
    UserNotFound,
    #[error("Missing endpoint parameter")]
    MissingEndpoint,
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Unsupported method: {0}")]
    InvalidMethod(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid upstream payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("GraphQL error: {0}")]
    GraphQl(String),
}

impl GithubError {
    /// HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            GithubError::TokenNotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            GithubError::UpstreamAuth { .. } => StatusCode::UNAUTHORIZED,
            GithubError::Upstream { status, .. } => *status,
            GithubError::InvalidUsername
            | GithubError::MissingEndpoint
            | GithubError::InvalidEndpoint(_)
            | GithubError::InvalidMethod(_) => StatusCode::BAD_REQUEST,
            GithubError::UserNotFound => StatusCode::NOT_FOUND,
            GithubError::Network(_) => StatusCode::BAD_GATEWAY,
            GithubError::Decode(_) | GithubError::GraphQl(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Upstream JSON attached to the error, if any.
    pub fn details(&self) -> Option<&Value> {
        match self {
            GithubError::UpstreamAuth { details, .. } | GithubError::Upstream { details, .. } => {
                Some(details).filter(|d| !d.is_null())
            }
            _ => None,
        }
    }

    /// Whether a stale cached value may stand in for this failure.
    pub fn allows_stale_fallback(&self) -> bool {
        matches!(
            self,
            GithubError::Upstream { .. } | GithubError::Network(_) | GithubError::Decode(_) | GithubError::GraphQl(_)
        )
    }
}
