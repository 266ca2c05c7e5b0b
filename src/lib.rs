pub mod cache;
pub mod config;
pub mod downloader;
pub mod github;
pub mod integrity;
pub mod models;
pub mod retry;
pub mod server;
pub mod webdav;

/// Convenient re-exports of the commonly used types.
pub mod prelude {
    pub use crate::cache::{CacheKey, CacheStats, Lookup, SweeperHandle, TtlCache, DEFAULT_TTL};
    pub use crate::downloader::{BasicAuth, ChunkedDownloader, DownloadError, DownloadOptions};
    pub use crate::github::{GithubClient, GithubError, GithubService, ServiceOptions};
    pub use crate::integrity;
    pub use crate::models::{DownloadOutput, DownloadProgress, Window};
    pub use crate::retry::{Backoff, RetryPolicy};
    pub use crate::server::{self, AppState};
    pub use crate::webdav::{self, DirEntry, WebDavClient, WebDavError};
}
