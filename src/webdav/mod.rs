// src/webdav/mod.rs

//! Read-only access to a WebDAV share: ranged downloads and directory listings.

mod listing;

pub use listing::{is_system_file, natural_cmp, parse_multistatus, DirEntry, EntryKind, PropEntry};

use std::time::Duration;

use percent_encoding::percent_decode_str;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::downloader::{BasicAuth, ChunkedDownloader, DownloadError, DownloadOptions};
use crate::models::{DownloadOutput, DownloadProgress};

const PROPFIND_BODY: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>"#,
    r#"<d:propfind xmlns:d="DAV:"><d:prop>"#,
    "<d:resourcetype/><d:getcontentlength/><d:getlastmodified/><d:getcontenttype/>",
    "</d:prop></d:propfind>",
);

#[derive(Debug, Error)]
pub enum WebDavError {
    #[error("invalid share path: {0}")]
    InvalidPath(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed directory listing: {0}")]
    Listing(#[from] quick_xml::Error),
    #[error(transparent)]
    Method(#[from] axum::http::method::InvalidMethod),
    #[error(transparent)]
    Download(#[from] DownloadError),
}

/// Client for one WebDAV share rooted at `base_url`.
#[derive(Debug, Clone)]
pub struct WebDavClient {
    base_url: Url,
    client: Client,
    credentials: Option<BasicAuth>,
    timeout: Duration,
    downloader: ChunkedDownloader,
}

impl WebDavClient {
    pub fn new(client: Client, base_url: Url, credentials: Option<BasicAuth>, mut options: DownloadOptions) -> Self {
        options.credentials = credentials.clone();
        let timeout = options.timeout;
        Self {
            base_url,
            downloader: ChunkedDownloader::new(client.clone(), options),
            client,
            credentials,
            timeout,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a share path to an absolute URL below the base path.
    ///
    /// The path may arrive raw (`/docs/a b.pdf`) or already percent-encoded
    /// (`/docs/a%20b.pdf`); both map to the same URL and existing escapes are
    /// left untouched. Dot segments are rejected in raw and encoded form.
    pub fn resource_url(&self, path: &str) -> Result<Url, WebDavError> {
        let rel = path.trim_start_matches('/');
        let invalid = || WebDavError::InvalidPath(path.to_string());
        for segment in rel.split('/') {
            let decoded = percent_decode_str(segment).decode_utf8_lossy();
            if decoded == "." || decoded == ".." || decoded.contains(|c: char| c == '/' || c == '\\') {
                return Err(invalid());
            }
        }

        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base_path}/{rel}"));
        url.set_query(None);
        url.set_fragment(None);
        if !url.path().starts_with(&format!("{base_path}/")) {
            return Err(invalid());
        }
        Ok(url)
    }

    /// Downloads a share file with ranged requests.
    pub async fn download<F>(
        &self,
        path: &str,
        token: CancellationToken,
        on_progress: F,
    ) -> Result<DownloadOutput, WebDavError>
    where
        F: FnMut(DownloadProgress),
    {
        let url = self.resource_url(path)?;
        info!(%url, "downloading from webdav");
        Ok(self.downloader.download(url, token, on_progress).await?)
    }

    /// Lists the direct children of a share directory.
    ///
    /// System files are hidden and entries come back in natural name order.
    pub async fn list(&self, path: &str) -> Result<Vec<DirEntry>, WebDavError> {
        let mut url = self.resource_url(path)?;
        if !url.path().ends_with('/') {
            let dir = format!("{}/", url.path());
            url.set_path(&dir);
        }

        let mut request = self
            .client
            .request(Method::from_bytes(b"PROPFIND")?, url.clone())
            .header("Depth", "1")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .timeout(self.timeout)
            .body(PROPFIND_BODY);
        if let Some(auth) = &self.credentials {
            request = request.basic_auth(&auth.username, auth.password.as_ref());
        }
        let body = request.send().await?.error_for_status()?.text().await?;

        let base = decode_path(self.base_url.path());
        let dir = decode_path(url.path());
        let mut entries: Vec<DirEntry> = parse_multistatus(&body)?
            .into_iter()
            .filter_map(|prop| prop.into_entry(&base, &dir))
            .filter(|entry| !is_system_file(&entry.name))
            .collect();
        entries.sort_by(|a, b| natural_cmp(&a.name, &b.name));
        debug!(%url, entries = entries.len(), "listed directory");
        Ok(entries)
    }
}

/// Percent-decoded path without its trailing slash.
fn decode_path(path: &str) -> String {
    percent_decode_str(path)
        .decode_utf8_lossy()
        .trim_end_matches('/')
        .to_string()
}

/// Last non-empty segment of a share path, percent-decoded where possible.
pub fn file_name(path: &str) -> Option<String> {
    let segment = path.split('/').rev().find(|s| !s.is_empty())?;
    Some(percent_decode_str(segment).decode_utf8_lossy().into_owned())
}
