// src/config.rs

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::downloader::BasicAuth;
use crate::github::DEFAULT_API_BASE;

/// Homepage backend: GitHub statistics proxy and WebDAV file downloads.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server.
    Serve(ServeArgs),
    /// Download one file from the WebDAV share.
    Fetch(FetchArgs),
}

#[derive(Debug, Clone, Args)]
pub struct GithubArgs {
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    #[arg(long, env = "GITHUB_API_BASE", default_value = DEFAULT_API_BASE)]
    pub github_api_base: Url,

    /// Per-request timeout for GitHub calls, in seconds.
    #[arg(long, env = "GITHUB_TIMEOUT_SECS", default_value_t = 30)]
    pub github_timeout_secs: u64,
}

impl GithubArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.github_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Args)]
pub struct WebDavArgs {
    #[arg(long, env = "WEBDAV_BASE_URL")]
    pub webdav_base_url: Option<Url>,

    #[arg(long, env = "WEBDAV_USERNAME")]
    pub webdav_username: Option<String>,

    #[arg(long, env = "WEBDAV_PASSWORD", hide_env_values = true)]
    pub webdav_password: Option<String>,

    /// Size of each ranged request in bytes.
    #[arg(long, env = "DOWNLOAD_WINDOW_SIZE", default_value_t = crate::models::DEFAULT_WINDOW_SIZE)]
    pub window_size: u64,

    /// Per-request timeout for WebDAV calls, in seconds.
    #[arg(long, env = "WEBDAV_TIMEOUT_SECS", default_value_t = 30)]
    pub webdav_timeout_secs: u64,
}

impl WebDavArgs {
    pub fn credentials(&self) -> Option<BasicAuth> {
        self.webdav_username.as_ref().map(|username| BasicAuth {
            username: username.clone(),
            password: self.webdav_password.clone(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.webdav_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    pub listen_addr: SocketAddr,

    /// Seconds between expired cache entry sweeps.
    #[arg(long, env = "CACHE_SWEEP_SECS", default_value_t = 30 * 60)]
    pub cache_sweep_secs: u64,

    #[command(flatten)]
    pub github: GithubArgs,

    #[command(flatten)]
    pub webdav: WebDavArgs,
}

impl ServeArgs {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs.max(1))
    }
}

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// Path on the share, e.g. `/docs/cv.pdf`.
    pub path: String,

    /// Output file; defaults to the last path segment.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Expected SHA-256 of the file (hex).
    #[arg(long)]
    pub sha256: Option<String>,

    #[command(flatten)]
    pub webdav: WebDavArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_with_defaults() {
        let cli = Cli::try_parse_from(["homepage", "serve", "--github-token", "abc"]).unwrap();
        let Command::Serve(args) = cli.command else { panic!("expected serve") };
        assert_eq!(args.listen_addr, "127.0.0.1:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(args.sweep_interval(), Duration::from_secs(1800));
        assert_eq!(args.github.github_token.as_deref(), Some("abc"));
        assert_eq!(args.webdav.window_size, 1024 * 1024);
    }

    #[test]
    fn github_and_webdav_timeouts_are_independent() {
        let cli = Cli::try_parse_from([
            "homepage",
            "serve",
            "--github-timeout-secs",
            "5",
            "--webdav-timeout-secs",
            "120",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else { panic!("expected serve") };
        assert_eq!(args.github.timeout(), Duration::from_secs(5));
        assert_eq!(args.webdav.timeout(), Duration::from_secs(120));
    }

    #[test]
    fn parses_fetch_with_credentials() {
        let cli = Cli::try_parse_from([
            "homepage",
            "-v",
            "fetch",
            "/docs/cv.pdf",
            "-o",
            "cv.pdf",
            "--webdav-base-url",
            "https://files.example.com/dav/",
            "--webdav-username",
            "me",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Fetch(args) = cli.command else { panic!("expected fetch") };
        assert_eq!(args.path, "/docs/cv.pdf");
        assert_eq!(args.output, Some(PathBuf::from("cv.pdf")));
        let auth = args.webdav.credentials().unwrap();
        assert_eq!(auth.username, "me");
    }
}
