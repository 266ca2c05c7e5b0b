// src/main.rs

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use homepage_services::config::{Cli, Command, FetchArgs, ServeArgs, WebDavArgs};
use homepage_services::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Fetch(args) => fetch(args).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info,tower_http=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn webdav_client(args: &WebDavArgs) -> Result<Option<WebDavClient>> {
    let Some(base_url) = args.webdav_base_url.clone() else {
        return Ok(None);
    };
    let http = reqwest::Client::builder().build().context("building file client")?;
    let options = DownloadOptions {
        window_size: args.window_size.max(1),
        timeout: args.timeout(),
        ..DownloadOptions::default()
    };
    Ok(Some(WebDavClient::new(http, base_url, args.credentials(), options)))
}

async fn serve(args: ServeArgs) -> Result<()> {
    let http = GithubClient::build_http(args.github.timeout()).context("building github client")?;
    let client = GithubClient::new(http, args.github.github_api_base.clone(), args.github.github_token.clone());
    if !client.has_token() {
        warn!("GITHUB_TOKEN is not set; GitHub routes will fail");
    }

    let cache = TtlCache::new(DEFAULT_TTL);
    let sweeper = cache.start_sweeper(args.sweep_interval());
    let github = GithubService::new(client, cache, ServiceOptions::default());

    let files = webdav_client(&args.webdav)?;
    if files.is_none() {
        warn!("WEBDAV_BASE_URL is not set; file routes are disabled");
    }

    let listener = tokio::net::TcpListener::bind(args.listen_addr)
        .await
        .with_context(|| format!("binding {}", args.listen_addr))?;
    server::serve(listener, AppState::new(github, files), shutdown_signal()).await?;

    sweeper.stop().await;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn fetch(args: FetchArgs) -> Result<()> {
    let Some(client) = webdav_client(&args.webdav)? else {
        bail!("WEBDAV_BASE_URL is required for fetch");
    };
    let output = match args.output.clone() {
        Some(path) => path,
        None => PathBuf::from(webdav::file_name(&args.path).context("path has no file name")?),
    };

    if let Some(expected) = args.sha256.as_deref() {
        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            let existing = integrity::sha256_sum(&output).await?;
            if existing.eq_ignore_ascii_case(expected.trim()) {
                info!(path = %output.display(), "file already present with matching checksum");
                return Ok(());
            }
        }
    }

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancelling download");
            ctrl_c.cancel();
        }
    });

    let mut last_logged = -10.0;
    let downloaded = client
        .download(&args.path, token, |p| {
            if p.percent - last_logged >= 10.0 || p.percent >= 100.0 {
                last_logged = p.percent;
                info!(percent = %format_args!("{:.1}", p.percent), received = p.received_bytes, total = p.total_size, "progress");
            }
        })
        .await?;

    if let Some(expected) = args.sha256.as_deref() {
        integrity::verify_sha256(&downloaded.bytes, expected)?;
        info!("checksum verified");
    }

    tokio::fs::write(&output, &downloaded.bytes)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    info!(path = %output.display(), size = downloaded.total_size, "saved");
    Ok(())
}
