// src/github/mod.rs

//! GitHub profile statistics: REST/GraphQL client, aggregation and a cached
//! service used by the HTTP routes.

pub mod client;
pub mod error;
pub mod queries;
pub mod service;
pub mod stats;
pub mod types;

pub use client::{GithubClient, DEFAULT_API_BASE};
pub use error::GithubError;
pub use service::{validate_username, CacheStatus, CacheTtls, Cached, GithubService, RepoListQuery, ServiceOptions};
pub use stats::ContributionWeighting;
