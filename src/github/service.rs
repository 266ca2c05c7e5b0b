use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use futures_util::future::try_join_all;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::client::GithubClient;
use super::error::GithubError;
use super::queries;
use super::stats::{self, ContributionWeighting, TOP_LANGUAGES};
use super::types::{
    ContributionsUser, Pagination, RepositoriesUser, RepositoryDetails, RepositoryNode, RepositoryPage,
    RestRepository, UserData, UserProfile, UserStats, UserStatsSummary, YearActivity, YearTotal,
    YearlyContributions,
};
use crate::cache::{ttl, CacheKey, CacheStats, Lookup, TtlCache};

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Expired cache entry served because the upstream call failed.
    Stale,
}

impl CacheStatus {
    /// Value of the `X-Cache` response header.
    pub fn as_header(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
        }
    }
}

/// A value plus its cache provenance and lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub status: CacheStatus,
    pub ttl: Duration,
}

/// Lifetimes per resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub repository: Duration,
    pub user: Duration,
    pub user_repositories: Duration,
    /// Finished calendar years rarely change.
    pub past_year: Duration,
    pub current_year: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            repository: ttl::TWO_HOURS,
            user: ttl::TWO_HOURS,
            user_repositories: ttl::TEN_MINUTES,
            past_year: Duration::from_secs(24 * 60 * 60),
            current_year: ttl::TWO_HOURS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub ttls: CacheTtls,
    pub weighting: ContributionWeighting,
    /// Oldest calendar years beyond this many are not queried.
    pub max_years: usize,
    /// Upper bound on GraphQL repository pages (100 repositories each).
    pub max_repository_pages: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            ttls: CacheTtls::default(),
            weighting: ContributionWeighting::default(),
            max_years: 10,
            max_repository_pages: 5,
        }
    }
}

/// Query string accepted by the user repositories route.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub sort: Option<String>,
    pub direction: Option<String>,
    pub per_page: Option<u32>,
    pub page: Option<u32>,
}

struct RepoListParams {
    kind: String,
    sort: String,
    direction: String,
    per_page: u32,
    page: u32,
}

impl RepoListQuery {
    fn normalize(&self) -> RepoListParams {
        RepoListParams {
            kind: self.kind.clone().unwrap_or_else(|| "owner".to_string()),
            sort: self.sort.clone().unwrap_or_else(|| "updated".to_string()),
            direction: self.direction.clone().unwrap_or_else(|| "desc".to_string()),
            per_page: self.per_page.unwrap_or(30).clamp(1, 100),
            page: self.page.unwrap_or(1).max(1),
        }
    }
}

/// GitHub-backed profile statistics with a shared TTL cache in front.
#[derive(Debug, Clone)]
pub struct GithubService {
    client: GithubClient,
    cache: TtlCache<Value>,
    options: ServiceOptions,
}

impl GithubService {
    pub fn new(client: GithubClient, cache: TtlCache<Value>, options: ServiceOptions) -> Self {
        Self { client, cache, options }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Repository metadata and language breakdown.
    pub async fn repository(&self, owner: &str, repo: &str) -> Result<Cached<RepositoryDetails>, GithubError> {
        validate_name(owner)?;
        validate_name(repo)?;
        let key = CacheKey::repo(owner, repo);
        self.cached(key, self.options.ttls.repository, || async {
            let details_path = format!("/repos/{owner}/{repo}");
            let languages_path = format!("/repos/{owner}/{repo}/languages");
            let (details, languages) =
                tokio::join!(self.client.get(&details_path), self.client.get(&languages_path));
            let repository: RestRepository = serde_json::from_value(details?.body)?;
            let languages: BTreeMap<String, u64> = match languages {
                Ok(resp) => serde_json::from_value(resp.body).unwrap_or_default(),
                Err(e) => {
                    warn!(owner, repo, error = %e, "languages lookup failed, reporting none");
                    BTreeMap::new()
                }
            };
            Ok::<_, GithubError>(RepositoryDetails {
                repository,
                languages: stats::language_shares(&languages),
            })
        })
        .await
    }

    /// One page of a user's repositories.
    pub async fn user_repositories(
        &self,
        username: &str,
        query: &RepoListQuery,
    ) -> Result<Cached<RepositoryPage>, GithubError> {
        validate_username(username)?;
        let params = query.normalize();
        let per_page = params.per_page.to_string();
        let page = params.page.to_string();
        let key = CacheKey::user_repos(
            username,
            [
                params.kind.as_str(),
                params.sort.as_str(),
                params.direction.as_str(),
                per_page.as_str(),
                page.as_str(),
            ],
        );
        self.cached(key, self.options.ttls.user_repositories, || async {
            let qs = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("type", &params.kind)
                .append_pair("sort", &params.sort)
                .append_pair("direction", &params.direction)
                .append_pair("per_page", &per_page)
                .append_pair("page", &page)
                .finish();
            let resp = self.client.get(&format!("/users/{username}/repos?{qs}")).await?;
            let repositories: Vec<RestRepository> = serde_json::from_value(resp.body)?;
            let mut pagination = Pagination {
                current_page: params.page,
                per_page: params.per_page,
                total_count: repositories.len(),
                ..Default::default()
            };
            if let Some(link) = resp.link.as_deref() {
                stats::apply_link_header(&mut pagination, link);
            }
            Ok::<_, GithubError>(RepositoryPage { repositories, pagination })
        })
        .await
    }

    /// Profile plus aggregated statistics. When GraphQL is unavailable the
    /// profile is returned with zeroed statistics and nothing is cached.
    pub async fn user_stats(&self, username: &str) -> Result<Cached<UserStats>, GithubError> {
        validate_username(username)?;
        let key = CacheKey::user(username);
        let ttl = self.options.ttls.user;

        let stale = match self.lookup::<UserStats>(&key) {
            Lookup::Fresh(value) => return Ok(Cached { value, status: CacheStatus::Hit, ttl }),
            Lookup::Stale(value) => Some(value),
            Lookup::Absent => None,
        };

        let profile = match self.profile(username).await {
            Ok(profile) => profile,
            Err(e) => return serve_stale(stale, e, ttl),
        };

        match self.aggregate(&profile).await {
            Ok(summary) => {
                let value = UserStats { user: profile, stats: summary };
                self.store(&key, &value, ttl);
                Ok(Cached { value, status: CacheStatus::Miss, ttl })
            }
            Err(e) => {
                warn!(username, error = %e, "graphql statistics unavailable");
                if let Some(value) = stale {
                    return Ok(Cached { value, status: CacheStatus::Stale, ttl });
                }
                let value = UserStats { user: profile, stats: basic_summary(Utc::now().year()) };
                Ok(Cached { value, status: CacheStatus::Miss, ttl })
            }
        }
    }

    /// Forwards a REST call. Bodies are only sent for POST, PUT and PATCH.
    pub async fn proxy(&self, method: &str, endpoint: Option<&str>, body: Option<&Value>) -> Result<Value, GithubError> {
        let endpoint = endpoint.filter(|e| !e.is_empty()).ok_or(GithubError::MissingEndpoint)?;
        let method = match method.to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            _ => return Err(GithubError::InvalidMethod(method.to_string())),
        };
        debug!(%method, endpoint, "proxying github request");
        Ok(self.client.request(method, endpoint, body).await?.body)
    }

    async fn profile(&self, username: &str) -> Result<UserProfile, GithubError> {
        let resp = self.client.get(&format!("/users/{username}")).await.map_err(|e| match e {
            GithubError::Upstream { status: StatusCode::NOT_FOUND, .. } => GithubError::UserNotFound,
            other => other,
        })?;
        Ok(serde_json::from_value(resp.body)?)
    }

    async fn aggregate(&self, profile: &UserProfile) -> Result<UserStatsSummary, GithubError> {
        let login = profile.login.as_str();
        let now = Utc::now();
        let created_at = profile
            .created_at
            .as_deref()
            .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
            .map(|c| c.with_timezone(&Utc));
        let years = stats::contribution_years(created_at, now, self.options.max_years);

        let (repositories, activity) = tokio::try_join!(
            self.repositories(login),
            try_join_all(years.iter().map(|&year| self.year_activity(login, year, now.year()))),
        )?;

        let (total_stars, total_forks) = stats::star_and_fork_totals(login, &repositories);
        let language_stats =
            stats::language_mix(login, &repositories, &activity, self.options.weighting).top(TOP_LANGUAGES);
        let contributed_repos = stats::contributed_repositories(login, &activity).len() as u64;
        let yearly_contributions = activity
            .iter()
            .find(|a| a.contributions.year == now.year())
            .map(|a| a.contributions.clone())
            .unwrap_or_else(|| YearlyContributions::empty(now.year()));

        info!(login, years = activity.len(), repositories = repositories.len(), "aggregated user statistics");
        Ok(UserStatsSummary {
            total_stars,
            total_forks,
            total_commits: activity.iter().map(|a| a.contributions.commits).sum(),
            total_contributions: activity.iter().map(|a| a.contributions.total).sum(),
            contributed_repos,
            language_stats,
            yearly_contributions,
            contribution_history: activity
                .iter()
                .map(|a| YearTotal { year: a.contributions.year, total: a.contributions.total })
                .collect(),
        })
    }

    /// All owned repositories, following GraphQL cursors up to the page limit.
    async fn repositories(&self, login: &str) -> Result<Vec<RepositoryNode>, GithubError> {
        let mut nodes = Vec::new();
        let mut after: Option<String> = None;
        for page in 0..self.options.max_repository_pages.max(1) {
            let data: UserData<RepositoriesUser> = self
                .client
                .graphql(queries::REPOSITORIES, &json!({ "login": login, "after": after }))
                .await?;
            let user = data
                .user
                .ok_or_else(|| GithubError::GraphQl(format!("user {login} missing from response")))?;
            let connection = user.repositories;
            nodes.extend(connection.nodes);
            debug!(login, page, total = nodes.len(), "fetched repository page");
            match connection.page_info.end_cursor {
                Some(cursor) if connection.page_info.has_next_page => after = Some(cursor),
                _ => break,
            }
        }
        Ok(nodes)
    }

    async fn year_activity(&self, login: &str, year: i32, current_year: i32) -> Result<YearActivity, GithubError> {
        let ttl = if year < current_year {
            self.options.ttls.past_year
        } else {
            self.options.ttls.current_year
        };
        let cached = self
            .cached(CacheKey::user_year(login, year), ttl, || async {
                let (from, to) = stats::year_bounds(year);
                let data: UserData<ContributionsUser> = self
                    .client
                    .graphql(queries::CONTRIBUTIONS, &json!({ "login": login, "from": from, "to": to }))
                    .await?;
                let user = data
                    .user
                    .ok_or_else(|| GithubError::GraphQl(format!("user {login} missing from response")))?;
                Ok::<_, GithubError>(stats::year_activity(year, user.contributions_collection))
            })
            .await?;
        Ok(cached.value)
    }

    /// Serves `key` from cache, otherwise runs `fetch` and stores the result.
    /// Falls back to an expired entry when `fetch` fails.
    async fn cached<T, F, Fut>(&self, key: CacheKey, ttl: Duration, fetch: F) -> Result<Cached<T>, GithubError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GithubError>>,
    {
        let stale = match self.lookup::<T>(&key) {
            Lookup::Fresh(value) => {
                debug!(key = %key, "cache hit");
                return Ok(Cached { value, status: CacheStatus::Hit, ttl });
            }
            Lookup::Stale(value) => Some(value),
            Lookup::Absent => None,
        };

        match fetch().await {
            Ok(value) => {
                self.store(&key, &value, ttl);
                debug!(key = %key, "cache miss, stored fresh value");
                Ok(Cached { value, status: CacheStatus::Miss, ttl })
            }
            Err(e) => serve_stale(stale, e, ttl),
        }
    }

    fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Lookup<T> {
        let decode = |v: Value| match serde_json::from_value(v) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "discarding undecodable cache entry");
                None
            }
        };
        match self.cache.get_or_stale(key.as_str()) {
            Lookup::Fresh(v) => decode(v).map_or(Lookup::Absent, Lookup::Fresh),
            Lookup::Stale(v) => decode(v).map_or(Lookup::Absent, Lookup::Stale),
            Lookup::Absent => Lookup::Absent,
        }
    }

    fn store<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(v) => self.cache.set_with_ttl(key.clone(), v, ttl),
            Err(e) => warn!(key = %key, error = %e, "value not cacheable"),
        }
    }
}

fn serve_stale<T>(stale: Option<T>, error: GithubError, ttl: Duration) -> Result<Cached<T>, GithubError> {
    match stale {
        Some(value) if error.allows_stale_fallback() => {
            warn!(error = %error, "upstream failed, serving stale cache entry");
            Ok(Cached { value, status: CacheStatus::Stale, ttl })
        }
        _ => Err(error),
    }
}

fn basic_summary(year: i32) -> UserStatsSummary {
    UserStatsSummary {
        total_stars: 0,
        total_forks: 0,
        total_commits: 0,
        total_contributions: 0,
        contributed_repos: 0,
        language_stats: Vec::new(),
        yearly_contributions: YearlyContributions::empty(year),
        contribution_history: Vec::new(),
    }
}

/// GitHub logins: ASCII letters, digits and hyphens.
pub fn validate_username(username: &str) -> Result<(), GithubError> {
    if !username.is_empty() && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        Ok(())
    } else {
        Err(GithubError::InvalidUsername)
    }
}

fn validate_name(name: &str) -> Result<(), GithubError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(GithubError::InvalidEndpoint(name.to_string()))
    }
}
