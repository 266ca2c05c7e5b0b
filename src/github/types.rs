//! Wire types: upstream GitHub payloads on one side, the shapes served by our
//! routes on the other.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Repository license as reported by the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub key: String,
    pub name: String,
    pub spdx_id: Option<String>,
}

/// Subset of the REST repository object we pass through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestRepository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub html_url: String,
    pub homepage: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub stargazers_count: u64,
    pub forks_count: u64,
    pub license: Option<License>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub pushed_at: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub private: bool,
    pub open_issues_count: u64,
    pub default_branch: Option<String>,
    pub size: u64,
    pub watchers_count: u64,
}

/// One language of a repository with its share of the code base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageShare {
    pub name: String,
    pub bytes: u64,
    /// Percentage with one decimal, e.g. `"42.5"`.
    pub percentage: String,
}

/// Response of `GET /api/github/repos/{owner}/{repo}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDetails {
    #[serde(flatten)]
    pub repository: RestRepository,
    pub languages: Vec<LanguageShare>,
}

/// Pagination derived from the request and the upstream `Link` header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: u32,
    pub per_page: u32,
    pub total_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<u32>,
}

/// Response of `GET /api/github/users/{username}/repos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryPage {
    pub repositories: Vec<RestRepository>,
    pub pagination: Pagination,
}

/// Public profile fields of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    #[serde(default)]
    pub public_repos: u64,
    #[serde(default)]
    pub public_gists: u64,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub following: u64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Aggregated language usage across a user's repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageStat {
    pub language: String,
    /// Weighted byte count.
    pub count: u64,
    /// Percentage rounded to two decimals.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionDay {
    pub contribution_count: u32,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionWeek {
    pub contribution_days: Vec<ContributionDay>,
}

/// Contribution breakdown for one calendar year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyContributions {
    pub year: i32,
    pub total: u64,
    pub commits: u64,
    pub issues: u64,
    pub pull_requests: u64,
    pub reviews: u64,
    pub weeks: Vec<ContributionWeek>,
}

impl YearlyContributions {
    pub fn empty(year: i32) -> Self {
        Self {
            year,
            total: 0,
            commits: 0,
            issues: 0,
            pull_requests: 0,
            reviews: 0,
            weeks: Vec::new(),
        }
    }
}

/// Per-year total for the contribution history chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearTotal {
    pub year: i32,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatsSummary {
    pub total_stars: u64,
    pub total_forks: u64,
    pub total_commits: u64,
    pub total_contributions: u64,
    pub contributed_repos: u64,
    pub language_stats: Vec<LanguageStat>,
    pub yearly_contributions: YearlyContributions,
    pub contribution_history: Vec<YearTotal>,
}

/// Response of `GET /api/github/users/{username}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user: UserProfile,
    pub stats: UserStatsSummary,
}

/// Body of `POST /api/github`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRequest {
    pub endpoint: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

// GraphQL payloads.

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    pub errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserData<T> {
    pub user: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanguageNode {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanguageEdge {
    pub size: u64,
    pub node: LanguageNode,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanguageConnection {
    #[serde(default)]
    pub edges: Vec<LanguageEdge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryNode {
    pub name_with_owner: String,
    #[serde(default)]
    pub stargazer_count: u64,
    #[serde(default)]
    pub fork_count: u64,
    #[serde(default)]
    pub is_fork: bool,
    pub owner: Owner,
    #[serde(default)]
    pub languages: Option<LanguageConnection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConnection {
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
    #[serde(default)]
    pub nodes: Vec<RepositoryNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoriesUser {
    pub repositories: RepositoryConnection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionCalendar {
    pub total_contributions: u64,
    #[serde(default)]
    pub weeks: Vec<ContributionWeek>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionCount {
    pub total_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitContributions {
    pub repository: RepositoryNode,
    pub contributions: ContributionCount,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionsCollection {
    pub total_commit_contributions: u64,
    pub total_issue_contributions: u64,
    pub total_pull_request_contributions: u64,
    pub total_pull_request_review_contributions: u64,
    #[serde(default)]
    pub total_repositories_with_contributed_commits: u64,
    pub contribution_calendar: ContributionCalendar,
    #[serde(default)]
    pub commit_contributions_by_repository: Vec<CommitContributions>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionsUser {
    pub contributions_collection: ContributionsCollection,
}

/// One calendar year of contributions, as cached per `user-year` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearActivity {
    pub contributions: YearlyContributions,
    /// Commit counts per contributed repository, with its languages.
    pub repositories: Vec<RepositoryCommits>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryCommits {
    pub name_with_owner: String,
    pub owner: String,
    pub is_fork: bool,
    pub commits: u64,
    pub languages: Vec<(String, u64)>,
}
