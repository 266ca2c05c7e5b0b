//! Pure aggregation over GitHub payloads. No I/O here.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Utc};

use super::types::{
    ContributionsCollection, LanguageShare, LanguageStat, Pagination, RepositoryCommits, RepositoryNode,
    YearActivity, YearlyContributions,
};

/// Number of languages reported in user stats.
pub const TOP_LANGUAGES: usize = 8;

/// How much of a contributed (non-owned) repository's language bytes count
/// toward a user's language mix. The weight is a heuristic, not a contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContributionWeighting {
    /// Weight gained per commit.
    pub per_commit: f64,
    /// Upper bound on the weight.
    pub cap: f64,
}

impl Default for ContributionWeighting {
    fn default() -> Self {
        Self {
            per_commit: 0.01,
            cap: 0.8,
        }
    }
}

impl ContributionWeighting {
    pub fn weight(&self, commits: u64) -> f64 {
        (commits as f64 * self.per_commit).clamp(0.0, self.cap)
    }
}

/// Summarises a `/languages` map into shares sorted by size, largest first.
pub fn language_shares(languages: &BTreeMap<String, u64>) -> Vec<LanguageShare> {
    let total: u64 = languages.values().sum();
    let mut shares: Vec<LanguageShare> = languages
        .iter()
        .map(|(name, &bytes)| LanguageShare {
            name: name.clone(),
            bytes,
            percentage: if total > 0 {
                format!("{:.1}", bytes as f64 / total as f64 * 100.0)
            } else {
                "0".to_string()
            },
        })
        .collect();
    shares.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.name.cmp(&b.name)));
    shares
}

/// Weighted language byte totals.
#[derive(Debug, Default, Clone)]
pub struct LanguageTally {
    sizes: HashMap<String, f64>,
}

impl LanguageTally {
    pub fn add(&mut self, language: &str, bytes: u64, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        *self.sizes.entry(language.to_string()).or_default() += bytes as f64 * weight;
    }

    /// Top `limit` languages by weighted size with two-decimal percentages.
    pub fn top(&self, limit: usize) -> Vec<LanguageStat> {
        let total: f64 = self.sizes.values().sum();
        let mut stats: Vec<LanguageStat> = self
            .sizes
            .iter()
            .map(|(language, &size)| LanguageStat {
                language: language.clone(),
                count: size.round() as u64,
                percentage: if total > 0.0 {
                    (size / total * 100.0 * 100.0).round() / 100.0
                } else {
                    0.0
                },
            })
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.language.cmp(&b.language)));
        stats.truncate(limit);
        stats
    }
}

/// Repositories the user owns and did not fork.
pub fn own_repositories<'a>(
    login: &'a str,
    repos: &'a [RepositoryNode],
) -> impl Iterator<Item = &'a RepositoryNode> + 'a {
    repos
        .iter()
        .filter(move |r| !r.is_fork && r.owner.login.eq_ignore_ascii_case(login))
}

/// Stars and forks summed over owned repositories.
pub fn star_and_fork_totals(login: &str, repos: &[RepositoryNode]) -> (u64, u64) {
    own_repositories(login, repos).fold((0, 0), |(stars, forks), r| {
        (stars + r.stargazer_count, forks + r.fork_count)
    })
}

/// Combines owned repositories (full weight) with contributed repositories
/// (weighted by commit count summed across years).
pub fn language_mix(
    login: &str,
    owned: &[RepositoryNode],
    years: &[YearActivity],
    weighting: ContributionWeighting,
) -> LanguageTally {
    let mut tally = LanguageTally::default();
    for repo in own_repositories(login, owned) {
        if let Some(langs) = &repo.languages {
            for edge in &langs.edges {
                tally.add(&edge.node.name, edge.size, 1.0);
            }
        }
    }

    for repo in contributed_repositories(login, years).values() {
        let weight = weighting.weight(repo.commits);
        for (language, bytes) in &repo.languages {
            tally.add(language, *bytes, weight);
        }
    }
    tally
}

/// Non-owned, non-fork repositories the user committed to, merged across years.
pub fn contributed_repositories(login: &str, years: &[YearActivity]) -> BTreeMap<String, RepositoryCommits> {
    let mut merged: BTreeMap<String, RepositoryCommits> = BTreeMap::new();
    for year in years {
        for repo in &year.repositories {
            if repo.is_fork || repo.owner.eq_ignore_ascii_case(login) {
                continue;
            }
            merged
                .entry(repo.name_with_owner.clone())
                .and_modify(|r| r.commits += repo.commits)
                .or_insert_with(|| repo.clone());
        }
    }
    merged
}

/// Flattens one year's `contributionsCollection`.
pub fn year_activity(year: i32, collection: ContributionsCollection) -> YearActivity {
    let repositories = collection
        .commit_contributions_by_repository
        .into_iter()
        .map(|c| RepositoryCommits {
            name_with_owner: c.repository.name_with_owner,
            owner: c.repository.owner.login,
            is_fork: c.repository.is_fork,
            commits: c.contributions.total_count,
            languages: c
                .repository
                .languages
                .map(|l| l.edges.into_iter().map(|e| (e.node.name, e.size)).collect())
                .unwrap_or_default(),
        })
        .collect();
    YearActivity {
        contributions: YearlyContributions {
            year,
            total: collection.contribution_calendar.total_contributions,
            commits: collection.total_commit_contributions,
            issues: collection.total_issue_contributions,
            pull_requests: collection.total_pull_request_contributions,
            reviews: collection.total_pull_request_review_contributions,
            weeks: collection.contribution_calendar.weeks,
        },
        repositories,
    }
}

/// Calendar years from account creation through `now`, oldest first, at most `max_years`
/// (the most recent ones are kept).
pub fn contribution_years(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>, max_years: usize) -> Vec<i32> {
    let current = now.year();
    let first = created_at.map(|c| c.year()).unwrap_or(current).min(current);
    let span = (current - first + 1) as usize;
    let skip = span.saturating_sub(max_years.max(1));
    (first..=current).skip(skip).collect()
}

/// Inclusive bounds of a calendar year in the form GraphQL's `DateTime` expects.
/// GitHub rejects collection spans longer than one year.
pub fn year_bounds(year: i32) -> (String, String) {
    (format!("{year}-01-01T00:00:00Z"), format!("{year}-12-31T23:59:59Z"))
}

/// Fills pagination links from a `Link` header such as
/// `<https://api.github.com/user/1/repos?page=2>; rel="next", ...`.
pub fn apply_link_header(pagination: &mut Pagination, link: &str) {
    for part in link.split(',') {
        let mut pieces = part.split(';');
        let Some(target) = pieces.next() else { continue };
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        let Some(rel) = pieces
            .filter_map(|p| p.trim().strip_prefix("rel="))
            .map(|r| r.trim_matches('"'))
            .next()
        else {
            continue;
        };
        let page = url::Url::parse(target).ok().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "page")
                .and_then(|(_, v)| v.parse::<u32>().ok())
        });
        let Some(page) = page else { continue };
        match rel {
            "first" => pagination.first = Some(page),
            "prev" => pagination.prev = Some(page),
            "next" => pagination.next = Some(page),
            "last" => pagination.last = Some(page),
            _ => {}
        }
    }
}
