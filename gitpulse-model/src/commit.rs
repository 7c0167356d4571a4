use chrono::{DateTime, Utc};
use url::Url;

/// Remote repository metadata as reported by the hosting API.
///
/// Upserted by `full_name`; the mutable counters and `updated_at`
/// advance with each refresh.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Repository {
    pub id: i64,
    pub full_name: String,
    #[cfg_attr(feature = "serde", serde(rename = "stargazers_count"))]
    pub stargazers: i32,
    #[cfg_attr(feature = "serde", serde(rename = "watchers_count"))]
    pub watchers: i32,
    pub forks: i32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub language: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub created_at: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A commit author, keyed by the hosting platform's account id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub username: String,
}

/// A single harvested commit. Immutable once stored; the hash is the
/// global idempotence boundary.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Commit {
    pub hash: String,
    pub author: Author,
    pub message: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub url: Option<Url>,
    pub created_at: DateTime<Utc>,
    // Capitalized on the wire; deployed consumers expect it.
    #[cfg_attr(feature = "serde", serde(rename = "Repository"))]
    pub repository: Repository,
}

/// Author plus commit count, for the committers listing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AuthorStats {
    pub author: Author,
    pub commits: i64,
}

/// One page of stored commits.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CommitPage {
    pub commits: Vec<Commit>,
    pub total_count: i64,
    pub page: u32,
    pub per_page: u32,
}

/// Stored-commit query filter.
#[derive(Debug, Clone, Default)]
pub struct CommitsFilter {
    pub repository_name: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub author_username: Option<String>,
}
