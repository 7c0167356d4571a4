//! Minimal GitHub REST v3 client for the two harvest fetches: one
//! repository metadata read and the paginated commit listing.

use crate::error::Result;
use chrono::{DateTime, Utc};
use gitpulse_model::{Author, Commit, RepoName, Repository};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use url::Url;

pub const COMMITS_PER_PAGE: u32 = 100;

/// Author id used when a commit's git signature cannot be resolved to a
/// hosting-platform account.
pub const UNATTRIBUTED_AUTHOR_ID: i64 = 0;

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: Url,
}

impl GitHubClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(token, "https://api.github.com")
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("gitpulse-monitor"));
        if !token.is_empty() {
            let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| crate::HarvestError::Internal(format!("bad API token: {e}")))?;
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let base_url = Url::parse(base_url)
            .map_err(|e| crate::HarvestError::Internal(format!("bad API base url: {e}")))?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| crate::HarvestError::Internal(format!("bad API path {path:?}: {e}")))
    }

    /// Fetches current repository metadata.
    pub async fn get_repository(&self, repo: &RepoName) -> Result<Repository> {
        let url = self.endpoint(&format!("repos/{}/{}", repo.owner(), repo.name()))?;
        let dto: RepositoryDto = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(dto.into_repository())
    }

    /// Fetches one page (1-based) of commits since `from`, newest first.
    /// A short or empty page means the listing is exhausted.
    pub async fn list_commits(
        &self,
        repo: &RepoName,
        from: DateTime<Utc>,
        page: u32,
    ) -> Result<Vec<Commit>> {
        let url = self.endpoint(&format!("repos/{}/{}/commits", repo.owner(), repo.name()))?;
        let dtos: Vec<CommitDto> = self
            .http
            .get(url)
            .query(&[
                ("since", from.to_rfc3339()),
                ("per_page", COMMITS_PER_PAGE.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(dtos
            .into_iter()
            .map(|dto| dto.into_commit(&repo.full_name()))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryDto {
    id: i64,
    full_name: String,
    #[serde(default)]
    stargazers_count: i32,
    #[serde(default)]
    watchers_count: i32,
    #[serde(default)]
    forks_count: i32,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl RepositoryDto {
    fn into_repository(self) -> Repository {
        Repository {
            id: self.id,
            full_name: self.full_name,
            stargazers: self.stargazers_count,
            watchers: self.watchers_count,
            forks: self.forks_count,
            language: self.language,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitDto {
    sha: String,
    #[serde(default)]
    html_url: Option<Url>,
    commit: GitCommitDto,
    /// The linked hosting account; absent when the signature email does
    /// not match any account.
    #[serde(default)]
    author: Option<AccountDto>,
}

#[derive(Debug, Deserialize)]
struct GitCommitDto {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<SignatureDto>,
}

#[derive(Debug, Deserialize)]
struct SignatureDto {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AccountDto {
    id: i64,
    login: String,
}

impl CommitDto {
    fn into_commit(self, repo_full_name: &str) -> Commit {
        let signature = self.commit.author.unwrap_or(SignatureDto {
            name: String::new(),
            email: String::new(),
            date: None,
        });
        let (author_id, username) = match self.author {
            Some(account) => (account.id, account.login),
            None => (UNATTRIBUTED_AUTHOR_ID, String::new()),
        };

        Commit {
            hash: self.sha,
            author: Author {
                id: author_id,
                name: signature.name,
                email: signature.email,
                username,
            },
            message: self.commit.message,
            url: self.html_url,
            created_at: signature.date.unwrap_or_else(Utc::now),
            repository: Repository {
                full_name: repo_full_name.to_owned(),
                ..Repository::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_listing_item_with_linked_account() {
        let dto: CommitDto = serde_json::from_value(serde_json::json!({
            "sha": "7fd1a60b01f91b314f59955a4e4d4e80d8edf11d",
            "html_url": "https://github.com/octocat/hello-world/commit/7fd1a60b",
            "commit": {
                "message": "Merge pull request #6",
                "author": {
                    "name": "The Octocat",
                    "email": "octocat@nowhere.com",
                    "date": "2012-03-06T23:06:50Z"
                }
            },
            "author": { "id": 583231, "login": "octocat" }
        }))
        .unwrap();

        let commit = dto.into_commit("octocat/hello-world");
        assert_eq!(commit.hash, "7fd1a60b01f91b314f59955a4e4d4e80d8edf11d");
        assert_eq!(commit.author.id, 583231);
        assert_eq!(commit.author.username, "octocat");
        assert_eq!(commit.author.email, "octocat@nowhere.com");
        assert_eq!(commit.repository.full_name, "octocat/hello-world");
        assert!(commit.url.is_some());
    }

    #[test]
    fn unlinked_signature_folds_into_unattributed_author() {
        let dto: CommitDto = serde_json::from_value(serde_json::json!({
            "sha": "abc",
            "commit": {
                "message": "drive-by patch",
                "author": {
                    "name": "Anon",
                    "email": "anon@localhost",
                    "date": "2020-01-01T00:00:00Z"
                }
            },
            "author": null
        }))
        .unwrap();

        let commit = dto.into_commit("octocat/hello-world");
        assert_eq!(commit.author.id, UNATTRIBUTED_AUTHOR_ID);
        assert_eq!(commit.author.name, "Anon");
        assert!(commit.author.username.is_empty());
    }

    #[test]
    fn maps_repository_metadata() {
        let dto: RepositoryDto = serde_json::from_value(serde_json::json!({
            "id": 1296269,
            "full_name": "octocat/hello-world",
            "stargazers_count": 80,
            "watchers_count": 80,
            "forks_count": 9,
            "language": "C",
            "created_at": "2011-01-26T19:01:12Z",
            "updated_at": "2011-01-26T19:14:43Z"
        }))
        .unwrap();

        let repo = dto.into_repository();
        assert_eq!(repo.id, 1296269);
        assert_eq!(repo.stargazers, 80);
        assert_eq!(repo.language.as_deref(), Some("C"));
    }
}
