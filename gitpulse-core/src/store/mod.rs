//! Durable state owned by the manager.

mod postgres;

pub use postgres::PostgresStore;

use crate::error::Result;
use async_trait::async_trait;
use gitpulse_model::{
    Author, AuthorStats, Commit, CommitsFilter, Intent, IntentError,
    IntentFilter, IntentUpdate, Paginated, Pagination, Repository,
};
use uuid::Uuid;

/// Storage port for intents, repositories, authors, and commits.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManagerStore: Send + Sync {
    async fn save_intent(&self, intent: Intent) -> Result<Intent>;

    /// Applies the non-`None` fields of `update`; fails with
    /// `IntentNotFound` when the id is unknown.
    async fn update_intent(&self, id: Uuid, update: IntentUpdate) -> Result<Intent>;

    async fn save_intent_error(&self, error: IntentError) -> Result<()>;

    async fn find_intent(&self, id: Uuid) -> Result<Option<Intent>>;

    /// Most recent first.
    async fn find_intents(
        &self,
        filter: IntentFilter,
        pagination: Pagination,
    ) -> Result<Paginated<Intent>>;

    /// Upsert by `full_name`; refreshes counters and `updated_at`.
    async fn save_repo(&self, repo: &Repository) -> Result<()>;

    async fn get_repo(&self, full_name: &str) -> Result<Option<Repository>>;

    async fn find_commits(
        &self,
        filter: CommitsFilter,
        pagination: Pagination,
    ) -> Result<Paginated<Commit>>;

    async fn top_committers(
        &self,
        full_name: &str,
        pagination: Pagination,
    ) -> Result<Paginated<AuthorStats>>;

    /// Persists one repository group in a single transaction. Authors
    /// are upserted by id; duplicate commit hashes are silently ignored.
    async fn save_many_commits(&self, repository_id: i64, commits: &[Commit]) -> Result<()>;

    async fn save_author(&self, author: &Author) -> Result<()>;
}
