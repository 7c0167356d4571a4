use crate::error::{HarvestError, Result};
use crate::store::ManagerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gitpulse_model::{
    Author, AuthorStats, Commit, CommitsFilter, Intent, IntentError,
    IntentFilter, IntentStatus, IntentUpdate, Paginated, Pagination,
    Repository,
};
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::{FromRow, QueryBuilder};
use std::time::Duration;
use tracing::info;
use url::Url;
use uuid::Uuid;

const INTENT_COLUMNS: &str = "id, repository_name, start_date, until_date, status, is_active";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Opens the pool and brings the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(2)
            .max_lifetime(Duration::from_secs(3600))
            .idle_timeout(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("running database migrations");
        crate::MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct IntentRow {
    id: Uuid,
    repository_name: String,
    start_date: DateTime<Utc>,
    until_date: DateTime<Utc>,
    status: String,
    is_active: bool,
}

impl IntentRow {
    fn into_intent(self) -> Result<Intent> {
        let status: IntentStatus = self.status.parse()?;
        Ok(Intent {
            id: self.id,
            repository_name: self.repository_name,
            start_date: self.start_date,
            until: self.until_date,
            status,
            is_active: self.is_active,
            error: None,
        })
    }
}

#[derive(Debug, FromRow)]
struct RepositoryRow {
    id: i64,
    full_name: String,
    stargazers: i32,
    watchers: i32,
    forks: i32,
    language: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<RepositoryRow> for Repository {
    fn from(row: RepositoryRow) -> Self {
        Repository {
            id: row.id,
            full_name: row.full_name,
            stargazers: row.stargazers,
            watchers: row.watchers,
            forks: row.forks,
            language: row.language,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CommitRow {
    hash: String,
    message: String,
    url: Option<String>,
    created_at: DateTime<Utc>,
    author_id: i64,
    author_name: String,
    author_email: String,
    author_username: String,
    repo_id: i64,
    full_name: String,
    stargazers: i32,
    watchers: i32,
    forks: i32,
    language: Option<String>,
    repo_created_at: Option<DateTime<Utc>>,
    repo_updated_at: Option<DateTime<Utc>>,
}

impl From<CommitRow> for Commit {
    fn from(row: CommitRow) -> Self {
        Commit {
            hash: row.hash,
            message: row.message,
            url: row.url.and_then(|raw| Url::parse(&raw).ok()),
            created_at: row.created_at,
            author: Author {
                id: row.author_id,
                name: row.author_name,
                email: row.author_email,
                username: row.author_username,
            },
            repository: Repository {
                id: row.repo_id,
                full_name: row.full_name,
                stargazers: row.stargazers,
                watchers: row.watchers,
                forks: row.forks,
                language: row.language,
                created_at: row.repo_created_at,
                updated_at: row.repo_updated_at,
            },
        }
    }
}

fn push_intent_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &IntentFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(is_active);
    }
    if let Some(repository_name) = &filter.repository_name {
        qb.push(" AND repository_name = ")
            .push_bind(repository_name.clone());
    }
}

#[async_trait]
impl ManagerStore for PostgresStore {
    async fn save_intent(&self, intent: Intent) -> Result<Intent> {
        let row = sqlx::query_as::<_, IntentRow>(
            r#"
            INSERT INTO intents (id, repository_name, start_date, until_date, status, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, repository_name, start_date, until_date, status, is_active
            "#,
        )
        .bind(intent.id)
        .bind(&intent.repository_name)
        .bind(intent.start_date)
        .bind(intent.until)
        .bind(intent.status.as_str())
        .bind(intent.is_active)
        .fetch_one(self.pool())
        .await?;

        row.into_intent()
    }

    async fn update_intent(&self, id: Uuid, update: IntentUpdate) -> Result<Intent> {
        if update.status.is_none() && update.is_active.is_none() && update.start_date.is_none() {
            return self
                .find_intent(id)
                .await?
                .ok_or(HarvestError::IntentNotFound(id));
        }

        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("UPDATE intents SET ");
        let mut fields = qb.separated(", ");
        if let Some(status) = update.status {
            fields.push("status = ");
            fields.push_bind_unseparated(status.as_str());
        }
        if let Some(is_active) = update.is_active {
            fields.push("is_active = ");
            fields.push_bind_unseparated(is_active);
        }
        if let Some(start_date) = update.start_date {
            fields.push("start_date = ");
            fields.push_bind_unseparated(start_date);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.push(" RETURNING ").push(INTENT_COLUMNS);

        let row = qb
            .build_query_as::<IntentRow>()
            .fetch_optional(self.pool())
            .await?
            .ok_or(HarvestError::IntentNotFound(id))?;

        row.into_intent()
    }

    async fn save_intent_error(&self, error: IntentError) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO intent_errors (id, intent_id, created_at, message)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(error.id)
        .bind(error.intent_id)
        .bind(error.created_at)
        .bind(&error.message)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn find_intent(&self, id: Uuid) -> Result<Option<Intent>> {
        let row = sqlx::query_as::<_, IntentRow>(
            r#"
            SELECT id, repository_name, start_date, until_date, status, is_active
            FROM intents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.map(IntentRow::into_intent).transpose()
    }

    async fn find_intents(
        &self,
        filter: IntentFilter,
        pagination: Pagination,
    ) -> Result<Paginated<Intent>> {
        let mut count_qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM intents WHERE TRUE");
        push_intent_filter(&mut count_qb, &filter);
        let total_count: i64 = count_qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await?;

        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "SELECT {INTENT_COLUMNS} FROM intents WHERE TRUE"
        ));
        push_intent_filter(&mut qb, &filter);
        qb.push(" ORDER BY start_date DESC, id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let rows = qb
            .build_query_as::<IntentRow>()
            .fetch_all(self.pool())
            .await?;

        Ok(Paginated {
            data: rows
                .into_iter()
                .map(IntentRow::into_intent)
                .collect::<Result<Vec<_>>>()?,
            total_count,
            page: pagination.page,
            per_page: pagination.per_page,
        })
    }

    async fn save_repo(&self, repo: &Repository) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO repositories (id, full_name, stargazers, watchers, forks, language, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (full_name) DO UPDATE SET
                stargazers = EXCLUDED.stargazers,
                watchers = EXCLUDED.watchers,
                forks = EXCLUDED.forks,
                language = EXCLUDED.language,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(repo.id)
        .bind(&repo.full_name)
        .bind(repo.stargazers)
        .bind(repo.watchers)
        .bind(repo.forks)
        .bind(&repo.language)
        .bind(repo.created_at)
        .bind(repo.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_repo(&self, full_name: &str) -> Result<Option<Repository>> {
        let row = sqlx::query_as::<_, RepositoryRow>(
            r#"
            SELECT id, full_name, stargazers, watchers, forks, language, created_at, updated_at
            FROM repositories
            WHERE full_name = $1
            "#,
        )
        .bind(full_name)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(Repository::from))
    }

    async fn find_commits(
        &self,
        filter: CommitsFilter,
        pagination: Pagination,
    ) -> Result<Paginated<Commit>> {
        let total_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM commits c
            JOIN authors a ON a.id = c.author_id
            JOIN repositories r ON r.id = c.repository_id
            WHERE r.full_name = $1
              AND ($2::timestamptz IS NULL OR c.created_at >= $2)
              AND ($3::timestamptz IS NULL OR c.created_at <= $3)
              AND ($4::text IS NULL OR a.username = $4)
            "#,
        )
        .bind(&filter.repository_name)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(&filter.author_username)
        .fetch_one(self.pool())
        .await?;

        let rows = sqlx::query_as::<_, CommitRow>(
            r#"
            SELECT c.hash, c.message, c.url, c.created_at,
                   a.id AS author_id, a.name AS author_name,
                   a.email AS author_email, a.username AS author_username,
                   r.id AS repo_id, r.full_name, r.stargazers, r.watchers,
                   r.forks, r.language,
                   r.created_at AS repo_created_at, r.updated_at AS repo_updated_at
            FROM commits c
            JOIN authors a ON a.id = c.author_id
            JOIN repositories r ON r.id = c.repository_id
            WHERE r.full_name = $1
              AND ($2::timestamptz IS NULL OR c.created_at >= $2)
              AND ($3::timestamptz IS NULL OR c.created_at <= $3)
              AND ($4::text IS NULL OR a.username = $4)
            ORDER BY c.created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(&filter.repository_name)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(&filter.author_username)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(self.pool())
        .await?;

        Ok(Paginated {
            data: rows.into_iter().map(Commit::from).collect(),
            total_count,
            page: pagination.page,
            per_page: pagination.per_page,
        })
    }

    async fn top_committers(
        &self,
        full_name: &str,
        pagination: Pagination,
    ) -> Result<Paginated<AuthorStats>> {
        #[derive(FromRow)]
        struct StatsRow {
            id: i64,
            name: String,
            email: String,
            username: String,
            commit_count: i64,
        }

        let total_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT c.author_id)
            FROM commits c
            JOIN repositories r ON r.id = c.repository_id
            WHERE r.full_name = $1
            "#,
        )
        .bind(full_name)
        .fetch_one(self.pool())
        .await?;

        let rows = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT a.id, a.name, a.email, a.username, COUNT(c.hash) AS commit_count
            FROM commits c
            JOIN authors a ON a.id = c.author_id
            JOIN repositories r ON r.id = c.repository_id
            WHERE r.full_name = $1
            GROUP BY a.id, a.name, a.email, a.username
            ORDER BY commit_count DESC, a.id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(full_name)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(self.pool())
        .await?;

        let data: Vec<AuthorStats> = rows
            .into_iter()
            .map(|row| AuthorStats {
                author: Author {
                    id: row.id,
                    name: row.name,
                    email: row.email,
                    username: row.username,
                },
                commits: row.commit_count,
            })
            .collect();

        Ok(Paginated {
            data,
            total_count,
            page: pagination.page,
            per_page: pagination.per_page,
        })
    }

    async fn save_many_commits(&self, repository_id: i64, commits: &[Commit]) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        for commit in commits {
            sqlx::query(
                r#"
                INSERT INTO authors (id, name, email, username)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    email = EXCLUDED.email,
                    username = EXCLUDED.username
                "#,
            )
            .bind(commit.author.id)
            .bind(&commit.author.name)
            .bind(&commit.author.email)
            .bind(&commit.author.username)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO commits (hash, author_id, repository_id, message, url, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (hash) DO NOTHING
                "#,
            )
            .bind(&commit.hash)
            .bind(commit.author.id)
            .bind(repository_id)
            .bind(&commit.message)
            .bind(commit.url.as_ref().map(Url::as_str))
            .bind(commit.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_author(&self, author: &Author) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO authors (id, name, email, username)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                username = EXCLUDED.username
            "#,
        )
        .bind(author.id)
        .bind(&author.name)
        .bind(&author.email)
        .bind(&author.username)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
