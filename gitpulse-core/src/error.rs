use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error(transparent)]
    Model(#[from] gitpulse_model::ModelError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("remote API error: {0}")]
    Remote(#[from] reqwest::Error),

    #[error("intent {0} not found")]
    IntentNotFound(Uuid),

    #[error("repository {0} not found")]
    RepositoryNotFound(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
