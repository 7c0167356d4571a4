//! Core library for the GitPulse commit harvester.
//!
//! Holds everything with behavior shared by the three services: the
//! error taxonomy, Postgres store, Redis repository lock, RabbitMQ
//! plumbing, the GitHub client, the manager's intent lifecycle and
//! ingestion paths, the monitor's harvest pipeline, and the scout sweep.

pub mod broker;
pub mod error;
pub mod github;
pub mod lock;
pub mod manager;
pub mod monitor;
pub mod scout;
pub mod store;

pub use broker::{Broker, Publisher};
pub use error::{HarvestError, Result};
pub use github::GitHubClient;
pub use lock::{LockToken, RedisRepositoryLock, RepositoryLock};
pub use manager::ManagerService;
pub use monitor::HarvestPipeline;
pub use scout::ScoutService;
pub use store::{ManagerStore, PostgresStore};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
