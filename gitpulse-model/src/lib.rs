//! Core data model definitions shared across GitPulse crates.

pub mod commit;
pub mod error;
pub mod intent;
pub mod page;
pub mod repo;

pub use commit::{
    Author, AuthorStats, Commit, CommitPage, CommitsFilter, Repository,
};
pub use error::{ModelError, Result as ModelResult};
pub use intent::{
    Intent, IntentError, IntentFilter, IntentStatus, IntentUpdate,
    validate_start_date,
};
pub use page::{Paginated, Pagination};
pub use repo::RepoName;
