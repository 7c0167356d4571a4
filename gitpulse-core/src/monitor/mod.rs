//! Harvester: consumes intent commands, fetches commit and repository
//! data under a per-repository lock, and republishes it in batches.

mod pipeline;

pub use pipeline::{
    BATCH_SIZE, HarvestPipeline, commits_resolver, repo_info_resolver,
};
