//! Intent coordinator: lifecycle, broadcast, and commit ingestion.

mod service;

pub use service::{ManagerService, run_broadcast};
