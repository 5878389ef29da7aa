//! Storage - the authoritative holder of repositories, pull requests,
//! issues and labels
//!
//! [`Store`] is the capability set every backend implements:
//! - [`MemoryStore`]: lock-guarded maps, sharded per repository
//! - [`SqliteStore`]: durable write-through adapter over rusqlite
//!
//! Reads return owned copies. Every mutation is atomic with respect to other
//! mutations and to reads.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::{bail, Result as AnyResult};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::Result;
use crate::models::{Issue, Label, Page, PullRequest, Repository};

/// Upper bound on `per_page` for every store listing
pub const MAX_PER_PAGE: usize = 1000;

/// Upper bound on repositories scanned by one cross-repository query
pub const AGGREGATE_LIMIT: usize = 1000;

/// Clamp a requested page size into `1..=MAX_PER_PAGE`
pub fn clamp_per_page(per_page: usize) -> usize {
    per_page.clamp(1, MAX_PER_PAGE)
}

/// Storage capability set shared by all backends
///
/// Pull requests and issues are addressed by the owning repository's full
/// name plus their number. Labels are global and keyed by name.
pub trait Store: Send + Sync {
    /// Insert a repository with empty child collections
    fn add_repository(&self, repo: Repository) -> Result<()>;
    fn get_repository(&self, owner: &str, name: &str) -> Result<Repository>;
    /// Replace a tracked repository wholesale
    fn update_repository(&self, repo: Repository) -> Result<()>;
    /// Remove a repository and everything scoped to it. Label definitions stay.
    fn delete_repository(&self, owner: &str, name: &str) -> Result<()>;
    /// Repositories ordered by full name
    fn list_repositories(&self, page: usize, per_page: usize) -> Result<Page<Repository>>;

    fn add_pull_request(&self, pr: PullRequest) -> Result<()>;
    fn get_pull_request(&self, full_name: &str, number: u64) -> Result<PullRequest>;
    fn update_pull_request(&self, pr: PullRequest) -> Result<()>;
    fn delete_pull_request(&self, full_name: &str, number: u64) -> Result<()>;
    /// Pull requests of one repository ordered by number
    fn list_pull_requests(
        &self,
        full_name: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Page<PullRequest>>;

    fn add_issue(&self, issue: Issue) -> Result<()>;
    fn get_issue(&self, full_name: &str, number: u64) -> Result<Issue>;
    fn update_issue(&self, issue: Issue) -> Result<()>;
    fn delete_issue(&self, full_name: &str, number: u64) -> Result<()>;
    /// Issues of one repository ordered by number
    fn list_issues(&self, full_name: &str, page: usize, per_page: usize) -> Result<Page<Issue>>;

    fn add_label(&self, label: Label) -> Result<()>;
    fn get_label(&self, name: &str) -> Result<Label>;
    fn update_label(&self, label: Label) -> Result<()>;
    /// Remove a label and every association to it
    fn delete_label(&self, name: &str) -> Result<()>;
    /// Labels ordered by name
    fn list_labels(&self, page: usize, per_page: usize) -> Result<Page<Label>>;

    /// Attach a label. Attaching twice is a no-op.
    fn add_pull_request_label(&self, full_name: &str, number: u64, label: &str) -> Result<()>;
    /// Detach a label. Detaching an absent association is a no-op.
    fn remove_pull_request_label(&self, full_name: &str, number: u64, label: &str)
        -> Result<()>;
    /// Labels attached to a pull request, in attachment order
    fn list_pull_request_labels(&self, full_name: &str, number: u64) -> Result<Vec<Label>>;

    fn add_issue_label(&self, full_name: &str, number: u64, label: &str) -> Result<()>;
    fn remove_issue_label(&self, full_name: &str, number: u64, label: &str) -> Result<()>;
    fn list_issue_labels(&self, full_name: &str, number: u64) -> Result<Vec<Label>>;
}

/// Identity string for a pull request or issue used in error messages
pub(crate) fn item_key(full_name: &str, number: u64) -> String {
    format!("{}#{}", full_name, number)
}

/// Open the backend selected by `config.backend`
pub fn open_store(config: &StorageConfig) -> AnyResult<Arc<dyn Store>> {
    match config.backend.as_str() {
        "memory" => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        "sqlite" if config.path.trim().is_empty() => Ok(Arc::new(SqliteStore::open()?)),
        "sqlite" => Ok(Arc::new(SqliteStore::open_at(PathBuf::from(&config.path))?)),
        other => bail!("Unknown storage backend: {} (expected 'memory' or 'sqlite')", other),
    }
}
