//! repowatch - Local mirror of GitHub pull requests and issues
//!
//! repowatch tracks a set of GitHub repositories, periodically pulls their pull
//! requests, issues and labels into a local store, and answers filtered,
//! paginated queries across everything it has mirrored.
//!
//! ## Core Features
//!
//! - **Pluggable storage**: in-memory or SQLite-backed [`store::Store`]
//! - **Bounded concurrent sync**: a dispatcher runs per-repository cycles with a parallelism cap
//! - **Cross-repository queries**: filter by repository, state, author and label
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//! - **Authentication**: GitHub CLI and token-based authentication support
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`github`]: GitHub API integration and authentication
//! - [`store`]: Storage trait and its backends
//! - [`sync`]: Sync cycles and the job dispatcher
//! - [`query`]: Filtered listings and service status
//! - [`service`]: Facade used by the CLI and the daemon

pub mod config;
pub mod daemon;
pub mod error;
pub mod github;
pub mod models;
pub mod query;
pub mod service;
pub mod source;
pub mod store;
pub mod sync;
pub mod tracker;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Entity, Error, Result, SourceError};
pub use github::GitHubSource;
pub use models::{Issue, Label, Page, Pagination, PullRequest, Repository, User};
pub use query::{ItemFilter, ListResult, ServiceStatus};
pub use service::Service;
pub use source::Source;
pub use store::{open_store, MemoryStore, SqliteStore, Store};
pub use sync::{SyncEvent, SyncOutcome, SyncReport};
pub use tracker::{SyncStatus, SyncTracker};
