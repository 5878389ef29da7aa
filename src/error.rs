//! Error types for the repowatch engine.
//!
//! [`Error`] is the single error type returned by the store, query engine and
//! service layers. Failures reported by the external data source are carried
//! as [`SourceError`] inside [`Error::Upstream`].

use std::fmt;
use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Repository,
    PullRequest,
    Issue,
    Label,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Repository => write!(f, "repository"),
            Entity::PullRequest => write!(f, "pull request"),
            Entity::Issue => write!(f, "issue"),
            Entity::Label => write!(f, "label"),
        }
    }
}

/// Engine-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// The addressed record does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: Entity, key: String },

    /// A record with the same identity is already stored.
    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: Entity, key: String },

    /// A repository scope string was not in `owner/name` form.
    #[error("invalid repository name '{0}', expected owner/name")]
    InvalidName(String),

    /// The external data source failed.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] SourceError),

    /// The durable backing store failed to apply a write or read.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl Error {
    pub fn not_found(entity: Entity, key: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn already_exists(entity: Entity, key: impl Into<String>) -> Self {
        Error::AlreadyExists {
            entity,
            key: key.into(),
        }
    }

    /// True for [`Error::NotFound`] of any entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

/// Errors reported by a [`crate::source::Source`] implementation.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The repository (or endpoint) does not exist upstream.
    #[error("not found upstream: {0}")]
    NotFound(String),

    /// Credentials are missing or were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The API answered with a non-success status.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Network, TLS or decoding failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Split an `owner/name` string into its two non-empty parts.
pub fn split_full_name(full_name: &str) -> Result<(&str, &str)> {
    let mut parts = full_name.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner, name))
        }
        _ => Err(Error::InvalidName(full_name.to_string())),
    }
}
