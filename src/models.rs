//! Domain records mirrored from the upstream source.
//!
//! Every record is a plain owned value. The store hands out clones, so a
//! record obtained from a read is a snapshot and never aliases stored state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    /// `owner/name`, unique within a store
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    /// API URL
    pub url: String,
    /// Browser URL
    pub html_url: String,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Local bookkeeping: set only after a fully successful sync cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Repository {
    /// Build the `owner/name` identity string
    pub fn full_name_of(owner: &str, name: &str) -> String {
        format!("{}/{}", owner, name)
    }
}

/// Author of a pull request or issue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub repository_full_name: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: String,
    pub url: String,
    pub html_url: String,
    pub user: User,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub repository_full_name: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: String,
    pub url: String,
    pub html_url: String,
    pub user: User,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

/// A label definition. Labels are keyed by name process-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: String,
}

/// Common view over pull requests and issues used by the query engine
pub trait TrackedItem: Clone {
    fn repository_full_name(&self) -> &str;
    fn number(&self) -> u64;
    fn state(&self) -> &str;
    fn author_login(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

impl TrackedItem for PullRequest {
    fn repository_full_name(&self) -> &str {
        &self.repository_full_name
    }
    fn number(&self) -> u64 {
        self.number
    }
    fn state(&self) -> &str {
        &self.state
    }
    fn author_login(&self) -> &str {
        &self.user.login
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl TrackedItem for Issue {
    fn repository_full_name(&self) -> &str {
        &self.repository_full_name
    }
    fn number(&self) -> u64 {
        self.number
    }
    fn state(&self) -> &str {
        &self.state
    }
    fn author_login(&self) -> &str {
        &self.user.login
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// One page of a store listing plus the unpaginated total
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }

    /// No items on this page, `total` across all pages
    pub fn with_total(total: usize) -> Self {
        Self {
            items: Vec::new(),
            total,
        }
    }
}

/// Pagination descriptor returned by the query engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
}

impl Pagination {
    pub fn new(page: usize, per_page: usize, total: usize) -> Self {
        let per_page = per_page.max(1);
        Self {
            page: page.max(1),
            per_page,
            total,
            total_pages: total.div_ceil(per_page),
        }
    }

    /// Index of the first item on this page
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

/// Slice an already ordered collection into the requested 1-indexed page.
///
/// `page` and `per_page` below 1 are treated as 1. Pages past the end yield an
/// empty item list with the full total.
pub fn paginate<T, I>(items: I, page: usize, per_page: usize) -> Page<T>
where
    I: IntoIterator<Item = T>,
    I::IntoIter: ExactSizeIterator,
{
    let iter = items.into_iter();
    let total = iter.len();
    let pagination = Pagination::new(page, per_page, total);
    let items = iter
        .skip(pagination.offset())
        .take(pagination.per_page)
        .collect();
    Page { items, total }
}
