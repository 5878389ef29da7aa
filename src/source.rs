//! Upstream data source abstraction
//!
//! The engine only talks to the outside world through [`Source`]. The GitHub
//! implementation lives in [`crate::github`]; tests substitute scripted or
//! mocked sources.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::models::{Issue, Label, PullRequest, Repository, User};

/// Repository summary as reported upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub name: String,
    pub owner: String,
    pub full_name: String,
    pub description: String,
    pub url: String,
    pub html_url: String,
    pub private: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteRepository {
    /// Convert into a freshly tracked repository record (never synced)
    pub fn into_repository(self) -> Repository {
        Repository {
            owner: self.owner,
            name: self.name,
            full_name: self.full_name,
            description: self.description,
            url: self.url,
            html_url: self.html_url,
            is_private: self.private,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_synced_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLabel {
    pub name: String,
    pub color: String,
    pub description: String,
}

impl RemoteLabel {
    pub fn to_label(&self) -> Label {
        Label {
            name: self.name.clone(),
            color: self.color.clone(),
            description: self.description.clone(),
        }
    }
}

/// A pull request as returned by a listing call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: String,
    pub url: String,
    pub html_url: String,
    pub user: User,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub labels: Vec<RemoteLabel>,
}

impl RemotePullRequest {
    pub fn to_pull_request(&self, repository_full_name: &str) -> PullRequest {
        PullRequest {
            repository_full_name: repository_full_name.to_string(),
            number: self.number,
            title: self.title.clone(),
            body: self.body.clone(),
            state: self.state.clone(),
            url: self.url.clone(),
            html_url: self.html_url.clone(),
            user: self.user.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed_at: self.closed_at,
            merged_at: self.merged_at,
        }
    }
}

/// An issue as returned by a listing call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: String,
    pub url: String,
    pub html_url: String,
    pub user: User,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub labels: Vec<RemoteLabel>,
    /// GitHub's issue feed includes pull requests; those carry this flag
    #[serde(default)]
    pub is_pull_request: bool,
}

impl RemoteIssue {
    pub fn to_issue(&self, repository_full_name: &str) -> Issue {
        Issue {
            repository_full_name: repository_full_name.to_string(),
            number: self.number,
            title: self.title.clone(),
            body: self.body.clone(),
            state: self.state.clone(),
            url: self.url.clone(),
            html_url: self.html_url.clone(),
            user: self.user.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed_at: self.closed_at,
        }
    }
}

/// Current API quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    /// Unix epoch seconds at which the quota resets
    pub reset: i64,
}

/// Listing state filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateFilter {
    Open,
    Closed,
    #[default]
    All,
}

/// Listing sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    Created,
    #[default]
    Updated,
}

/// Sort direction, shared with the query engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    #[default]
    Desc,
}

impl Direction {
    /// Anything other than an explicit `asc` means descending
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("asc") {
            Direction::Asc
        } else {
            Direction::Desc
        }
    }
}

/// Options for a single-page listing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub state: StateFilter,
    pub sort: SortKey,
    pub direction: Direction,
    pub per_page: u8,
}

impl ListOptions {
    /// Everything, most recently updated first
    pub fn recent(per_page: u8) -> Self {
        Self {
            state: StateFilter::All,
            sort: SortKey::Updated,
            direction: Direction::Desc,
            per_page,
        }
    }
}

/// Provider of repository, pull request, issue and quota data
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Source: Send + Sync {
    async fn get_repository(&self, owner: &str, name: &str)
        -> Result<RemoteRepository, SourceError>;

    /// First page of pull requests matching `options`
    async fn list_pull_requests(
        &self,
        owner: &str,
        name: &str,
        options: &ListOptions,
    ) -> Result<Vec<RemotePullRequest>, SourceError>;

    /// First page of issues matching `options`
    async fn list_issues(
        &self,
        owner: &str,
        name: &str,
        options: &ListOptions,
    ) -> Result<Vec<RemoteIssue>, SourceError>;

    async fn rate_limit(&self) -> Result<RateLimit, SourceError>;
}
