//! Filtered, sorted, paginated views across tracked repositories

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::error::{split_full_name, Result};
use crate::models::{paginate, Issue, Label, Page, Pagination, PullRequest, TrackedItem};
use crate::source::{Direction, Source};
use crate::store::{clamp_per_page, Store, AGGREGATE_LIMIT, MAX_PER_PAGE};
use crate::tracker::SyncTracker;

/// Filter for pull request and issue listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFilter {
    /// Restrict to one `owner/name`
    pub repo: Option<String>,
    /// Case-insensitive exact match
    pub state: Option<String>,
    /// Author login, case-insensitive exact match
    pub author: Option<String>,
    /// Attached label name, case-insensitive exact match
    pub label: Option<String>,
    pub page: usize,
    pub per_page: usize,
    /// Order by creation time
    pub direction: Direction,
    /// Accepted for forward compatibility; not applied
    pub since: Option<DateTime<Utc>>,
}

impl Default for ItemFilter {
    fn default() -> Self {
        Self {
            repo: None,
            state: None,
            author: None,
            label: None,
            page: 1,
            per_page: 30,
            direction: Direction::Desc,
            since: None,
        }
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListResult<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepositoryCounts {
    pub total: usize,
    pub syncing: usize,
    pub errored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// Aggregate engine status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub repositories: RepositoryCounts,
    /// Most recent successful sync; the Unix epoch when nothing has synced
    pub last_sync: DateTime<Utc>,
    pub rate_limit: RateLimitStatus,
}

/// Read side of the engine
pub struct QueryEngine {
    store: Arc<dyn Store>,
    tracker: Arc<SyncTracker>,
    source: Arc<dyn Source>,
    started_at: Instant,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn Store>, tracker: Arc<SyncTracker>, source: Arc<dyn Source>) -> Self {
        Self {
            store,
            tracker,
            source,
            started_at: Instant::now(),
        }
    }

    pub fn list_pull_requests(&self, filter: &ItemFilter) -> Result<ListResult<PullRequest>> {
        self.list_items(
            filter,
            |full_name, page| self.store.list_pull_requests(full_name, page, MAX_PER_PAGE),
            |full_name, number| self.store.list_pull_request_labels(full_name, number),
        )
    }

    pub fn list_issues(&self, filter: &ItemFilter) -> Result<ListResult<Issue>> {
        self.list_items(
            filter,
            |full_name, page| self.store.list_issues(full_name, page, MAX_PER_PAGE),
            |full_name, number| self.store.list_issue_labels(full_name, number),
        )
    }

    /// Full names to scan: the scoped repository, or every tracked one
    fn scope(&self, repo: Option<&str>) -> Result<Vec<String>> {
        match repo {
            Some(full_name) => {
                let (owner, name) = split_full_name(full_name)?;
                let repository = self.store.get_repository(owner, name)?;
                Ok(vec![repository.full_name])
            }
            None => Ok(self
                .store
                .list_repositories(1, AGGREGATE_LIMIT)?
                .items
                .into_iter()
                .map(|repository| repository.full_name)
                .collect()),
        }
    }

    fn list_items<T, F, L>(&self, filter: &ItemFilter, fetch: F, labels: L) -> Result<ListResult<T>>
    where
        T: TrackedItem,
        F: Fn(&str, usize) -> Result<Page<T>>,
        L: Fn(&str, u64) -> Result<Vec<Label>>,
    {
        let scoped = filter.repo.is_some();
        let mut collected = Vec::new();

        for full_name in self.scope(filter.repo.as_deref())? {
            match collect_all(&fetch, &full_name) {
                Ok(items) => collected.extend(items),
                Err(e) if scoped => return Err(e),
                Err(e) => debug!("Skipping {} during aggregation: {}", full_name, e),
            }
        }

        collected.retain(|item| {
            matches_text(filter.state.as_deref(), item.state())
                && matches_text(filter.author.as_deref(), item.author_login())
                && filter.label.as_deref().map_or(true, |wanted| {
                    labels(item.repository_full_name(), item.number())
                        .map(|attached| attached.iter().any(|l| l.name.eq_ignore_ascii_case(wanted)))
                        .unwrap_or(false)
                })
        });

        match filter.direction {
            Direction::Asc => collected.sort_by_key(|item| item.created_at()),
            Direction::Desc => collected.sort_by(|a, b| b.created_at().cmp(&a.created_at())),
        }

        let per_page = clamp_per_page(filter.per_page);
        let pagination = Pagination::new(filter.page, per_page, collected.len());
        let page = paginate(collected, pagination.page, pagination.per_page);

        Ok(ListResult {
            items: page.items,
            pagination,
        })
    }

    /// Counts, last sync time and a fresh rate-limit reading
    pub async fn get_status(&self) -> Result<ServiceStatus> {
        let snapshot = self.tracker.snapshot();
        let repositories = self.store.list_repositories(1, AGGREGATE_LIMIT)?;

        let last_sync = repositories
            .items
            .iter()
            .filter_map(|repo| repo.last_synced_at)
            .max()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let rate_limit = self.source.rate_limit().await?;

        Ok(ServiceStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            repositories: RepositoryCounts {
                total: repositories.total,
                syncing: snapshot.syncing,
                errored: snapshot.errored,
            },
            last_sync,
            rate_limit: RateLimitStatus {
                limit: rate_limit.limit,
                remaining: rate_limit.remaining,
                reset_at: DateTime::<Utc>::from_timestamp(rate_limit.reset, 0)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            },
        })
    }
}

/// Every item of one repository, walking the store's pages
fn collect_all<T, F>(fetch: &F, full_name: &str) -> Result<Vec<T>>
where
    F: Fn(&str, usize) -> Result<Page<T>>,
{
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let batch = fetch(full_name, page)?;
        let exhausted = batch.items.is_empty();
        items.extend(batch.items);
        if exhausted || items.len() >= batch.total {
            return Ok(items);
        }
        page += 1;
    }
}

fn matches_text(wanted: Option<&str>, actual: &str) -> bool {
    wanted.map_or(true, |wanted| wanted.eq_ignore_ascii_case(actual))
}
