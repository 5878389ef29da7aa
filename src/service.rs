//! Service facade tying the store, tracker, synchronizer and query engine
//! together for the presentation layer

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{split_full_name, Error, Result};
use crate::models::{Issue, Label, Page, PullRequest, Repository};
use crate::query::{ItemFilter, ListResult, QueryEngine, ServiceStatus};
use crate::source::Source;
use crate::store::{Store, AGGREGATE_LIMIT};
use crate::sync::{SyncDispatcher, SyncEvent, Synchronizer};
use crate::tracker::SyncTracker;

pub struct Service {
    store: Arc<dyn Store>,
    source: Arc<dyn Source>,
    tracker: Arc<SyncTracker>,
    query: QueryEngine,
    dispatcher: SyncDispatcher,
}

impl Service {
    /// Wire up the engine and start the sync dispatcher.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(store: Arc<dyn Store>, source: Arc<dyn Source>, config: &Config) -> Self {
        let tracker = Arc::new(SyncTracker::new());
        let synchronizer = Synchronizer::new(
            Arc::clone(&store),
            Arc::clone(&source),
            Arc::clone(&tracker),
            config.github.items_per_fetch,
        );
        let dispatcher = SyncDispatcher::start(Arc::new(synchronizer), config.sync.max_parallel);
        let query = QueryEngine::new(Arc::clone(&store), Arc::clone(&tracker), Arc::clone(&source));

        Self {
            store,
            source,
            tracker,
            query,
            dispatcher,
        }
    }

    /// Start tracking `owner/name` and queue its first sync.
    ///
    /// Tracking an already tracked repository returns the stored record.
    pub async fn track(&self, full_name: &str) -> Result<Repository> {
        let (owner, name) = split_full_name(full_name)?;

        match self.store.get_repository(owner, name) {
            Ok(existing) => {
                debug!("{} is already tracked", full_name);
                return Ok(existing);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let repository = self.source.get_repository(owner, name).await?.into_repository();
        match self.store.add_repository(repository.clone()) {
            Ok(()) => {}
            // Tracked concurrently by another caller
            Err(Error::AlreadyExists { .. }) => return self.store.get_repository(owner, name),
            Err(e) => return Err(e),
        }

        info!("Tracking {}", repository.full_name);
        self.dispatcher.enqueue(repository.full_name.clone());
        Ok(repository)
    }

    /// Stop tracking and drop everything stored for the repository
    pub fn untrack(&self, full_name: &str) -> Result<()> {
        let (owner, name) = split_full_name(full_name)?;
        self.store.delete_repository(owner, name)?;
        self.tracker.clear_status(full_name);
        info!("Stopped tracking {}", full_name);
        Ok(())
    }

    pub fn get_repository(&self, full_name: &str) -> Result<Repository> {
        let (owner, name) = split_full_name(full_name)?;
        self.store.get_repository(owner, name)
    }

    pub fn list_repositories(&self, page: usize, per_page: usize) -> Result<Page<Repository>> {
        self.store.list_repositories(page, per_page)
    }

    /// Queue a sync for one tracked repository
    pub fn refresh(&self, full_name: &str) -> Result<()> {
        let repository = self.get_repository(full_name)?;
        self.dispatcher.enqueue(repository.full_name);
        Ok(())
    }

    /// Queue a sync for every tracked repository, returning how many were queued
    pub fn refresh_all(&self) -> Result<usize> {
        let repositories = self.store.list_repositories(1, AGGREGATE_LIMIT)?;
        let mut queued = 0;
        for repository in repositories.items {
            if self.dispatcher.enqueue(repository.full_name) {
                queued += 1;
            }
        }
        info!("Queued refresh for {} repositories", queued);
        Ok(queued)
    }

    pub fn list_pull_requests(&self, filter: &ItemFilter) -> Result<ListResult<PullRequest>> {
        self.query.list_pull_requests(filter)
    }

    pub fn list_issues(&self, filter: &ItemFilter) -> Result<ListResult<Issue>> {
        self.query.list_issues(filter)
    }

    pub fn list_labels(&self, page: usize, per_page: usize) -> Result<Page<Label>> {
        self.store.list_labels(page, per_page)
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        self.query.get_status().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.dispatcher.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<SyncTracker> {
        &self.tracker
    }

    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    /// Stop accepting sync jobs and wait for queued ones to finish
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::source::{MockSource, RemoteRepository};
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn remote(owner: &str, name: &str) -> RemoteRepository {
        RemoteRepository {
            name: name.to_string(),
            owner: owner.to_string(),
            full_name: format!("{}/{}", owner, name),
            description: String::new(),
            url: String::new(),
            html_url: String::new(),
            private: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn quiet_source() -> MockSource {
        let mut source = MockSource::new();
        source
            .expect_get_repository()
            .returning(|owner, name| Ok(remote(owner, name)));
        source.expect_list_pull_requests().returning(|_, _, _| Ok(vec![]));
        source.expect_list_issues().returning(|_, _, _| Ok(vec![]));
        source
    }

    #[tokio::test]
    async fn test_track_is_idempotent() {
        let mut source = MockSource::new();
        source
            .expect_get_repository()
            .times(1)
            .returning(|owner, name| Ok(remote(owner, name)));
        source.expect_list_pull_requests().returning(|_, _, _| Ok(vec![]));
        source.expect_list_issues().returning(|_, _, _| Ok(vec![]));

        let service = Service::new(
            Arc::new(MemoryStore::new()),
            Arc::new(source),
            &Config::default(),
        );

        let first = service.track("acme/widgets").await.unwrap();
        let second = service.track("acme/widgets").await.unwrap();
        assert_eq!(first.full_name, second.full_name);
        assert_eq!(service.list_repositories(1, 10).unwrap().total, 1);

        service.shutdown().await;
        assert!(service.get_repository("acme/widgets").unwrap().last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_track_rejects_bad_names_and_unknown_repos() {
        let mut source = MockSource::new();
        source
            .expect_get_repository()
            .returning(|_, _| Err(SourceError::NotFound("Not Found".to_string())));

        let service = Service::new(
            Arc::new(MemoryStore::new()),
            Arc::new(source),
            &Config::default(),
        );

        assert_matches!(service.track("widgets").await, Err(Error::InvalidName(_)));
        assert_matches!(
            service.track("acme/ghost").await,
            Err(Error::Upstream(SourceError::NotFound(_)))
        );
        assert_eq!(service.list_repositories(1, 10).unwrap().total, 0);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_untrack_and_refresh() {
        let service = Service::new(
            Arc::new(MemoryStore::new()),
            Arc::new(quiet_source()),
            &Config::default(),
        );

        service.track("acme/widgets").await.unwrap();
        service.track("acme/gadgets").await.unwrap();
        assert_eq!(service.refresh_all().unwrap(), 2);
        service.refresh("acme/widgets").unwrap();

        service.untrack("acme/widgets").unwrap();
        assert_matches!(service.refresh("acme/widgets"), Err(Error::NotFound { .. }));
        assert_matches!(service.untrack("acme/widgets"), Err(Error::NotFound { .. }));

        service.shutdown().await;
        assert_eq!(service.list_repositories(1, 10).unwrap().total, 1);
    }
}
