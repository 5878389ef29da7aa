//! End-to-end tests for the store, synchronizer and query engine

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;
use std::sync::Arc;
use tempfile::TempDir;

use common::{base_time, remote_issue, remote_label, remote_pull_request, remote_repository, FakeSource};
use repowatch::query::{ItemFilter, QueryEngine};
use repowatch::source::{Direction, RateLimit, Source};
use repowatch::sync::Synchronizer;
use repowatch::{
    Config, Error, MemoryStore, Repository, Service, SqliteStore, Store, SyncOutcome, SyncStatus, SyncTracker,
};

/// Every backend, freshly opened. The TempDir keeps the SQLite file alive.
fn backends() -> Vec<(&'static str, Arc<dyn Store>, Option<TempDir>)> {
    let temp_dir = TempDir::new().unwrap();
    let sqlite = SqliteStore::open_at(temp_dir.path().join("repowatch.db")).unwrap();
    vec![
        ("memory", Arc::new(MemoryStore::new()), None),
        ("sqlite", Arc::new(sqlite), Some(temp_dir)),
    ]
}

fn repository(full_name: &str) -> Repository {
    let (owner, name) = full_name.split_once('/').unwrap();
    remote_repository(owner, name).into_repository()
}

fn synchronizer(store: &Arc<dyn Store>, source: &Arc<FakeSource>) -> Synchronizer {
    let source: Arc<dyn Source> = source.clone();
    Synchronizer::new(Arc::clone(store), source, Arc::new(SyncTracker::new()), 100)
}

#[test]
fn test_repository_round_trip() {
    for (backend, store, _guard) in backends() {
        let repo = repository("acme/widgets");
        store.add_repository(repo.clone()).unwrap();

        let stored = store.get_repository("acme", "widgets").unwrap();
        assert_eq!(stored, repo, "backend {}", backend);
        assert!(stored.last_synced_at.is_none());
    }
}

#[test]
fn test_duplicate_and_orphan_writes_are_rejected() {
    for (backend, store, _guard) in backends() {
        store.add_repository(repository("acme/widgets")).unwrap();

        assert_matches!(
            store.add_repository(repository("acme/widgets")),
            Err(Error::AlreadyExists { .. }),
            "backend {}",
            backend
        );
        assert_matches!(
            store.add_pull_request(remote_pull_request(1, "open", "octocat").to_pull_request("acme/ghost")),
            Err(Error::NotFound { .. }),
            "backend {}",
            backend
        );
        assert_matches!(
            store.add_issue(remote_issue(1, "open", "octocat").to_issue("acme/ghost")),
            Err(Error::NotFound { .. }),
            "backend {}",
            backend
        );
    }
}

#[test]
fn test_label_attach_and_clear_status_are_idempotent() {
    for (backend, store, _guard) in backends() {
        store.add_repository(repository("acme/widgets")).unwrap();
        store
            .add_pull_request(remote_pull_request(1, "open", "octocat").to_pull_request("acme/widgets"))
            .unwrap();
        store.add_label(remote_label("bug").to_label()).unwrap();

        store.add_pull_request_label("acme/widgets", 1, "bug").unwrap();
        store.add_pull_request_label("acme/widgets", 1, "bug").unwrap();

        let labels = store.list_pull_request_labels("acme/widgets", 1).unwrap();
        assert_eq!(labels.len(), 1, "backend {}", backend);
    }

    let tracker = SyncTracker::new();
    tracker.clear_status("acme/widgets");
    tracker.clear_status("acme/widgets");
    assert_eq!(tracker.snapshot().syncing + tracker.snapshot().errored, 0);
}

#[quickcheck]
fn prop_pages_cover_every_pull_request(count: u8, page_size: u8) -> TestResult {
    let count = u64::from(count % 60);
    let per_page = usize::from(page_size % 15) + 1;

    let store = MemoryStore::new();
    store.add_repository(repository("acme/widgets")).unwrap();
    for number in 1..=count {
        store
            .add_pull_request(remote_pull_request(number, "open", "octocat").to_pull_request("acme/widgets"))
            .unwrap();
    }

    let total_pages = (count as usize).div_ceil(per_page);
    let mut seen = Vec::new();
    for page in 1..=total_pages {
        let result = store.list_pull_requests("acme/widgets", page, per_page).unwrap();
        if result.total != count as usize {
            return TestResult::failed();
        }
        seen.extend(result.items.into_iter().map(|pr| pr.number));
    }

    let beyond = store
        .list_pull_requests("acme/widgets", total_pages + 1, per_page)
        .unwrap();
    let expected: Vec<u64> = (1..=count).collect();

    TestResult::from_bool(
        seen == expected && beyond.items.is_empty() && beyond.total == count as usize,
    )
}

#[test]
fn test_delete_repository_cascades_only_its_data() {
    for (backend, store, _guard) in backends() {
        for full_name in ["acme/widgets", "acme/gadgets"] {
            store.add_repository(repository(full_name)).unwrap();
            store
                .add_pull_request(remote_pull_request(1, "open", "octocat").to_pull_request(full_name))
                .unwrap();
            store
                .add_issue(remote_issue(2, "open", "octocat").to_issue(full_name))
                .unwrap();
        }
        store.add_label(remote_label("bug").to_label()).unwrap();
        store.add_pull_request_label("acme/widgets", 1, "bug").unwrap();
        store.add_issue_label("acme/gadgets", 2, "bug").unwrap();

        store.delete_repository("acme", "widgets").unwrap();

        assert_matches!(
            store.list_pull_requests("acme/widgets", 1, 10),
            Err(Error::NotFound { .. }),
            "backend {}",
            backend
        );
        assert_matches!(store.get_issue("acme/widgets", 2), Err(Error::NotFound { .. }));

        assert_eq!(store.list_pull_requests("acme/gadgets", 1, 10).unwrap().total, 1);
        assert_eq!(store.list_issue_labels("acme/gadgets", 2).unwrap().len(), 1);
        assert!(store.get_label("bug").is_ok(), "backend {}", backend);
    }
}

#[test]
fn test_cross_repository_state_filter() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    store.add_repository(repository("acme/a")).unwrap();
    store.add_repository(repository("acme/b")).unwrap();
    for (number, state) in [(1, "open"), (2, "open"), (3, "closed")] {
        store
            .add_pull_request(remote_pull_request(number, state, "octocat").to_pull_request("acme/a"))
            .unwrap();
    }
    store
        .add_pull_request(remote_pull_request(1, "open", "hubot").to_pull_request("acme/b"))
        .unwrap();

    let source: Arc<dyn Source> = Arc::new(FakeSource::new());
    let engine = QueryEngine::new(store, Arc::new(SyncTracker::new()), source);

    let everywhere = ItemFilter {
        state: Some("open".to_string()),
        ..ItemFilter::default()
    };
    let result = engine.list_pull_requests(&everywhere).unwrap();
    assert_eq!(result.items.len(), 3);
    assert_eq!(result.pagination.total, 3);

    let scoped = ItemFilter {
        repo: Some("acme/a".to_string()),
        ..everywhere.clone()
    };
    assert_eq!(engine.list_pull_requests(&scoped).unwrap().items.len(), 2);

    let oldest_first = ItemFilter {
        direction: Direction::Asc,
        per_page: 2,
        ..everywhere
    };
    let page = engine.list_pull_requests(&oldest_first).unwrap();
    assert_eq!(page.pagination.total_pages, 2);
    assert!(page.items[0].created_at <= page.items[1].created_at);
}

#[tokio::test]
async fn test_second_cycle_applies_merge() {
    for (backend, store, _guard) in backends() {
        store.add_repository(repository("acme/widgets")).unwrap();
        let source = Arc::new(FakeSource::new());
        let synchronizer = synchronizer(&store, &source);

        source.set_pull_requests("acme/widgets", vec![remote_pull_request(5, "open", "octocat")]);
        assert_matches!(synchronizer.run_cycle("acme/widgets").await, SyncOutcome::Completed(_));
        let first_sync = store
            .get_repository("acme", "widgets")
            .unwrap()
            .last_synced_at
            .unwrap();

        let mut merged = remote_pull_request(5, "closed", "octocat");
        merged.closed_at = Some(base_time() + Duration::days(1));
        merged.merged_at = Some(base_time() + Duration::days(1));
        source.set_pull_requests("acme/widgets", vec![merged]);

        let second_start = Utc::now();
        assert_matches!(synchronizer.run_cycle("acme/widgets").await, SyncOutcome::Completed(_));

        let pr = store.get_pull_request("acme/widgets", 5).unwrap();
        assert_eq!(pr.state, "closed", "backend {}", backend);
        assert!(pr.merged_at.is_some());
        assert_eq!(store.list_pull_requests("acme/widgets", 1, 10).unwrap().total, 1);

        let last_synced_at = store
            .get_repository("acme", "widgets")
            .unwrap()
            .last_synced_at
            .unwrap();
        assert!(last_synced_at >= second_start);
        assert!(last_synced_at >= first_sync);
    }
}

#[tokio::test]
async fn test_failed_pull_request_fetch_leaves_data_intact() {
    for (backend, store, _guard) in backends() {
        store.add_repository(repository("acme/widgets")).unwrap();
        let source = Arc::new(FakeSource::new());
        let synchronizer = synchronizer(&store, &source);

        source.set_issues("acme/widgets", vec![remote_issue(7, "open", "octocat")]);
        assert_matches!(synchronizer.run_cycle("acme/widgets").await, SyncOutcome::Completed(_));
        let before = store.get_repository("acme", "widgets").unwrap().last_synced_at;

        source.fail_pull_requests("acme/widgets");
        source.set_issues(
            "acme/widgets",
            vec![remote_issue(7, "closed", "octocat"), remote_issue(8, "open", "hubot")],
        );
        assert_matches!(synchronizer.run_cycle("acme/widgets").await, SyncOutcome::Failed(_));

        let snapshot = synchronizer.tracker().snapshot();
        assert_eq!(snapshot.errored, 1, "backend {}", backend);
        assert_eq!(snapshot.syncing, 0);
        assert_eq!(store.get_repository("acme", "widgets").unwrap().last_synced_at, before);

        let issues = store.list_issues("acme/widgets", 1, 10).unwrap();
        assert_eq!(issues.total, 1);
        assert_eq!(issues.items[0].state, "open");
    }
}

#[tokio::test]
async fn test_failed_issue_fetch_keeps_applied_pull_requests() {
    for (backend, store, _guard) in backends() {
        store.add_repository(repository("acme/widgets")).unwrap();
        let source = Arc::new(FakeSource::new());
        let synchronizer = synchronizer(&store, &source);

        source.set_pull_requests("acme/widgets", vec![remote_pull_request(1, "open", "octocat")]);
        source.set_issues("acme/widgets", vec![remote_issue(7, "open", "octocat")]);
        assert_matches!(synchronizer.run_cycle("acme/widgets").await, SyncOutcome::Completed(_));
        let before = store.get_repository("acme", "widgets").unwrap().last_synced_at;

        source.set_pull_requests(
            "acme/widgets",
            vec![
                remote_pull_request(1, "closed", "octocat"),
                remote_pull_request(2, "open", "hubot"),
            ],
        );
        source.set_issues("acme/widgets", vec![remote_issue(7, "closed", "octocat")]);
        source.fail_issues("acme/widgets");
        assert_matches!(
            synchronizer.run_cycle("acme/widgets").await,
            SyncOutcome::Failed(detail) if detail.contains("503")
        );

        // Pull requests are applied before issues are fetched, so they stay
        let pulls = store.list_pull_requests("acme/widgets", 1, 10).unwrap();
        assert_eq!(pulls.total, 2, "backend {}", backend);
        assert_eq!(store.get_pull_request("acme/widgets", 1).unwrap().state, "closed");

        assert_eq!(store.get_issue("acme/widgets", 7).unwrap().state, "open");
        assert_eq!(store.get_repository("acme", "widgets").unwrap().last_synced_at, before);
        assert_matches!(
            synchronizer.tracker().status("acme/widgets"),
            Some(SyncStatus::Error(_))
        );
    }
}

#[tokio::test]
async fn test_sync_creates_global_labels_and_skips_pull_request_issues() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    store.add_repository(repository("acme/widgets")).unwrap();
    let source = Arc::new(FakeSource::new());

    let mut pr = remote_pull_request(1, "open", "octocat");
    pr.labels = vec![remote_label("bug"), remote_label("needs-review")];
    let mut issue = remote_issue(2, "open", "octocat");
    issue.labels = vec![remote_label("bug")];
    let mut pr_in_issue_feed = remote_issue(1, "open", "octocat");
    pr_in_issue_feed.is_pull_request = true;
    source.set_pull_requests("acme/widgets", vec![pr]);
    source.set_issues("acme/widgets", vec![issue, pr_in_issue_feed]);

    let report = match synchronizer(&store, &source).run_cycle("acme/widgets").await {
        SyncOutcome::Completed(report) => report,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(report.labels_created, 2);
    assert_eq!(report.issues.skipped, 1);

    assert_eq!(store.list_labels(1, 10).unwrap().total, 2);
    assert_eq!(store.list_issues("acme/widgets", 1, 10).unwrap().total, 1);
    let names: Vec<String> = store
        .list_pull_request_labels("acme/widgets", 1)
        .unwrap()
        .into_iter()
        .map(|label| label.name)
        .collect();
    assert_eq!(names, vec!["bug", "needs-review"]);
}

#[tokio::test]
async fn test_service_track_sync_and_query() {
    let source = Arc::new(
        FakeSource::new()
            .with_repository("acme/widgets")
            .with_repository("acme/gadgets"),
    );
    let mut labelled = remote_pull_request(1, "open", "octocat");
    labelled.labels = vec![remote_label("bug")];
    source.set_pull_requests("acme/widgets", vec![labelled, remote_pull_request(2, "closed", "hubot")]);
    source.set_pull_requests("acme/gadgets", vec![remote_pull_request(1, "open", "Octocat")]);
    source.set_rate_limit(RateLimit {
        limit: 5000,
        remaining: 4990,
        reset: 1_700_000_000,
    });

    let dyn_source: Arc<dyn Source> = source.clone();
    let service = Service::new(Arc::new(MemoryStore::new()), dyn_source, &Config::default());

    service.track("acme/widgets").await.unwrap();
    service.track("acme/gadgets").await.unwrap();
    assert_matches!(service.track("acme/missing").await, Err(Error::Upstream(_)));

    let mut events = service.subscribe();
    service.refresh_all().unwrap();
    service.shutdown().await;
    assert!(events.try_recv().is_ok());

    let by_author = ItemFilter {
        author: Some("OCTOCAT".to_string()),
        ..ItemFilter::default()
    };
    assert_eq!(service.list_pull_requests(&by_author).unwrap().pagination.total, 2);

    let by_label = ItemFilter {
        label: Some("Bug".to_string()),
        ..ItemFilter::default()
    };
    let labelled = service.list_pull_requests(&by_label).unwrap();
    assert_eq!(labelled.items.len(), 1);
    assert_eq!(labelled.items[0].repository_full_name, "acme/widgets");

    let status = service.status().await.unwrap();
    assert_eq!(status.repositories.total, 2);
    assert_eq!(status.repositories.errored, 0);
    assert_eq!(status.rate_limit.remaining, 4990);
    assert_eq!(status.rate_limit.reset_at.timestamp(), 1_700_000_000);
    assert!(status.last_sync > base_time());

    service.untrack("acme/widgets").unwrap();
    assert_eq!(service.list_pull_requests(&by_label).unwrap().items.len(), 0);
    assert_eq!(service.list_labels(1, 10).unwrap().total, 1);
}

#[tokio::test]
async fn test_sqlite_data_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("repowatch.db");

    let source = Arc::new(FakeSource::new().with_repository("acme/widgets"));
    source.set_pull_requests("acme/widgets", vec![remote_pull_request(3, "open", "octocat")]);
    source.set_issues("acme/widgets", vec![remote_issue(4, "open", "octocat")]);

    {
        let store = Arc::new(SqliteStore::open_at(db_path.clone()).unwrap());
        let dyn_source: Arc<dyn Source> = source.clone();
        let service = Service::new(store, dyn_source, &Config::default());
        service.track("acme/widgets").await.unwrap();
        service.shutdown().await;
    }

    let reopened = SqliteStore::open_at(db_path).unwrap();
    let repository = reopened.get_repository("acme", "widgets").unwrap();
    assert!(repository.last_synced_at.is_some());
    assert_eq!(reopened.get_pull_request("acme/widgets", 3).unwrap().user.login, "octocat");
    assert_eq!(reopened.list_issues("acme/widgets", 1, 10).unwrap().total, 1);
}
