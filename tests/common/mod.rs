//! Shared fixtures for repowatch integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use repowatch::error::SourceError;
use repowatch::models::User;
use repowatch::source::{
    ListOptions, RateLimit, RemoteIssue, RemoteLabel, RemotePullRequest, RemoteRepository, Source,
};

/// Scripted [`Source`] whose responses can be changed between cycles
#[derive(Default)]
pub struct FakeSource {
    repositories: Mutex<HashMap<String, RemoteRepository>>,
    pull_requests: Mutex<HashMap<String, Vec<RemotePullRequest>>>,
    issues: Mutex<HashMap<String, Vec<RemoteIssue>>>,
    failing_pull_requests: Mutex<HashSet<String>>,
    failing_issues: Mutex<HashSet<String>>,
    rate_limit: Mutex<Option<RateLimit>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(self, full_name: &str) -> Self {
        let (owner, name) = full_name.split_once('/').expect("owner/name");
        self.repositories
            .lock()
            .unwrap()
            .insert(full_name.to_string(), remote_repository(owner, name));
        self
    }

    pub fn set_pull_requests(&self, full_name: &str, items: Vec<RemotePullRequest>) {
        self.pull_requests
            .lock()
            .unwrap()
            .insert(full_name.to_string(), items);
    }

    pub fn set_issues(&self, full_name: &str, items: Vec<RemoteIssue>) {
        self.issues.lock().unwrap().insert(full_name.to_string(), items);
    }

    /// Make every pull request listing for `full_name` fail
    pub fn fail_pull_requests(&self, full_name: &str) {
        self.failing_pull_requests
            .lock()
            .unwrap()
            .insert(full_name.to_string());
    }

    /// Make every issue listing for `full_name` fail
    pub fn fail_issues(&self, full_name: &str) {
        self.failing_issues
            .lock()
            .unwrap()
            .insert(full_name.to_string());
    }

    pub fn set_rate_limit(&self, rate_limit: RateLimit) {
        *self.rate_limit.lock().unwrap() = Some(rate_limit);
    }
}

#[async_trait]
impl Source for FakeSource {
    async fn get_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<RemoteRepository, SourceError> {
        self.repositories
            .lock()
            .unwrap()
            .get(&format!("{}/{}", owner, name))
            .cloned()
            .ok_or_else(|| SourceError::NotFound("Not Found".to_string()))
    }

    async fn list_pull_requests(
        &self,
        owner: &str,
        name: &str,
        _options: &ListOptions,
    ) -> Result<Vec<RemotePullRequest>, SourceError> {
        let full_name = format!("{}/{}", owner, name);
        if self.failing_pull_requests.lock().unwrap().contains(&full_name) {
            return Err(SourceError::Api {
                status: 502,
                message: "Bad Gateway".to_string(),
            });
        }
        Ok(self
            .pull_requests
            .lock()
            .unwrap()
            .get(&full_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_issues(
        &self,
        owner: &str,
        name: &str,
        _options: &ListOptions,
    ) -> Result<Vec<RemoteIssue>, SourceError> {
        let full_name = format!("{}/{}", owner, name);
        if self.failing_issues.lock().unwrap().contains(&full_name) {
            return Err(SourceError::Api {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }
        Ok(self
            .issues
            .lock()
            .unwrap()
            .get(&full_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn rate_limit(&self) -> Result<RateLimit, SourceError> {
        (*self.rate_limit.lock().unwrap())
            .ok_or_else(|| SourceError::Transport("connection refused".to_string()))
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn remote_repository(owner: &str, name: &str) -> RemoteRepository {
    RemoteRepository {
        name: name.to_string(),
        owner: owner.to_string(),
        full_name: format!("{}/{}", owner, name),
        description: format!("{} test repository", name),
        url: format!("https://api.github.com/repos/{}/{}", owner, name),
        html_url: format!("https://github.com/{}/{}", owner, name),
        private: false,
        created_at: base_time(),
        updated_at: base_time(),
    }
}

pub fn user(login: &str) -> User {
    User {
        login: login.to_string(),
        avatar_url: format!("https://avatars.example.com/{}", login),
        url: format!("https://api.github.com/users/{}", login),
        html_url: format!("https://github.com/{}", login),
    }
}

pub fn remote_label(name: &str) -> RemoteLabel {
    RemoteLabel {
        name: name.to_string(),
        color: "ededed".to_string(),
        description: String::new(),
    }
}

/// Open pull request created `number` hours after [`base_time`]
pub fn remote_pull_request(number: u64, state: &str, author: &str) -> RemotePullRequest {
    let created_at = base_time() + Duration::hours(number as i64);
    RemotePullRequest {
        number,
        title: format!("Pull request #{}", number),
        body: String::new(),
        state: state.to_string(),
        url: String::new(),
        html_url: String::new(),
        user: user(author),
        created_at,
        updated_at: created_at,
        closed_at: None,
        merged_at: None,
        labels: vec![],
    }
}

pub fn remote_issue(number: u64, state: &str, author: &str) -> RemoteIssue {
    let created_at = base_time() + Duration::hours(number as i64);
    RemoteIssue {
        number,
        title: format!("Issue #{}", number),
        body: String::new(),
        state: state.to_string(),
        url: String::new(),
        html_url: String::new(),
        user: user(author),
        created_at,
        updated_at: created_at,
        closed_at: None,
        labels: vec![],
        is_pull_request: false,
    }
}
