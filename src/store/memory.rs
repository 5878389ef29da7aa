//! In-memory reference backend
//!
//! Lock layout: one `RwLock` over the global label table, one over the
//! repository index, and one per repository shard holding that repository's
//! pull requests, issues and label links. Locks are always taken in the order
//! labels, index, shard.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Entity, Error, Result};
use crate::models::{paginate, Issue, Label, Page, PullRequest, Repository};
use crate::store::{clamp_per_page, item_key, Store};

/// Items of one kind within a repository plus their label links
#[derive(Debug)]
struct ItemTable<T> {
    entity: Entity,
    items: BTreeMap<u64, T>,
    /// Label names per item, in attachment order
    labels: BTreeMap<u64, Vec<String>>,
}

impl<T: Clone> ItemTable<T> {
    fn new(entity: Entity) -> Self {
        Self {
            entity,
            items: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    fn missing(&self, full_name: &str, number: u64) -> Error {
        Error::not_found(self.entity, item_key(full_name, number))
    }

    fn insert(&mut self, full_name: &str, number: u64, item: T) -> Result<()> {
        if self.items.contains_key(&number) {
            return Err(Error::already_exists(self.entity, item_key(full_name, number)));
        }
        self.items.insert(number, item);
        Ok(())
    }

    fn get(&self, full_name: &str, number: u64) -> Result<T> {
        self.items
            .get(&number)
            .cloned()
            .ok_or_else(|| self.missing(full_name, number))
    }

    fn replace(&mut self, full_name: &str, number: u64, item: T) -> Result<()> {
        match self.items.get_mut(&number) {
            Some(slot) => {
                *slot = item;
                Ok(())
            }
            None => Err(self.missing(full_name, number)),
        }
    }

    fn remove(&mut self, full_name: &str, number: u64) -> Result<()> {
        if self.items.remove(&number).is_none() {
            return Err(self.missing(full_name, number));
        }
        self.labels.remove(&number);
        Ok(())
    }

    fn page(&self, page: usize, per_page: usize) -> Page<T> {
        paginate(self.items.values().cloned(), page, clamp_per_page(per_page))
    }

    fn attach(&mut self, full_name: &str, number: u64, label: &str) -> Result<()> {
        if !self.items.contains_key(&number) {
            return Err(self.missing(full_name, number));
        }
        let names = self.labels.entry(number).or_default();
        if !names.iter().any(|existing| existing == label) {
            names.push(label.to_string());
        }
        Ok(())
    }

    fn detach(&mut self, number: u64, label: &str) {
        if let Some(names) = self.labels.get_mut(&number) {
            names.retain(|existing| existing != label);
        }
    }

    fn label_names(&self, full_name: &str, number: u64) -> Result<Vec<String>> {
        if !self.items.contains_key(&number) {
            return Err(self.missing(full_name, number));
        }
        Ok(self.labels.get(&number).cloned().unwrap_or_default())
    }

    fn forget_label(&mut self, label: &str) {
        for names in self.labels.values_mut() {
            names.retain(|existing| existing != label);
        }
    }
}

/// Per-repository child collections
#[derive(Debug)]
struct Shard {
    pull_requests: ItemTable<PullRequest>,
    issues: ItemTable<Issue>,
}

impl Shard {
    fn new() -> Self {
        Self {
            pull_requests: ItemTable::new(Entity::PullRequest),
            issues: ItemTable::new(Entity::Issue),
        }
    }
}

#[derive(Debug)]
struct RepoEntry {
    repository: Repository,
    shard: Arc<RwLock<Shard>>,
}

/// Lock-guarded in-memory [`Store`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    labels: RwLock<BTreeMap<String, Label>>,
    repositories: RwLock<BTreeMap<String, RepoEntry>>,
}

// Every critical section leaves the maps consistent, so a poisoned lock is
// still safe to use.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shard handle for a tracked repository
    fn shard(&self, full_name: &str) -> Result<Arc<RwLock<Shard>>> {
        read(&self.repositories)
            .get(full_name)
            .map(|entry| Arc::clone(&entry.shard))
            .ok_or_else(|| Error::not_found(Entity::Repository, full_name))
    }

    fn with_shard<R>(&self, full_name: &str, f: impl FnOnce(&Shard) -> Result<R>) -> Result<R> {
        let shard = self.shard(full_name)?;
        let guard = read(&shard);
        f(&guard)
    }

    fn with_shard_mut<R>(
        &self,
        full_name: &str,
        f: impl FnOnce(&mut Shard) -> Result<R>,
    ) -> Result<R> {
        let shard = self.shard(full_name)?;
        let mut guard = write(&shard);
        f(&mut guard)
    }

    /// Attach under a held label read lock so a concurrent label delete
    /// cannot interleave
    fn attach_label(
        &self,
        full_name: &str,
        label: &str,
        f: impl FnOnce(&mut Shard) -> Result<()>,
    ) -> Result<()> {
        let labels = read(&self.labels);
        if !labels.contains_key(label) {
            return Err(Error::not_found(Entity::Label, label));
        }
        let result = self.with_shard_mut(full_name, f);
        drop(labels);
        result
    }

    fn resolve_labels(&self, names: Vec<String>) -> Vec<Label> {
        let labels = read(&self.labels);
        names
            .into_iter()
            .filter_map(|name| labels.get(&name).cloned())
            .collect()
    }
}

impl Store for MemoryStore {
    fn add_repository(&self, repo: Repository) -> Result<()> {
        let mut repositories = write(&self.repositories);
        if repositories.contains_key(&repo.full_name) {
            return Err(Error::already_exists(Entity::Repository, repo.full_name));
        }
        repositories.insert(
            repo.full_name.clone(),
            RepoEntry {
                repository: repo,
                shard: Arc::new(RwLock::new(Shard::new())),
            },
        );
        Ok(())
    }

    fn get_repository(&self, owner: &str, name: &str) -> Result<Repository> {
        let full_name = Repository::full_name_of(owner, name);
        read(&self.repositories)
            .get(&full_name)
            .map(|entry| entry.repository.clone())
            .ok_or_else(|| Error::not_found(Entity::Repository, full_name))
    }

    fn update_repository(&self, repo: Repository) -> Result<()> {
        let mut repositories = write(&self.repositories);
        match repositories.get_mut(&repo.full_name) {
            Some(entry) => {
                entry.repository = repo;
                Ok(())
            }
            None => Err(Error::not_found(Entity::Repository, repo.full_name)),
        }
    }

    fn delete_repository(&self, owner: &str, name: &str) -> Result<()> {
        let full_name = Repository::full_name_of(owner, name);
        // Dropping the entry drops the shard with all its items and links
        write(&self.repositories)
            .remove(&full_name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(Entity::Repository, full_name))
    }

    fn list_repositories(&self, page: usize, per_page: usize) -> Result<Page<Repository>> {
        let repositories = read(&self.repositories);
        Ok(paginate(
            repositories.values().map(|entry| entry.repository.clone()),
            page,
            clamp_per_page(per_page),
        ))
    }

    fn add_pull_request(&self, pr: PullRequest) -> Result<()> {
        let full_name = pr.repository_full_name.clone();
        self.with_shard_mut(&full_name, |shard| {
            shard.pull_requests.insert(&full_name, pr.number, pr)
        })
    }

    fn get_pull_request(&self, full_name: &str, number: u64) -> Result<PullRequest> {
        self.with_shard(full_name, |shard| shard.pull_requests.get(full_name, number))
    }

    fn update_pull_request(&self, pr: PullRequest) -> Result<()> {
        let full_name = pr.repository_full_name.clone();
        self.with_shard_mut(&full_name, |shard| {
            shard.pull_requests.replace(&full_name, pr.number, pr)
        })
    }

    fn delete_pull_request(&self, full_name: &str, number: u64) -> Result<()> {
        self.with_shard_mut(full_name, |shard| shard.pull_requests.remove(full_name, number))
    }

    fn list_pull_requests(
        &self,
        full_name: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Page<PullRequest>> {
        self.with_shard(full_name, |shard| Ok(shard.pull_requests.page(page, per_page)))
    }

    fn add_issue(&self, issue: Issue) -> Result<()> {
        let full_name = issue.repository_full_name.clone();
        self.with_shard_mut(&full_name, |shard| {
            shard.issues.insert(&full_name, issue.number, issue)
        })
    }

    fn get_issue(&self, full_name: &str, number: u64) -> Result<Issue> {
        self.with_shard(full_name, |shard| shard.issues.get(full_name, number))
    }

    fn update_issue(&self, issue: Issue) -> Result<()> {
        let full_name = issue.repository_full_name.clone();
        self.with_shard_mut(&full_name, |shard| {
            shard.issues.replace(&full_name, issue.number, issue)
        })
    }

    fn delete_issue(&self, full_name: &str, number: u64) -> Result<()> {
        self.with_shard_mut(full_name, |shard| shard.issues.remove(full_name, number))
    }

    fn list_issues(&self, full_name: &str, page: usize, per_page: usize) -> Result<Page<Issue>> {
        self.with_shard(full_name, |shard| Ok(shard.issues.page(page, per_page)))
    }

    fn add_label(&self, label: Label) -> Result<()> {
        let mut labels = write(&self.labels);
        if labels.contains_key(&label.name) {
            return Err(Error::already_exists(Entity::Label, label.name));
        }
        labels.insert(label.name.clone(), label);
        Ok(())
    }

    fn get_label(&self, name: &str) -> Result<Label> {
        read(&self.labels)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(Entity::Label, name))
    }

    fn update_label(&self, label: Label) -> Result<()> {
        let mut labels = write(&self.labels);
        match labels.get_mut(&label.name) {
            Some(slot) => {
                *slot = label;
                Ok(())
            }
            None => Err(Error::not_found(Entity::Label, label.name)),
        }
    }

    fn delete_label(&self, name: &str) -> Result<()> {
        let mut labels = write(&self.labels);
        if labels.remove(name).is_none() {
            return Err(Error::not_found(Entity::Label, name));
        }

        let repositories = read(&self.repositories);
        for entry in repositories.values() {
            let mut shard = write(&entry.shard);
            shard.pull_requests.forget_label(name);
            shard.issues.forget_label(name);
        }
        Ok(())
    }

    fn list_labels(&self, page: usize, per_page: usize) -> Result<Page<Label>> {
        let labels = read(&self.labels);
        Ok(paginate(labels.values().cloned(), page, clamp_per_page(per_page)))
    }

    fn add_pull_request_label(&self, full_name: &str, number: u64, label: &str) -> Result<()> {
        self.attach_label(full_name, label, |shard| {
            shard.pull_requests.attach(full_name, number, label)
        })
    }

    fn remove_pull_request_label(
        &self,
        full_name: &str,
        number: u64,
        label: &str,
    ) -> Result<()> {
        self.with_shard_mut(full_name, |shard| {
            shard.pull_requests.detach(number, label);
            Ok(())
        })
    }

    fn list_pull_request_labels(&self, full_name: &str, number: u64) -> Result<Vec<Label>> {
        let names =
            self.with_shard(full_name, |shard| shard.pull_requests.label_names(full_name, number))?;
        Ok(self.resolve_labels(names))
    }

    fn add_issue_label(&self, full_name: &str, number: u64, label: &str) -> Result<()> {
        self.attach_label(full_name, label, |shard| {
            shard.issues.attach(full_name, number, label)
        })
    }

    fn remove_issue_label(&self, full_name: &str, number: u64, label: &str) -> Result<()> {
        self.with_shard_mut(full_name, |shard| {
            shard.issues.detach(number, label);
            Ok(())
        })
    }

    fn list_issue_labels(&self, full_name: &str, number: u64) -> Result<Vec<Label>> {
        let names = self.with_shard(full_name, |shard| shard.issues.label_names(full_name, number))?;
        Ok(self.resolve_labels(names))
    }
}
