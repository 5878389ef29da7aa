//! SQLite-backed store
//!
//! Write-through adapter behind the [`Store`] contract. Foreign keys with
//! `ON DELETE CASCADE` carry repository, item and label deletions down to
//! their associations. Every mutation runs inside one transaction.
//!
//! The default database lives in XDG_DATA_HOME/repowatch/repowatch.db

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::error::{Entity, Error, Result};
use crate::models::{Issue, Label, Page, Pagination, PullRequest, Repository, User};
use crate::store::{clamp_per_page, item_key, Store};

const REPOSITORY_COLUMNS: &str = "owner, name, full_name, description, url, html_url, \
     is_private, created_at, updated_at, last_synced_at";

const PULL_REQUEST_COLUMNS: &str = "repository, number, title, body, state, url, html_url, \
     user_login, user_avatar_url, user_url, user_html_url, created_at, updated_at, \
     closed_at, merged_at";

const ISSUE_COLUMNS: &str = "repository, number, title, body, state, url, html_url, \
     user_login, user_avatar_url, user_url, user_html_url, created_at, updated_at, closed_at";

/// Which item table an association query addresses
#[derive(Debug, Clone, Copy)]
enum ItemKind {
    PullRequest,
    Issue,
}

impl ItemKind {
    fn entity(self) -> Entity {
        match self {
            ItemKind::PullRequest => Entity::PullRequest,
            ItemKind::Issue => Entity::Issue,
        }
    }

    fn table(self) -> &'static str {
        match self {
            ItemKind::PullRequest => "pull_requests",
            ItemKind::Issue => "issues",
        }
    }

    fn link_table(self) -> &'static str {
        match self {
            ItemKind::PullRequest => "pull_request_labels",
            ItemKind::Issue => "issue_labels",
        }
    }
}

/// Durable [`Store`] over a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at the default location
    pub fn open() -> anyhow::Result<Self> {
        let db_path = Self::get_db_path()?;
        Self::open_at(db_path)
    }

    /// Open or create the database at a specific path
    pub fn open_at(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let store = Self::from_connection(conn)?;
        info!("Store database opened at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get the default database path
    fn get_db_path() -> anyhow::Result<PathBuf> {
        let data_dir = if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(data_home)
        } else if let Some(dir) = dirs::data_dir() {
            dir
        } else {
            PathBuf::from("/tmp")
        };

        Ok(data_dir.join("repowatch").join("repowatch.db"))
    }

    /// Initialize the database schema
    fn initialize(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS repositories (
                full_name TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL,
                html_url TEXT NOT NULL,
                is_private INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_synced_at TEXT
            );

            CREATE TABLE IF NOT EXISTS pull_requests (
                repository TEXT NOT NULL REFERENCES repositories(full_name) ON DELETE CASCADE,
                number INTEGER NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL,
                url TEXT NOT NULL,
                html_url TEXT NOT NULL,
                user_login TEXT NOT NULL,
                user_avatar_url TEXT NOT NULL DEFAULT '',
                user_url TEXT NOT NULL DEFAULT '',
                user_html_url TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                closed_at TEXT,
                merged_at TEXT,
                PRIMARY KEY (repository, number)
            );

            CREATE TABLE IF NOT EXISTS issues (
                repository TEXT NOT NULL REFERENCES repositories(full_name) ON DELETE CASCADE,
                number INTEGER NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL,
                url TEXT NOT NULL,
                html_url TEXT NOT NULL,
                user_login TEXT NOT NULL,
                user_avatar_url TEXT NOT NULL DEFAULT '',
                user_url TEXT NOT NULL DEFAULT '',
                user_html_url TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                closed_at TEXT,
                PRIMARY KEY (repository, number)
            );

            CREATE TABLE IF NOT EXISTS labels (
                name TEXT PRIMARY KEY,
                color TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT ''
            );

            -- id preserves attachment order
            CREATE TABLE IF NOT EXISTS pull_request_labels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository TEXT NOT NULL,
                number INTEGER NOT NULL,
                label TEXT NOT NULL REFERENCES labels(name) ON DELETE CASCADE,
                UNIQUE (repository, number, label),
                FOREIGN KEY (repository, number)
                    REFERENCES pull_requests(repository, number) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS issue_labels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository TEXT NOT NULL,
                number INTEGER NOT NULL,
                label TEXT NOT NULL REFERENCES labels(name) ON DELETE CASCADE,
                UNIQUE (repository, number, label),
                FOREIGN KEY (repository, number)
                    REFERENCES issues(repository, number) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_pr_labels_label ON pull_request_labels(label);
            CREATE INDEX IF NOT EXISTS idx_issue_labels_label ON issue_labels(label);
            "#,
        )
        .context("Failed to initialize database schema")?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` inside a transaction, committing only on success
    fn write_tx<R>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<R>) -> Result<R> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    fn list_items<T>(
        &self,
        kind: ItemKind,
        columns: &str,
        full_name: &str,
        page: usize,
        per_page: usize,
        map_row: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Page<T>> {
        let conn = self.lock();
        require_repository(&conn, full_name)?;

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE repository = ?1", kind.table()),
            params![full_name],
            |row| row.get(0),
        )?;

        let pagination = Pagination::new(page, clamp_per_page(per_page), total as usize);
        let Some((limit, offset)) = page_bounds(&pagination) else {
            return Ok(Page::with_total(pagination.total));
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE repository = ?1 ORDER BY number LIMIT ?2 OFFSET ?3",
            columns,
            kind.table()
        ))?;
        let items = stmt
            .query_map(params![full_name, limit, offset], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: pagination.total,
        })
    }

    fn delete_item(&self, kind: ItemKind, full_name: &str, number: u64) -> Result<()> {
        self.write_tx(|tx| {
            require_repository(tx, full_name)?;
            let changed = tx.execute(
                &format!(
                    "DELETE FROM {} WHERE repository = ?1 AND number = ?2",
                    kind.table()
                ),
                params![full_name, number as i64],
            )?;
            if changed == 0 {
                return Err(Error::not_found(kind.entity(), item_key(full_name, number)));
            }
            Ok(())
        })
    }

    fn add_link(&self, kind: ItemKind, full_name: &str, number: u64, label: &str) -> Result<()> {
        self.write_tx(|tx| {
            require_item(tx, kind, full_name, number)?;
            if !label_exists(tx, label)? {
                return Err(Error::not_found(Entity::Label, label));
            }
            tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (repository, number, label) VALUES (?1, ?2, ?3)",
                    kind.link_table()
                ),
                params![full_name, number as i64, label],
            )?;
            Ok(())
        })
    }

    fn remove_link(&self, kind: ItemKind, full_name: &str, number: u64, label: &str) -> Result<()> {
        self.write_tx(|tx| {
            require_repository(tx, full_name)?;
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE repository = ?1 AND number = ?2 AND label = ?3",
                    kind.link_table()
                ),
                params![full_name, number as i64, label],
            )?;
            Ok(())
        })
    }

    fn list_links(&self, kind: ItemKind, full_name: &str, number: u64) -> Result<Vec<Label>> {
        let conn = self.lock();
        require_item(&conn, kind, full_name, number)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT l.name, l.color, l.description FROM {} link \
             JOIN labels l ON l.name = link.label \
             WHERE link.repository = ?1 AND link.number = ?2 ORDER BY link.id",
            kind.link_table()
        ))?;
        let labels = stmt
            .query_map(params![full_name, number as i64], label_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(labels)
    }
}

fn require_repository(conn: &Connection, full_name: &str) -> Result<()> {
    let found = conn
        .query_row(
            "SELECT 1 FROM repositories WHERE full_name = ?1",
            params![full_name],
            |_| Ok(()),
        )
        .optional()?;
    found.ok_or_else(|| Error::not_found(Entity::Repository, full_name))
}

fn require_item(conn: &Connection, kind: ItemKind, full_name: &str, number: u64) -> Result<()> {
    require_repository(conn, full_name)?;
    let found = conn
        .query_row(
            &format!(
                "SELECT 1 FROM {} WHERE repository = ?1 AND number = ?2",
                kind.table()
            ),
            params![full_name, number as i64],
            |_| Ok(()),
        )
        .optional()?;
    found.ok_or_else(|| Error::not_found(kind.entity(), item_key(full_name, number)))
}

/// LIMIT and OFFSET for `pagination`, or `None` when the page starts past the last row
fn page_bounds(pagination: &Pagination) -> Option<(i64, i64)> {
    let offset = pagination.offset();
    if offset >= pagination.total {
        return None;
    }
    Some((
        i64::try_from(pagination.per_page).ok()?,
        i64::try_from(offset).ok()?,
    ))
}

fn label_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM labels WHERE name = ?1", params![name], |_| Ok(()))
        .optional()?
        .is_some())
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp(row, idx).map(Some),
        None => Ok(None),
    }
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        owner: row.get(0)?,
        name: row.get(1)?,
        full_name: row.get(2)?,
        description: row.get(3)?,
        url: row.get(4)?,
        html_url: row.get(5)?,
        is_private: row.get(6)?,
        created_at: timestamp(row, 7)?,
        updated_at: timestamp(row, 8)?,
        last_synced_at: optional_timestamp(row, 9)?,
    })
}

fn user_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<User> {
    Ok(User {
        login: row.get(start)?,
        avatar_url: row.get(start + 1)?,
        url: row.get(start + 2)?,
        html_url: row.get(start + 3)?,
    })
}

fn pull_request_from_row(row: &Row<'_>) -> rusqlite::Result<PullRequest> {
    Ok(PullRequest {
        repository_full_name: row.get(0)?,
        number: row.get::<_, i64>(1)? as u64,
        title: row.get(2)?,
        body: row.get(3)?,
        state: row.get(4)?,
        url: row.get(5)?,
        html_url: row.get(6)?,
        user: user_from_row(row, 7)?,
        created_at: timestamp(row, 11)?,
        updated_at: timestamp(row, 12)?,
        closed_at: optional_timestamp(row, 13)?,
        merged_at: optional_timestamp(row, 14)?,
    })
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        repository_full_name: row.get(0)?,
        number: row.get::<_, i64>(1)? as u64,
        title: row.get(2)?,
        body: row.get(3)?,
        state: row.get(4)?,
        url: row.get(5)?,
        html_url: row.get(6)?,
        user: user_from_row(row, 7)?,
        created_at: timestamp(row, 11)?,
        updated_at: timestamp(row, 12)?,
        closed_at: optional_timestamp(row, 13)?,
    })
}

fn label_from_row(row: &Row<'_>) -> rusqlite::Result<Label> {
    Ok(Label {
        name: row.get(0)?,
        color: row.get(1)?,
        description: row.get(2)?,
    })
}

fn rfc3339(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

impl Store for SqliteStore {
    fn add_repository(&self, repo: Repository) -> Result<()> {
        self.write_tx(|tx| {
            if require_repository(tx, &repo.full_name).is_ok() {
                return Err(Error::already_exists(Entity::Repository, &repo.full_name));
            }
            tx.execute(
                &format!(
                    "INSERT INTO repositories ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    REPOSITORY_COLUMNS
                ),
                params![
                    repo.owner,
                    repo.name,
                    repo.full_name,
                    repo.description,
                    repo.url,
                    repo.html_url,
                    repo.is_private,
                    repo.created_at.to_rfc3339(),
                    repo.updated_at.to_rfc3339(),
                    rfc3339(repo.last_synced_at),
                ],
            )?;
            debug!("Stored repository {}", repo.full_name);
            Ok(())
        })
    }

    fn get_repository(&self, owner: &str, name: &str) -> Result<Repository> {
        let full_name = Repository::full_name_of(owner, name);
        let conn = self.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM repositories WHERE full_name = ?1",
                REPOSITORY_COLUMNS
            ),
            params![full_name],
            repository_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::not_found(Entity::Repository, full_name))
    }

    fn update_repository(&self, repo: Repository) -> Result<()> {
        self.write_tx(|tx| {
            let changed = tx.execute(
                r#"
                UPDATE repositories SET
                    owner = ?1, name = ?2, description = ?4, url = ?5, html_url = ?6,
                    is_private = ?7, created_at = ?8, updated_at = ?9, last_synced_at = ?10
                WHERE full_name = ?3
                "#,
                params![
                    repo.owner,
                    repo.name,
                    repo.full_name,
                    repo.description,
                    repo.url,
                    repo.html_url,
                    repo.is_private,
                    repo.created_at.to_rfc3339(),
                    repo.updated_at.to_rfc3339(),
                    rfc3339(repo.last_synced_at),
                ],
            )?;
            if changed == 0 {
                return Err(Error::not_found(Entity::Repository, &repo.full_name));
            }
            Ok(())
        })
    }

    fn delete_repository(&self, owner: &str, name: &str) -> Result<()> {
        let full_name = Repository::full_name_of(owner, name);
        self.write_tx(|tx| {
            let changed = tx.execute(
                "DELETE FROM repositories WHERE full_name = ?1",
                params![full_name],
            )?;
            if changed == 0 {
                return Err(Error::not_found(Entity::Repository, &full_name));
            }
            info!("Deleted repository {} and its items", full_name);
            Ok(())
        })
    }

    fn list_repositories(&self, page: usize, per_page: usize) -> Result<Page<Repository>> {
        let conn = self.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))?;
        let pagination = Pagination::new(page, clamp_per_page(per_page), total as usize);
        let Some((limit, offset)) = page_bounds(&pagination) else {
            return Ok(Page::with_total(pagination.total));
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM repositories ORDER BY full_name LIMIT ?1 OFFSET ?2",
            REPOSITORY_COLUMNS
        ))?;
        let items = stmt
            .query_map(params![limit, offset], repository_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: pagination.total,
        })
    }

    fn add_pull_request(&self, pr: PullRequest) -> Result<()> {
        self.write_tx(|tx| {
            require_repository(tx, &pr.repository_full_name)?;
            if require_item(tx, ItemKind::PullRequest, &pr.repository_full_name, pr.number).is_ok() {
                return Err(Error::already_exists(
                    Entity::PullRequest,
                    item_key(&pr.repository_full_name, pr.number),
                ));
            }
            tx.execute(
                &format!(
                    "INSERT INTO pull_requests ({}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    PULL_REQUEST_COLUMNS
                ),
                params![
                    pr.repository_full_name,
                    pr.number as i64,
                    pr.title,
                    pr.body,
                    pr.state,
                    pr.url,
                    pr.html_url,
                    pr.user.login,
                    pr.user.avatar_url,
                    pr.user.url,
                    pr.user.html_url,
                    pr.created_at.to_rfc3339(),
                    pr.updated_at.to_rfc3339(),
                    rfc3339(pr.closed_at),
                    rfc3339(pr.merged_at),
                ],
            )?;
            Ok(())
        })
    }

    fn get_pull_request(&self, full_name: &str, number: u64) -> Result<PullRequest> {
        let conn = self.lock();
        require_repository(&conn, full_name)?;
        conn.query_row(
            &format!(
                "SELECT {} FROM pull_requests WHERE repository = ?1 AND number = ?2",
                PULL_REQUEST_COLUMNS
            ),
            params![full_name, number as i64],
            pull_request_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::not_found(Entity::PullRequest, item_key(full_name, number)))
    }

    fn update_pull_request(&self, pr: PullRequest) -> Result<()> {
        self.write_tx(|tx| {
            require_repository(tx, &pr.repository_full_name)?;
            let changed = tx.execute(
                r#"
                UPDATE pull_requests SET
                    title = ?3, body = ?4, state = ?5, url = ?6, html_url = ?7,
                    user_login = ?8, user_avatar_url = ?9, user_url = ?10, user_html_url = ?11,
                    created_at = ?12, updated_at = ?13, closed_at = ?14, merged_at = ?15
                WHERE repository = ?1 AND number = ?2
                "#,
                params![
                    pr.repository_full_name,
                    pr.number as i64,
                    pr.title,
                    pr.body,
                    pr.state,
                    pr.url,
                    pr.html_url,
                    pr.user.login,
                    pr.user.avatar_url,
                    pr.user.url,
                    pr.user.html_url,
                    pr.created_at.to_rfc3339(),
                    pr.updated_at.to_rfc3339(),
                    rfc3339(pr.closed_at),
                    rfc3339(pr.merged_at),
                ],
            )?;
            if changed == 0 {
                return Err(Error::not_found(
                    Entity::PullRequest,
                    item_key(&pr.repository_full_name, pr.number),
                ));
            }
            Ok(())
        })
    }

    fn delete_pull_request(&self, full_name: &str, number: u64) -> Result<()> {
        self.delete_item(ItemKind::PullRequest, full_name, number)
    }

    fn list_pull_requests(
        &self,
        full_name: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Page<PullRequest>> {
        self.list_items(
            ItemKind::PullRequest,
            PULL_REQUEST_COLUMNS,
            full_name,
            page,
            per_page,
            pull_request_from_row,
        )
    }

    fn add_issue(&self, issue: Issue) -> Result<()> {
        self.write_tx(|tx| {
            require_repository(tx, &issue.repository_full_name)?;
            if require_item(tx, ItemKind::Issue, &issue.repository_full_name, issue.number).is_ok() {
                return Err(Error::already_exists(
                    Entity::Issue,
                    item_key(&issue.repository_full_name, issue.number),
                ));
            }
            tx.execute(
                &format!(
                    "INSERT INTO issues ({}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    ISSUE_COLUMNS
                ),
                params![
                    issue.repository_full_name,
                    issue.number as i64,
                    issue.title,
                    issue.body,
                    issue.state,
                    issue.url,
                    issue.html_url,
                    issue.user.login,
                    issue.user.avatar_url,
                    issue.user.url,
                    issue.user.html_url,
                    issue.created_at.to_rfc3339(),
                    issue.updated_at.to_rfc3339(),
                    rfc3339(issue.closed_at),
                ],
            )?;
            Ok(())
        })
    }

    fn get_issue(&self, full_name: &str, number: u64) -> Result<Issue> {
        let conn = self.lock();
        require_repository(&conn, full_name)?;
        conn.query_row(
            &format!(
                "SELECT {} FROM issues WHERE repository = ?1 AND number = ?2",
                ISSUE_COLUMNS
            ),
            params![full_name, number as i64],
            issue_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::not_found(Entity::Issue, item_key(full_name, number)))
    }

    fn update_issue(&self, issue: Issue) -> Result<()> {
        self.write_tx(|tx| {
            require_repository(tx, &issue.repository_full_name)?;
            let changed = tx.execute(
                r#"
                UPDATE issues SET
                    title = ?3, body = ?4, state = ?5, url = ?6, html_url = ?7,
                    user_login = ?8, user_avatar_url = ?9, user_url = ?10, user_html_url = ?11,
                    created_at = ?12, updated_at = ?13, closed_at = ?14
                WHERE repository = ?1 AND number = ?2
                "#,
                params![
                    issue.repository_full_name,
                    issue.number as i64,
                    issue.title,
                    issue.body,
                    issue.state,
                    issue.url,
                    issue.html_url,
                    issue.user.login,
                    issue.user.avatar_url,
                    issue.user.url,
                    issue.user.html_url,
                    issue.created_at.to_rfc3339(),
                    issue.updated_at.to_rfc3339(),
                    rfc3339(issue.closed_at),
                ],
            )?;
            if changed == 0 {
                return Err(Error::not_found(
                    Entity::Issue,
                    item_key(&issue.repository_full_name, issue.number),
                ));
            }
            Ok(())
        })
    }

    fn delete_issue(&self, full_name: &str, number: u64) -> Result<()> {
        self.delete_item(ItemKind::Issue, full_name, number)
    }

    fn list_issues(&self, full_name: &str, page: usize, per_page: usize) -> Result<Page<Issue>> {
        self.list_items(
            ItemKind::Issue,
            ISSUE_COLUMNS,
            full_name,
            page,
            per_page,
            issue_from_row,
        )
    }

    fn add_label(&self, label: Label) -> Result<()> {
        self.write_tx(|tx| {
            if label_exists(tx, &label.name)? {
                return Err(Error::already_exists(Entity::Label, &label.name));
            }
            tx.execute(
                "INSERT INTO labels (name, color, description) VALUES (?1, ?2, ?3)",
                params![label.name, label.color, label.description],
            )?;
            Ok(())
        })
    }

    fn get_label(&self, name: &str) -> Result<Label> {
        let conn = self.lock();
        conn.query_row(
            "SELECT name, color, description FROM labels WHERE name = ?1",
            params![name],
            label_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::not_found(Entity::Label, name))
    }

    fn update_label(&self, label: Label) -> Result<()> {
        self.write_tx(|tx| {
            let changed = tx.execute(
                "UPDATE labels SET color = ?2, description = ?3 WHERE name = ?1",
                params![label.name, label.color, label.description],
            )?;
            if changed == 0 {
                return Err(Error::not_found(Entity::Label, &label.name));
            }
            Ok(())
        })
    }

    fn delete_label(&self, name: &str) -> Result<()> {
        self.write_tx(|tx| {
            let changed = tx.execute("DELETE FROM labels WHERE name = ?1", params![name])?;
            if changed == 0 {
                return Err(Error::not_found(Entity::Label, name));
            }
            Ok(())
        })
    }

    fn list_labels(&self, page: usize, per_page: usize) -> Result<Page<Label>> {
        let conn = self.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM labels", [], |row| row.get(0))?;
        let pagination = Pagination::new(page, clamp_per_page(per_page), total as usize);
        let Some((limit, offset)) = page_bounds(&pagination) else {
            return Ok(Page::with_total(pagination.total));
        };

        let mut stmt = conn
            .prepare("SELECT name, color, description FROM labels ORDER BY name LIMIT ?1 OFFSET ?2")?;
        let items = stmt
            .query_map(params![limit, offset], label_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: pagination.total,
        })
    }

    fn add_pull_request_label(&self, full_name: &str, number: u64, label: &str) -> Result<()> {
        self.add_link(ItemKind::PullRequest, full_name, number, label)
    }

    fn remove_pull_request_label(
        &self,
        full_name: &str,
        number: u64,
        label: &str,
    ) -> Result<()> {
        self.remove_link(ItemKind::PullRequest, full_name, number, label)
    }

    fn list_pull_request_labels(&self, full_name: &str, number: u64) -> Result<Vec<Label>> {
        self.list_links(ItemKind::PullRequest, full_name, number)
    }

    fn add_issue_label(&self, full_name: &str, number: u64, label: &str) -> Result<()> {
        self.add_link(ItemKind::Issue, full_name, number, label)
    }

    fn remove_issue_label(&self, full_name: &str, number: u64, label: &str) -> Result<()> {
        self.remove_link(ItemKind::Issue, full_name, number, label)
    }

    fn list_issue_labels(&self, full_name: &str, number: u64) -> Result<Vec<Label>> {
        self.list_links(ItemKind::Issue, full_name, number)
    }
}
