//! SQLite implementation of [`PrStore`].
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Timestamps
//!
//! Timestamps are stored as RFC 3339 UTC text with millisecond precision, so
//! lexical comparison in SQL matches chronological order.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tracing::warn;

use super::{
    AppliedIds, ConflictPolicy, PrStore, PullRequestListing, RepositorySummary, StoreError,
};
use crate::types::{
    PrNumber, PrState, PullRequestId, PullRequestSnapshot, RepoFullName, RepositoryId,
    RepositoryRef,
};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed store.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and brings its schema up to
    /// date. `":memory:"` opens a private in-memory database.
    ///
    /// # Configuration
    ///
    /// - `journal_mode = WAL` for concurrent readers during writes
    /// - `busy_timeout = 5000ms` to ride out short lock contention
    /// - `foreign_keys = ON` so a PR can never reference a missing repository
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::unavailable(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| StoreError::unavailable("open database", e.to_string()))?;

        // In-memory databases report "memory" and that is fine.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::unavailable("set journal_mode", e.to_string()))?;
        if !journal_mode.eq_ignore_ascii_case("wal")
            && !(is_in_memory && journal_mode.eq_ignore_ascii_case("memory"))
        {
            warn!(
                journal_mode = %journal_mode,
                "SQLite did not enable WAL mode; continuing with reduced concurrency"
            );
        }

        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| StoreError::unavailable("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::unavailable("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| StoreError::unavailable("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::unavailable(
                "schema version",
                format!(
                    "database schema version {} is newer than supported version {}",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS repositories (
                    id INTEGER PRIMARY KEY,
                    full_name TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    owner TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS pull_requests (
                    id INTEGER PRIMARY KEY,
                    repository_id INTEGER NOT NULL REFERENCES repositories(id),
                    number INTEGER NOT NULL CHECK (number >= 0),
                    title TEXT,
                    state TEXT CHECK (state IN ('open', 'closed', 'merged')),
                    author TEXT,
                    url TEXT,
                    source_created_at TEXT,
                    source_updated_at TEXT,
                    recorded_at TEXT NOT NULL,
                    UNIQUE (repository_id, number)
                );

                CREATE INDEX IF NOT EXISTS idx_pull_requests_recency
                    ON pull_requests(source_updated_at DESC, recorded_at DESC);
                "#,
            )
            .map_err(|e| StoreError::unavailable("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::unavailable("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Runs `f` against the connection on the blocking thread pool.
    ///
    /// `f` runs to completion even if the returned future is dropped, so a
    /// caller that times out may still see its write committed.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::unavailable(operation, "connection mutex poisoned"))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::unavailable(operation, e.to_string()))?
    }
}

/// Maps a rusqlite error onto the store's error taxonomy.
fn classify(operation: &'static str, err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation | ErrorCode::TypeMismatch | ErrorCode::TooBig => {
                StoreError::constraint(operation, err.to_string())
            }
            _ => StoreError::unavailable(operation, err.to_string()),
        },
        rusqlite::Error::ToSqlConversionFailure(_)
        | rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..)
        | rusqlite::Error::InvalidColumnType(..) => StoreError::constraint(operation, err.to_string()),
        _ => StoreError::unavailable(operation, err.to_string()),
    }
}

fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(column: &'static str, value: Option<String>) -> Option<DateTime<Utc>> {
    let value = value?;
    match DateTime::parse_from_rfc3339(&value) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            warn!(column, value = %value, error = %e, "Ignoring unparseable stored timestamp");
            None
        }
    }
}

fn upsert_repository_sync(
    conn: &Connection,
    repo: &RepositoryRef,
    now: &str,
) -> Result<RepositoryId, StoreError> {
    let id: Option<i64> = conn
        .query_row(
            "INSERT INTO repositories (full_name, name, owner, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(full_name) DO UPDATE SET
                 name = excluded.name,
                 owner = excluded.owner,
                 updated_at = excluded.updated_at
             RETURNING id",
            params![repo.full_name.as_str(), repo.name, repo.owner, now],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| classify("upsert repository", e))?;

    id.map(RepositoryId).ok_or(StoreError::MissingIdentifier {
        entity: "repository",
    })
}

fn upsert_pull_request_sync(
    conn: &Connection,
    repository_id: RepositoryId,
    pr: &PullRequestSnapshot,
    policy: ConflictPolicy,
    now: &str,
) -> Result<PullRequestId, StoreError> {
    let number = i64::try_from(pr.number.0).map_err(|_| {
        StoreError::constraint(
            "upsert pull request",
            format!("PR number {} does not fit in a signed 64-bit column", pr.number.0),
        )
    })?;
    let newer_only = policy == ConflictPolicy::NewerOnly;

    // When the stale-write guard suppresses the update, RETURNING yields no
    // row and the existing id is looked up separately.
    let id: Option<i64> = conn
        .query_row(
            "INSERT INTO pull_requests (repository_id, number, title, state, author, url,
                                        source_created_at, source_updated_at, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(repository_id, number) DO UPDATE SET
                 title = excluded.title,
                 state = excluded.state,
                 author = excluded.author,
                 url = excluded.url,
                 source_created_at = excluded.source_created_at,
                 source_updated_at = excluded.source_updated_at,
                 recorded_at = excluded.recorded_at
             WHERE ?10 = 0
                OR excluded.source_updated_at IS NULL
                OR pull_requests.source_updated_at IS NULL
                OR excluded.source_updated_at >= pull_requests.source_updated_at
             RETURNING id",
            params![
                repository_id.0,
                number,
                pr.title,
                pr.state.map(|s| s.as_str()),
                pr.author,
                pr.url,
                pr.source_created_at.as_ref().map(format_timestamp),
                pr.source_updated_at.as_ref().map(format_timestamp),
                now,
                newer_only,
            ],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| classify("upsert pull request", e))?;

    let id = match id {
        Some(id) => Some(id),
        None => conn
            .query_row(
                "SELECT id FROM pull_requests WHERE repository_id = ?1 AND number = ?2",
                params![repository_id.0, number],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| classify("look up pull request", e))?,
    };

    id.map(PullRequestId).ok_or(StoreError::MissingIdentifier {
        entity: "pull request",
    })
}

const LISTING_COLUMNS: &str = "p.id, p.number, p.title, p.state, p.author, p.url,
     p.source_created_at, p.source_updated_at,
     r.id, r.full_name, r.name, r.owner";

/// A listing row as read from SQLite, before domain conversion.
struct ListingRow {
    id: i64,
    number: i64,
    title: Option<String>,
    state: Option<String>,
    author: Option<String>,
    url: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    repository_id: i64,
    full_name: String,
    name: String,
    owner: String,
}

impl ListingRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ListingRow {
            id: row.get(0)?,
            number: row.get(1)?,
            title: row.get(2)?,
            state: row.get(3)?,
            author: row.get(4)?,
            url: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            repository_id: row.get(8)?,
            full_name: row.get(9)?,
            name: row.get(10)?,
            owner: row.get(11)?,
        })
    }

    fn into_listing(self) -> Result<PullRequestListing, StoreError> {
        let full_name = RepoFullName::parse(self.full_name)
            .map_err(|e| StoreError::constraint("read repository", e.to_string()))?;
        let number = u64::try_from(self.number).map_err(|_| {
            StoreError::constraint("read pull request", format!("negative PR number {}", self.number))
        })?;

        Ok(PullRequestListing {
            id: PullRequestId(self.id),
            number: PrNumber(number),
            title: self.title,
            state: self.state.as_deref().and_then(|s| PrState::from_github(s, false)),
            author: self.author,
            url: self.url,
            created_at: parse_timestamp("source_created_at", self.created_at),
            updated_at: parse_timestamp("source_updated_at", self.updated_at),
            repository: RepositorySummary {
                id: RepositoryId(self.repository_id),
                full_name,
                name: self.name,
                owner: self.owner,
            },
        })
    }
}

#[async_trait]
impl PrStore for SqliteStore {
    async fn upsert_repository(&self, repo: &RepositoryRef) -> Result<RepositoryId, StoreError> {
        let repo = repo.clone();
        self.with_conn("upsert repository", move |conn| {
            let now = format_timestamp(&Utc::now());
            upsert_repository_sync(conn, &repo, &now)
        })
        .await
    }

    async fn upsert_pull_request(
        &self,
        repository_id: RepositoryId,
        pr: &PullRequestSnapshot,
        policy: ConflictPolicy,
    ) -> Result<PullRequestId, StoreError> {
        let pr = pr.clone();
        self.with_conn("upsert pull request", move |conn| {
            let now = format_timestamp(&Utc::now());
            upsert_pull_request_sync(conn, repository_id, &pr, policy, &now)
        })
        .await
    }

    /// Runs both upserts in one transaction, so either both rows are written
    /// or neither is.
    async fn apply(
        &self,
        pr: &PullRequestSnapshot,
        policy: ConflictPolicy,
    ) -> Result<AppliedIds, StoreError> {
        let pr = pr.clone();
        self.with_conn("apply snapshot", move |conn| {
            let now = format_timestamp(&Utc::now());
            let tx = conn
                .transaction()
                .map_err(|e| classify("begin transaction", e))?;

            let repository_id = upsert_repository_sync(&tx, &pr.repo, &now)?;
            let pull_request_id = upsert_pull_request_sync(&tx, repository_id, &pr, policy, &now)?;

            tx.commit().map_err(|e| classify("commit transaction", e))?;

            Ok(AppliedIds {
                repository_id,
                pull_request_id,
            })
        })
        .await
    }

    async fn list_pull_requests(
        &self,
        limit: usize,
    ) -> Result<Vec<PullRequestListing>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn("list pull requests", move |conn| {
            let sql = format!(
                "SELECT {LISTING_COLUMNS}
                 FROM pull_requests p
                 JOIN repositories r ON r.id = p.repository_id
                 ORDER BY p.source_updated_at IS NULL,
                          p.source_updated_at DESC,
                          p.recorded_at DESC,
                          p.id DESC
                 LIMIT ?1"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| classify("list pull requests", e))?;

            let rows = stmt
                .query_map(params![limit], ListingRow::from_row)
                .map_err(|e| classify("list pull requests", e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| classify("list pull requests", e))?;

            rows.into_iter().map(ListingRow::into_listing).collect()
        })
        .await
    }

    async fn get_pull_request(
        &self,
        full_name: &RepoFullName,
        number: PrNumber,
    ) -> Result<Option<PullRequestListing>, StoreError> {
        let full_name = full_name.as_str().to_string();
        // Numbers beyond i64 can never have been stored.
        let Ok(number) = i64::try_from(number.0) else {
            return Ok(None);
        };

        self.with_conn("get pull request", move |conn| {
            let sql = format!(
                "SELECT {LISTING_COLUMNS}
                 FROM pull_requests p
                 JOIN repositories r ON r.id = p.repository_id
                 WHERE r.full_name = ?1 AND p.number = ?2"
            );
            conn.query_row(&sql, params![full_name, number], ListingRow::from_row)
                .optional()
                .map_err(|e| classify("get pull request", e))?
                .map(ListingRow::into_listing)
                .transpose()
        })
        .await
    }
}
