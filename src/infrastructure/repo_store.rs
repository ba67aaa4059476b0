//! Local SQLite storage for mirrored repositories.
//!
//! One table keyed by the remote id. Rows keep the position they were first
//! inserted at, so replacing a row in place never reorders the listing.
//! Every committed mutation bumps a generation counter and is published on
//! [`RepoStore::changes`] before the mutating call returns.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{AppError, RepoFilter, RepoRecord, Result};

use super::live::{lock, LiveStream, LiveValue, Publication};

const COLUMNS: &str = "id, name, full_name, fork, description, html_url, language, \
    stargazers_count, forks_count, owner_login, owner_avatar_url, owner_html_url, updated_at";

/// What a committed mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Initial value published when the store is opened.
    Opened,
    Upserted { rows: usize },
    Cleared { removed: usize },
}

/// Notification published after every committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    /// Monotonic; 0 until the first mutation.
    pub generation: u64,
    pub kind: ChangeKind,
}

struct StoreInner {
    conn: Mutex<Connection>,
    // Serializes mutate-then-stage so generations are published in order.
    write: Mutex<()>,
    generation: AtomicU64,
    changes: LiveValue<StoreChange>,
}

/// Repository table backed by `SQLite`. Cheap to clone.
#[derive(Clone)]
pub struct RepoStore {
    inner: Arc<StoreInner>,
}

impl RepoStore {
    /// Opens or creates the store database.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or schema creation fails.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::io("Failed to create storage directory", e))?;
        }

        let conn = Connection::open(path).map_err(AppError::database)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(AppError::database)?;

        Self::with_connection(conn)
    }

    /// Opens a private in-memory store.
    ///
    /// # Errors
    /// Returns error if schema creation fails.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::database)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;

        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                write: Mutex::new(()),
                generation: AtomicU64::new(0),
                changes: LiveValue::new(StoreChange {
                    generation: 0,
                    kind: ChangeKind::Opened,
                }),
            }),
        })
    }

    /// Mutation notifications, delivered in generation order. Listeners may
    /// read from the store; a write made from a listener is delivered after
    /// that listener returns.
    #[must_use]
    pub fn changes(&self) -> &LiveValue<StoreChange> {
        &self.inner.changes
    }

    /// Generation of the last committed mutation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Insert or replace a single record.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub fn upsert(&self, record: &RepoRecord) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(record)).map(|_| ())
    }

    /// Insert or replace records in one transaction.
    ///
    /// Readers see either none or all of the batch. An empty batch is not a
    /// mutation and publishes nothing.
    ///
    /// # Errors
    /// Returns error if any write fails; nothing is applied in that case.
    pub fn upsert_batch(&self, records: &[RepoRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let write = lock(&self.inner.write);
        {
            let mut conn = lock(&self.inner.conn);
            let tx = conn.transaction().map_err(AppError::database)?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        r"
                INSERT INTO repos
                    (id, position, name, full_name, fork, description, html_url, language,
                     stargazers_count, forks_count, owner_login, owner_avatar_url,
                     owner_html_url, updated_at)
                VALUES
                    (?1, (SELECT COALESCE(MAX(position), 0) + 1 FROM repos), ?2, ?3, ?4, ?5,
                     ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    full_name = excluded.full_name,
                    fork = excluded.fork,
                    description = excluded.description,
                    html_url = excluded.html_url,
                    language = excluded.language,
                    stargazers_count = excluded.stargazers_count,
                    forks_count = excluded.forks_count,
                    owner_login = excluded.owner_login,
                    owner_avatar_url = excluded.owner_avatar_url,
                    owner_html_url = excluded.owner_html_url,
                    updated_at = excluded.updated_at,
                    synced_at = datetime('now')
                ",
                    )
                    .map_err(AppError::database)?;

                for record in records {
                    stmt.execute(params![
                        record.id,
                        &record.name,
                        &record.full_name,
                        record.fork,
                        &record.description,
                        &record.html_url,
                        &record.language,
                        to_sql_count(record.stargazers_count),
                        to_sql_count(record.forks_count),
                        &record.owner_login,
                        &record.owner_avatar_url,
                        &record.owner_html_url,
                        record.updated_at.map(|dt| dt.to_rfc3339()),
                    ])
                    .map_err(AppError::database)?;
                }
            }
            tx.commit().map_err(AppError::database)?;
        }

        tracing::debug!(rows = records.len(), "Upserted repositories");
        let publication = self.stage(ChangeKind::Upserted {
            rows: records.len(),
        });
        drop(write);
        publication.flush();

        Ok(records.len())
    }

    /// Remove every row. Returns the number of rows removed.
    ///
    /// # Errors
    /// Returns error if the delete fails.
    pub fn clear(&self) -> Result<usize> {
        let write = lock(&self.inner.write);
        let removed = lock(&self.inner.conn)
            .execute("DELETE FROM repos", [])
            .map_err(AppError::database)?;

        tracing::debug!(removed, "Cleared repository table");
        let publication = self.stage(ChangeKind::Cleared { removed });
        drop(write);
        publication.flush();

        Ok(removed)
    }

    // Called with the write lock held, so generations are staged in order.
    fn stage(&self, kind: ChangeKind) -> Publication {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.changes.stage(StoreChange { generation, kind })
    }

    /// Live listing of every row, in listing order.
    #[must_use]
    pub fn stream_all(&self) -> LiveStream<Vec<RepoRecord>> {
        self.stream_filtered(RepoFilter::All)
    }

    /// Live listing of rows matching `filter`.
    ///
    /// The first item is the current content; a new item follows every
    /// mutation. The stream ends if the store is dropped or a re-query fails.
    #[must_use]
    pub fn stream_filtered(&self, filter: RepoFilter) -> LiveStream<Vec<RepoRecord>> {
        let (tx, stream) = LiveStream::channel();
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);

        self.inner.changes.observe(move |_| {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            match (Self { inner }).snapshot(filter) {
                Ok(rows) => tx.send(rows).is_ok(),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to re-query repositories");
                    false
                }
            }
        });

        stream
    }

    /// All rows matching `filter`, read once.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn snapshot(&self, filter: RepoFilter) -> Result<Vec<RepoRecord>> {
        self.load_range(filter, 0, usize::MAX)
    }

    /// Rows `[offset, offset + limit)` of the filtered listing.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn load_range(
        &self,
        filter: RepoFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RepoRecord>> {
        let conn = lock(&self.inner.conn);
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {COLUMNS} FROM repos
                 WHERE (?1 IS NULL OR fork = ?1)
                 ORDER BY position
                 LIMIT ?2 OFFSET ?3"
            ))
            .map_err(AppError::database)?;

        let rows = stmt
            .query_map(
                params![fork_param(filter), to_sql_int(limit), to_sql_int(offset)],
                row_to_record,
            )
            .map_err(AppError::database)?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(AppError::database)
    }

    /// Fetch a single row by id.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn get(&self, id: i64) -> Result<Option<RepoRecord>> {
        lock(&self.inner.conn)
            .query_row(
                &format!("SELECT {COLUMNS} FROM repos WHERE id = ?1"),
                [id],
                row_to_record,
            )
            .optional()
            .map_err(AppError::database)
    }

    /// Index of `id` within the filtered listing, if present and matching.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn position_of(&self, filter: RepoFilter, id: i64) -> Result<Option<usize>> {
        let conn = lock(&self.inner.conn);

        let row: Option<(i64, bool)> = conn
            .query_row(
                "SELECT position, fork FROM repos WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(AppError::database)?;

        let Some((position, fork)) = row else {
            return Ok(None);
        };
        if matches!(filter, RepoFilter::Fork(f) if f != fork) {
            return Ok(None);
        }

        conn.query_row(
            "SELECT COUNT(*) FROM repos WHERE (?1 IS NULL OR fork = ?1) AND position < ?2",
            params![fork_param(filter), position],
            |row| row.get::<_, i64>(0),
        )
        .map(|c| Some(from_sql_int(c)))
        .map_err(AppError::database)
    }

    /// Total row count.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn count(&self) -> Result<usize> {
        self.count_filtered(RepoFilter::All)
    }

    /// Row count of the filtered listing.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn count_filtered(&self, filter: RepoFilter) -> Result<usize> {
        lock(&self.inner.conn)
            .query_row(
                "SELECT COUNT(*) FROM repos WHERE (?1 IS NULL OR fork = ?1)",
                [fork_param(filter)],
                |row| row.get::<_, i64>(0),
            )
            .map(from_sql_int)
            .map_err(AppError::database)
    }

    /// Size of the database file in bytes; 0 for in-memory stores.
    ///
    /// # Errors
    /// Returns error if the file metadata cannot be read.
    pub fn storage_size(&self) -> Result<u64> {
        let conn = lock(&self.inner.conn);
        let path = match conn.path() {
            Some(p) if !p.is_empty() => Path::new(p),
            _ => return Ok(0),
        };
        let metadata = std::fs::metadata(path)
            .map_err(|e| AppError::io("Failed to get storage size", e))?;
        Ok(metadata.len())
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        lock(&self.inner.conn)
            .execute_batch(sql)
            .map_err(AppError::database)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS repos (
            id INTEGER PRIMARY KEY,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            full_name TEXT NOT NULL DEFAULT '',
            fork INTEGER NOT NULL DEFAULT 0,
            description TEXT,
            html_url TEXT NOT NULL,
            language TEXT,
            stargazers_count INTEGER NOT NULL DEFAULT 0,
            forks_count INTEGER NOT NULL DEFAULT 0,
            owner_login TEXT NOT NULL DEFAULT '',
            owner_avatar_url TEXT,
            owner_html_url TEXT,
            updated_at TEXT,
            synced_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_repos_position
            ON repos(position);
        CREATE INDEX IF NOT EXISTS idx_repos_fork_position
            ON repos(fork, position);
        ",
    )
    .map_err(AppError::database)
}

const fn fork_param(filter: RepoFilter) -> Option<bool> {
    match filter {
        RepoFilter::All => None,
        RepoFilter::Fork(fork) => Some(fork),
    }
}

fn to_sql_int(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_sql_int(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<RepoRecord> {
    let updated_at_str: Option<String> = row.get(12)?;
    let updated_at = updated_at_str
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(RepoRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        full_name: row.get(2)?,
        fork: row.get(3)?,
        description: row.get(4)?,
        html_url: row.get(5)?,
        language: row.get(6)?,
        stargazers_count: u64::try_from(row.get::<_, i64>(7)?).unwrap_or(0),
        forks_count: u64::try_from(row.get::<_, i64>(8)?).unwrap_or(0),
        owner_login: row.get(9)?,
        owner_avatar_url: row.get(10)?,
        owner_html_url: row.get(11)?,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ids(rows: &[RepoRecord]) -> Vec<i64> {
        rows.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("repos.db");

        let store = RepoStore::open(&db_path).unwrap();

        assert!(db_path.exists());
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.storage_size().is_ok());
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("repos.db");

        {
            let store = RepoStore::open(&db_path).unwrap();
            store.upsert(&RepoRecord::new(7, "kept")).unwrap();
        }

        let store = RepoStore::open(&db_path).unwrap();
        assert_eq!(store.get(7).unwrap().map(|r| r.name), Some("kept".into()));
    }

    #[test]
    fn test_upsert_same_record_twice_is_idempotent() {
        let store = RepoStore::open_in_memory().unwrap();
        let record = RepoRecord::new(1, "alpha");

        store.upsert(&record).unwrap();
        store.upsert(&record).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        let renamed = RepoRecord {
            name: "alpha-2".into(),
            ..record
        };
        store.upsert(&renamed).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get(1).unwrap(), Some(renamed));
    }

    #[test]
    fn test_failed_batch_applies_nothing() {
        let store = RepoStore::open_in_memory().unwrap();
        store
            .execute_raw(
                "CREATE TRIGGER reject_three BEFORE INSERT ON repos
                 WHEN NEW.id = 3
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        let mut changes = store.changes().subscribe();
        changes.drain();

        let batch: Vec<_> = (1..=4).map(|i| RepoRecord::new(i, format!("r{i}"))).collect();
        let result = store.upsert_batch(&batch);

        assert!(matches!(result, Err(AppError::Database { .. })));
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.generation(), 0);
        assert!(changes.drain().is_empty());
    }

    #[test]
    fn test_counts_beyond_sql_range_are_clamped() {
        let store = RepoStore::open_in_memory().unwrap();
        let record = RepoRecord {
            stargazers_count: u64::MAX,
            ..RepoRecord::new(1, "huge")
        };

        store.upsert(&record).unwrap();

        let stored = store.get(1).unwrap().unwrap();
        assert_eq!(stored.stargazers_count, u64::try_from(i64::MAX).unwrap());
        assert_eq!(stored.forks_count, 0);
    }

    #[test]
    fn test_listing_keeps_first_insertion_order_across_replace() {
        let store = RepoStore::open_in_memory().unwrap();
        store
            .upsert_batch(&[
                RepoRecord::new(30, "c"),
                RepoRecord::new(10, "a"),
                RepoRecord::new(20, "b"),
            ])
            .unwrap();

        store
            .upsert(&RepoRecord::new(30, "c").with_description("updated"))
            .unwrap();

        let rows = store.snapshot(RepoFilter::All).unwrap();
        assert_eq!(ids(&rows), vec![30, 10, 20]);
        assert_eq!(rows[0].description.as_deref(), Some("updated"));
    }

    #[test]
    fn test_full_record_roundtrip() {
        let store = RepoStore::open_in_memory().unwrap();
        let record = RepoRecord {
            language: Some("Rust".into()),
            stargazers_count: 42,
            forks_count: 3,
            owner_avatar_url: Some("https://avatars.example/1".into()),
            owner_html_url: Some("https://github.com/example".into()),
            updated_at: DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            ..RepoRecord::new(5, "full").forked().with_description("desc")
        };

        store.upsert(&record).unwrap();

        assert_eq!(store.get(5).unwrap(), Some(record));
    }

    #[test]
    fn test_filtered_reads() {
        let store = RepoStore::open_in_memory().unwrap();
        store
            .upsert_batch(&[
                RepoRecord::new(1, "a"),
                RepoRecord::new(2, "b").forked(),
                RepoRecord::new(3, "c"),
            ])
            .unwrap();

        let sources = store.snapshot(RepoFilter::Fork(false)).unwrap();
        assert_eq!(ids(&sources), vec![1, 3]);
        assert_eq!(store.count_filtered(RepoFilter::Fork(true)).unwrap(), 1);
        assert_eq!(store.position_of(RepoFilter::Fork(false), 3).unwrap(), Some(1));
        assert_eq!(store.position_of(RepoFilter::Fork(false), 2).unwrap(), None);
        assert_eq!(store.position_of(RepoFilter::All, 3).unwrap(), Some(2));
        assert_eq!(store.position_of(RepoFilter::All, 99).unwrap(), None);
    }

    #[test]
    fn test_load_range_pages() {
        let store = RepoStore::open_in_memory().unwrap();
        let records: Vec<_> = (1..=10).map(|i| RepoRecord::new(i, format!("r{i}"))).collect();
        store.upsert_batch(&records).unwrap();

        let page = store.load_range(RepoFilter::All, 4, 3).unwrap();
        assert_eq!(ids(&page), vec![5, 6, 7]);

        let tail = store.load_range(RepoFilter::All, 8, 5).unwrap();
        assert_eq!(ids(&tail), vec![9, 10]);
    }

    #[test]
    fn test_clear_empties_table_and_stream() {
        let store = RepoStore::open_in_memory().unwrap();
        store
            .upsert_batch(&[RepoRecord::new(1, "a"), RepoRecord::new(2, "b")])
            .unwrap();

        assert_eq!(store.clear().unwrap(), 2);

        let mut stream = store.stream_all();
        assert_eq!(stream.try_next(), Some(Vec::new()));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_stream_notifies_before_mutation_returns() {
        let store = RepoStore::open_in_memory().unwrap();
        let mut all = store.stream_all();
        let mut sources = store.stream_filtered(RepoFilter::Fork(false));

        store
            .upsert_batch(&[RepoRecord::new(1, "a"), RepoRecord::new(2, "b").forked()])
            .unwrap();
        let removed = store.clear().unwrap();
        assert_eq!(removed, 2);

        let seen: Vec<Vec<i64>> = all.drain().iter().map(|rows| ids(rows)).collect();
        assert_eq!(seen, vec![vec![], vec![1, 2], vec![]]);

        let seen: Vec<Vec<i64>> = sources.drain().iter().map(|rows| ids(rows)).collect();
        assert_eq!(seen, vec![vec![], vec![1], vec![]]);
    }

    #[test]
    fn test_changes_carry_increasing_generations() {
        let store = RepoStore::open_in_memory().unwrap();
        let mut changes = store.changes().subscribe();

        store.upsert_batch(&[]).unwrap();
        store.upsert(&RepoRecord::new(1, "a")).unwrap();
        store.clear().unwrap();

        let seen = changes.drain();
        assert_eq!(
            seen,
            vec![
                StoreChange { generation: 0, kind: ChangeKind::Opened },
                StoreChange { generation: 1, kind: ChangeKind::Upserted { rows: 1 } },
                StoreChange { generation: 2, kind: ChangeKind::Cleared { removed: 1 } },
            ]
        );
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn test_positions_restart_after_clear() {
        let store = RepoStore::open_in_memory().unwrap();
        store.upsert_batch(&[RepoRecord::new(1, "a"), RepoRecord::new(2, "b")]).unwrap();
        store.clear().unwrap();
        store.upsert_batch(&[RepoRecord::new(2, "b"), RepoRecord::new(1, "a")]).unwrap();

        assert_eq!(ids(&store.snapshot(RepoFilter::All).unwrap()), vec![2, 1]);
    }
}
