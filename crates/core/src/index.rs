//! Token index
//!
//! Persistent mapping between access tokens and stored files. Each record binds exactly one
//! token to exactly one canonical path, and the index enforces that in both directions.
//!
//! [`SqliteTokenIndex`] is the production backend. The [`TokenIndex`] trait exists so the
//! service can be exercised against other backends (tests use one that fails on demand).

use crate::error::{IndexError, IndexResult};
use filegate_files::{sanitize, CanonicalPath};
use filegate_token::AccessToken;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tokens (
    token          TEXT PRIMARY KEY NOT NULL,
    display_name   TEXT NOT NULL,
    canonical_path TEXT NOT NULL UNIQUE
);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One token-to-file binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub token: AccessToken,
    /// Name the file was uploaded under; used as the download filename
    pub display_name: String,
    pub canonical_path: CanonicalPath,
}

/// Storage backend for token records.
///
/// Implementations must be safe to share between request handlers.
pub trait TokenIndex: Send + Sync {
    /// Inserts a new record.
    ///
    /// Fails with [`IndexError::DuplicateToken`] or [`IndexError::DuplicatePath`] if either key
    /// is already bound; nothing is written in that case.
    fn put(&self, record: &FileRecord) -> IndexResult<()>;

    fn find_by_token(&self, token: &AccessToken) -> IndexResult<Option<FileRecord>>;

    fn find_by_path(&self, path: &CanonicalPath) -> IndexResult<Option<FileRecord>>;

    /// Removes the record for `path`, returning it so the caller can restore it later.
    fn delete_by_path(&self, path: &CanonicalPath) -> IndexResult<Option<FileRecord>>;
}

/// [`TokenIndex`] backed by a single SQLite database.
pub struct SqliteTokenIndex {
    conn: Mutex<Connection>,
}

impl SqliteTokenIndex {
    /// Opens (creating if needed) the index at `path`.
    pub fn open(path: &Path) -> IndexResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::init(conn)
    }

    /// Opens a private in-memory index.
    pub fn open_in_memory() -> IndexResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> IndexResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl TokenIndex for SqliteTokenIndex {
    fn put(&self, record: &FileRecord) -> IndexResult<()> {
        let token = record.token.to_string();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if exists(&tx, "SELECT EXISTS(SELECT 1 FROM tokens WHERE token = ?1)", &token)? {
            return Err(IndexError::DuplicateToken(token));
        }
        if exists(
            &tx,
            "SELECT EXISTS(SELECT 1 FROM tokens WHERE canonical_path = ?1)",
            record.canonical_path.as_str(),
        )? {
            return Err(IndexError::DuplicatePath(record.canonical_path.to_string()));
        }

        tx.execute(
            "INSERT INTO tokens (token, display_name, canonical_path) VALUES (?1, ?2, ?3)",
            params![token, record.display_name, record.canonical_path.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn find_by_token(&self, token: &AccessToken) -> IndexResult<Option<FileRecord>> {
        let conn = self.conn.lock();
        select_one(
            &conn,
            "SELECT token, display_name, canonical_path FROM tokens WHERE token = ?1",
            &token.to_string(),
        )
    }

    fn find_by_path(&self, path: &CanonicalPath) -> IndexResult<Option<FileRecord>> {
        let conn = self.conn.lock();
        select_one(
            &conn,
            "SELECT token, display_name, canonical_path FROM tokens WHERE canonical_path = ?1",
            path.as_str(),
        )
    }

    fn delete_by_path(&self, path: &CanonicalPath) -> IndexResult<Option<FileRecord>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let record = select_one(
            &tx,
            "SELECT token, display_name, canonical_path FROM tokens WHERE canonical_path = ?1",
            path.as_str(),
        )?;
        if record.is_some() {
            tx.execute(
                "DELETE FROM tokens WHERE canonical_path = ?1",
                params![path.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(record)
    }
}

fn exists(tx: &Transaction<'_>, sql: &str, key: &str) -> IndexResult<bool> {
    Ok(tx.query_row(sql, params![key], |row| row.get::<_, bool>(0))?)
}

fn select_one(conn: &Connection, sql: &str, key: &str) -> IndexResult<Option<FileRecord>> {
    let row = conn
        .query_row(sql, params![key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .optional()?;

    row.map(|(token, display_name, path)| record_from_columns(token, display_name, path))
        .transpose()
}

fn record_from_columns(token: String, display_name: String, path: String) -> IndexResult<FileRecord> {
    let token = AccessToken::parse(&token)
        .map_err(|e| IndexError::CorruptRecord(format!("bad token '{}': {}", token, e)))?;

    // Stored paths were canonical when written; re-sanitising must be a no-op.
    let canonical_path = sanitize(&path)
        .ok()
        .filter(|p| p.as_str() == path && !p.is_root())
        .ok_or_else(|| IndexError::CorruptRecord(format!("bad path '{}'", path)))?;

    Ok(FileRecord {
        token,
        display_name,
        canonical_path,
    })
}
