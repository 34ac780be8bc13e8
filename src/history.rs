//! Conversation history collaborator
//!
//! The live session treats history as a plain keyed append/query/delete
//! log behind the [`HistoryStore`] trait. [`SqliteHistory`] is the
//! bundled implementation: an r2d2-pooled `SQLite` database with RFC 3339
//! timestamps. No transactional guarantees beyond
//! last-write-visible-next-read.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use uuid::Uuid;

use crate::{Error, Result};

/// History database connection pool
type HistoryPool = Pool<SqliteConnectionManager>;

/// Who produced a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRole {
    User,
    Model,
}

impl EntryRole {
    const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "model" => Some(Self::Model),
            _ => None,
        }
    }
}

/// One entry in the conversation history
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: String,
    /// Grouping key (e.g. a live session id)
    pub category: String,
    pub role: EntryRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Create an entry with a fresh id and the current timestamp
    #[must_use]
    pub fn new(category: impl Into<String>, role: EntryRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            category: category.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Keyed append/query/delete log of conversation entries
pub trait HistoryStore: Send + Sync {
    /// List entries in a category, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    fn list(&self, category: &str) -> Result<Vec<HistoryEntry>>;

    /// Append an entry
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written.
    fn append(&self, entry: &HistoryEntry) -> Result<()>;

    /// Delete every entry in a category
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written.
    fn delete_all(&self, category: &str) -> Result<()>;
}

/// Shared handle to a history store
pub type SharedHistory = Arc<dyn HistoryStore>;

/// `SQLite`-backed history store
#[derive(Clone)]
pub struct SqliteHistory {
    pool: HistoryPool,
}

impl SqliteHistory {
    /// Open (or create) a history database at the given path
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or initialized.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        Self::with_manager(manager, 4)
    }

    /// Open an in-memory history store (for testing)
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be initialized.
    pub fn open_in_memory() -> Result<Self> {
        // Single connection so every caller sees the same memory database
        Self::with_manager(SqliteConnectionManager::memory(), 1)
    }

    fn with_manager(manager: SqliteConnectionManager, max_size: u32) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .map_err(|e| Error::History(e.to_string()))?;

        let conn = pool.get().map_err(|e| Error::History(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_category
                ON history (category, created_at);",
        )
        .map_err(|e| Error::History(e.to_string()))?;

        tracing::debug!("history store initialized");
        Ok(Self { pool })
    }
}

impl HistoryStore for SqliteHistory {
    fn list(&self, category: &str) -> Result<Vec<HistoryEntry>> {
        let conn = self.pool.get().map_err(|e| Error::History(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, category, role, content, created_at
                 FROM history WHERE category = ?1
                 ORDER BY created_at ASC, id ASC",
            )
            .map_err(|e| Error::History(e.to_string()))?;

        let entries = stmt
            .query_map([category], |row| {
                let role: String = row.get(2)?;
                let created_at: String = row.get(4)?;
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    category: row.get(1)?,
                    role: EntryRole::parse(&role).unwrap_or(EntryRole::User),
                    content: row.get(3)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_default(),
                })
            })
            .map_err(|e| Error::History(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(entries)
    }

    fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::History(e.to_string()))?;

        conn.execute(
            "INSERT INTO history (id, category, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                entry.id,
                entry.category,
                entry.role.as_str(),
                entry.content,
                entry.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::History(e.to_string()))?;

        Ok(())
    }

    fn delete_all(&self, category: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::History(e.to_string()))?;

        let deleted = conn
            .execute("DELETE FROM history WHERE category = ?1", [category])
            .map_err(|e| Error::History(e.to_string()))?;

        tracing::debug!(category, deleted, "history category cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_list_ordered() {
        let store = SqliteHistory::open_in_memory().unwrap();

        let mut first = HistoryEntry::new("live", EntryRole::User, "hello");
        let mut second = HistoryEntry::new("live", EntryRole::Model, "hi there");
        // Force distinct, ordered timestamps
        first.created_at = Utc::now() - chrono::Duration::seconds(2);
        second.created_at = Utc::now();

        store.append(&second).unwrap();
        store.append(&first).unwrap();

        let entries = store.list("live").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "hello");
        assert_eq!(entries[0].role, EntryRole::User);
        assert_eq!(entries[1].content, "hi there");
        assert_eq!(entries[1].role, EntryRole::Model);
    }

    #[test]
    fn test_categories_are_isolated() {
        let store = SqliteHistory::open_in_memory().unwrap();
        store
            .append(&HistoryEntry::new("a", EntryRole::User, "in a"))
            .unwrap();
        store
            .append(&HistoryEntry::new("b", EntryRole::User, "in b"))
            .unwrap();

        assert_eq!(store.list("a").unwrap().len(), 1);
        assert_eq!(store.list("b").unwrap().len(), 1);

        store.delete_all("a").unwrap();
        assert!(store.list("a").unwrap().is_empty());
        assert_eq!(store.list("b").unwrap().len(), 1);
    }

    #[test]
    fn test_delete_missing_category_is_ok() {
        let store = SqliteHistory::open_in_memory().unwrap();
        assert!(store.delete_all("nothing-here").is_ok());
    }

    #[test]
    fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");

        {
            let store = SqliteHistory::open(&path).unwrap();
            store
                .append(&HistoryEntry::new("live", EntryRole::User, "persisted"))
                .unwrap();
        }

        let store = SqliteHistory::open(&path).unwrap();
        let entries = store.list("live").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "persisted");
    }
}
