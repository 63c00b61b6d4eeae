//! Access to the Synology AutoBlock database.
//!
//! The reconciliation engine only talks to the [`DenyStore`] trait. The
//! production implementation is [`SqliteStore`], a thin layer over the
//! `AutoBlockIP` table; every mutating call runs in its own transaction and is
//! committed before returning, so the lock window is bounded by one call.

use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{AutoBlockError, Result};
use crate::record::AddressRecord;

#[cfg(test)]
use mockall::automock;

const TABLE_NAME: &str = "AutoBlockIP";

/// Rows a batched delete applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePredicate {
    /// Denied rows with a non-zero expiry strictly before `now`
    Expired { now: i64 },
    /// Every denied row
    AllDenied,
}

/// SQLite rollback journal mode used while mutating.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Memory,
    /// No journal at all: a crash mid-write can corrupt the database
    Off,
}

impl JournalMode {
    fn as_pragma(self) -> &'static str {
        match self {
            JournalMode::Memory => "MEMORY",
            JournalMode::Off => "OFF",
        }
    }
}

/// Operations the reconciliation engine issues against the deny-list.
#[cfg_attr(test, automock)]
pub trait DenyStore {
    /// Delete at most `limit` rows matching `predicate` and commit.
    /// Returns the number of rows deleted.
    fn delete_batch(&mut self, predicate: DeletePredicate, limit: usize) -> Result<usize>;

    /// Insert-or-replace every record in one committed transaction.
    /// Nothing is kept if any row fails.
    fn upsert(&mut self, records: &[AddressRecord]) -> Result<usize>;

    /// Number of denied rows.
    fn count_denied(&self) -> Result<u64>;

    /// Reclaim space after large deletes.
    fn compact(&mut self) -> Result<()>;
}

/// [`DenyStore`] backed by the AutoBlock SQLite file.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    /// Open an existing database for reading and writing.
    ///
    /// Fails with [`AutoBlockError::StoreUnavailable`] if the file does not
    /// exist, cannot be opened or has no AutoBlock table. The file is never
    /// created here.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_WRITE)
    }

    /// Open an existing database without write access (dry runs).
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)
    }

    fn open_with(path: &Path, flags: OpenFlags) -> Result<Self> {
        if !path.is_file() {
            return Err(AutoBlockError::StoreUnavailable(format!(
                "no such file: {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(path, flags | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .map_err(|e| {
                AutoBlockError::StoreUnavailable(format!("{}: {}", path.display(), e))
            })?;

        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        if !store.has_table().map_err(|e| {
            AutoBlockError::StoreUnavailable(format!("{}: {}", path.display(), e))
        })? {
            return Err(AutoBlockError::StoreUnavailable(format!(
                "{} has no {} table",
                path.display(),
                TABLE_NAME
            )));
        }

        debug!("Opened AutoBlock database {}", path.display());
        Ok(store)
    }

    /// Create a database file with the AutoBlock schema if missing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// In-memory database with the AutoBlock schema.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Create the AutoBlock table as DSM lays it out.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS AutoBlockIP (
                IP varchar(50) PRIMARY KEY,
                RecordTime date NOT NULL,
                ExpireTime date NOT NULL,
                Deny boolean NOT NULL,
                IPStd varchar(50) NOT NULL,
                Type INTEGER,
                Meta varchar(256)
            );",
        )?;
        Ok(())
    }

    /// Switch the rollback journal mode for this connection.
    pub fn set_journal_mode(&self, mode: JournalMode) -> Result<()> {
        self.conn
            .pragma_update(None, "journal_mode", mode.as_pragma())?;
        debug!("Journal mode set to {}", mode.as_pragma());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn has_table(&self) -> rusqlite::Result<bool> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![TABLE_NAME],
            |row| row.get::<_, i64>(0).map(|n| n > 0),
        )
    }
}

/// Row inspection and seeding for tests.
#[cfg(test)]
impl SqliteStore {
    /// Look up a stored row: (IPStd, ExpireTime, Deny).
    pub fn get(&self, address: &str) -> Result<Option<(String, i64, bool)>> {
        use rusqlite::OptionalExtension;

        let row = self
            .conn
            .query_row(
                "SELECT IPStd, ExpireTime, Deny FROM AutoBlockIP WHERE IP = ?1",
                params![address],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// Insert a raw row, bypassing the deny-only upsert.
    pub fn insert_raw(&self, address: &str, expire_at: i64, deny: bool) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO AutoBlockIP (IP, IPStd, ExpireTime, Deny, RecordTime, Type, Meta)
             VALUES (?1, '', ?2, ?3, 0, 0, NULL)",
            params![address, expire_at, deny],
        )?;
        Ok(())
    }
}

impl DenyStore for SqliteStore {
    fn delete_batch(&mut self, predicate: DeletePredicate, limit: usize) -> Result<usize> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let tx = self.conn.transaction()?;
        let deleted = match predicate {
            DeletePredicate::Expired { now } => tx.execute(
                "DELETE FROM AutoBlockIP WHERE rowid IN (
                    SELECT rowid FROM AutoBlockIP
                    WHERE Deny = 1 AND ExpireTime > 0 AND ExpireTime < ?1
                    LIMIT ?2
                )",
                params![now, limit],
            )?,
            DeletePredicate::AllDenied => tx.execute(
                "DELETE FROM AutoBlockIP WHERE rowid IN (
                    SELECT rowid FROM AutoBlockIP WHERE Deny = 1 LIMIT ?1
                )",
                params![limit],
            )?,
        };
        tx.commit()?;
        Ok(deleted)
    }

    fn upsert(&mut self, records: &[AddressRecord]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "REPLACE INTO AutoBlockIP (IP, IPStd, ExpireTime, Deny, RecordTime, Type, Meta)
                 VALUES (?1, ?2, ?3, 1, CAST(strftime('%s', 'now') AS INTEGER), 0, NULL)",
            )?;
            for record in records {
                stmt.execute(params![record.address, record.canonical, record.expire_at])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn count_denied(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(IP) FROM AutoBlockIP WHERE Deny = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn compact(&mut self) -> Result<()> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(address: &str, expire_at: i64) -> AddressRecord {
        AddressRecord::from_addr(address.parse().unwrap(), expire_at)
    }

    #[test]
    fn test_upsert_and_count() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let n = store
            .upsert(&[record("10.0.0.1", 0), record("10.0.0.2", 0)])
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.count_denied().unwrap(), 2);

        let (canonical, expire, deny) = store.get("10.0.0.1").unwrap().unwrap();
        assert_eq!(canonical, "0000:0000:0000:0000:0000:FFFF:0A00:0001");
        assert_eq!(expire, 0);
        assert!(deny);
    }

    #[test]
    fn test_upsert_replaces_on_address() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&[record("10.0.0.1", 100)]).unwrap();
        store.upsert(&[record("10.0.0.1", 200)]).unwrap();
        assert_eq!(store.count_denied().unwrap(), 1);
        assert_eq!(store.get("10.0.0.1").unwrap().unwrap().1, 200);
    }

    #[test]
    fn test_upsert_overrides_allow_entry() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.insert_raw("10.0.0.1", 0, false).unwrap();
        assert_eq!(store.count_denied().unwrap(), 0);
        store.upsert(&[record("10.0.0.1", 0)]).unwrap();
        assert_eq!(store.count_denied().unwrap(), 1);
    }

    #[test]
    fn test_delete_expired_batch() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.insert_raw("10.0.0.1", 50, true).unwrap();
        store.insert_raw("10.0.0.2", 150, true).unwrap();
        store.insert_raw("10.0.0.3", 0, true).unwrap();
        store.insert_raw("10.0.0.4", 50, false).unwrap();

        let deleted = store
            .delete_batch(DeletePredicate::Expired { now: 100 }, 10)
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get("10.0.0.1").unwrap().is_none());
        assert!(store.get("10.0.0.4").unwrap().is_some());
        assert_eq!(store.count_denied().unwrap(), 2);
    }

    #[test]
    fn test_delete_all_denied_respects_limit() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.insert_raw("10.0.0.1", 0, false).unwrap();
        for i in 2..=6 {
            store.insert_raw(&format!("10.0.0.{}", i), 0, true).unwrap();
        }

        assert_eq!(store.delete_batch(DeletePredicate::AllDenied, 2).unwrap(), 2);
        assert_eq!(store.count_denied().unwrap(), 3);
        assert_eq!(store.delete_batch(DeletePredicate::AllDenied, 10).unwrap(), 3);
        assert_eq!(store.delete_batch(DeletePredicate::AllDenied, 10).unwrap(), 0);
        // Allow entries survive a clear
        assert!(store.get("10.0.0.1").unwrap().is_some());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = SqliteStore::open(dir.path().join("missing.db"));
        assert!(matches!(result, Err(AutoBlockError::StoreUnavailable(_))));
        assert!(!dir.path().join("missing.db").exists());
    }

    #[test]
    fn test_open_without_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE other (x INTEGER);")
            .unwrap();
        assert!(matches!(
            SqliteStore::open(&path),
            Err(AutoBlockError::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_open_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("synoautoblock.db");
        {
            let mut store = SqliteStore::create(&path).unwrap();
            store.upsert(&[record("1.2.3.4", 0)]).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        store.set_journal_mode(JournalMode::Memory).unwrap();
        assert_eq!(store.count_denied().unwrap(), 1);
        assert_eq!(store.path(), path.as_path());

        let read_only = SqliteStore::open_read_only(&path).unwrap();
        assert_eq!(read_only.count_denied().unwrap(), 1);
    }

    #[test]
    fn test_compact() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&[record("1.2.3.4", 0)]).unwrap();
        store.delete_batch(DeletePredicate::AllDenied, 10).unwrap();
        store.compact().unwrap();
        assert_eq!(store.count_denied().unwrap(), 0);
    }
}
