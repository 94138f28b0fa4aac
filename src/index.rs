//! Index: the SQLite-backed manifest mapping keys to row metadata.
//!
//! One table, `manifest`, is the single source of truth for every cached
//! entry: its size, timestamps, optional extended data, and either its
//! inline bytes or the name of a file holding them in the File Store.
//! Resilience to transient filesystem hiccups is handled by a small
//! capped-backoff state machine in [`Index::check`]; statement caching is
//! delegated to `rusqlite`'s own `prepare_cached`, which already keys on
//! exact SQL text and resets rather than re-prepares on reuse — exactly
//! the cache behavior this component is specified to have.

use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params_from_iter};

use crate::error::{Error, Result};
use crate::store::SharedFileStore;

/// Prior open failures tolerated before the index becomes permanently
/// unavailable for the life of the process.
const MAX_OPEN_FAILURES: u32 = 8;
/// Minimum backoff between retrying a failed open.
const OPEN_RETRY_SECS: i64 = 2;

/// Raw projection of a manifest row.
#[derive(Debug, Clone)]
pub(crate) struct RawRow {
    pub key: String,
    pub file_name: Option<String>,
    pub size: i64,
    pub inline_data: Option<Vec<u8>>,
    pub mod_time: i64,
    pub access_time: i64,
    pub extended_data: Option<Vec<u8>>,
}

/// `(key, file_name, size)` projection used by the LRU eviction cursor.
#[derive(Debug, Clone)]
pub(crate) struct SizeInfo {
    pub key: String,
    pub file_name: Option<String>,
    pub size: i64,
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) struct Index {
    db_path: PathBuf,
    file_store: SharedFileStore,
    conn: Option<Connection>,
    failure_count: u32,
    last_failure: Option<i64>,
    error_logs_enabled: bool,
}

impl Index {
    pub fn open(root: &Path, file_store: SharedFileStore, error_logs_enabled: bool) -> Self {
        let db_path = root.join("manifest.sqlite");
        let mut index = Self {
            db_path,
            file_store,
            conn: None,
            failure_count: 0,
            last_failure: None,
            error_logs_enabled,
        };
        let _ = index.try_open();
        index
    }

    fn log_err(&self, msg: impl AsRef<str>) {
        if self.error_logs_enabled {
            log::error!("{}", msg.as_ref());
        }
    }

    fn try_open(&mut self) -> Result<()> {
        match Self::open_connection(&self.db_path) {
            Ok(conn) => {
                self.conn = Some(conn);
                self.failure_count = 0;
                self.last_failure = None;
                Ok(())
            }
            Err(e) => {
                self.log_err(format!("failed to open cache manifest: {e}"));
                self.conn = None;
                self.failure_count = self.failure_count.saturating_add(1);
                self.last_failure = Some(now_secs());
                Err(e)
            }
        }
    }

    fn open_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.pragma_update(None, "synchronous", "normal")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS manifest (
                key text,
                filename text,
                size integer,
                inline_data blob,
                modification_time integer,
                last_access_time integer,
                extended_data blob,
                PRIMARY KEY(key)
            );
            CREATE INDEX IF NOT EXISTS last_access_time_idx ON manifest(last_access_time);
            "#,
        )?;
        Ok(conn)
    }

    /// Capped-backoff availability check, run before any query. Returns
    /// `true` and ensures `self.conn` is populated if the database is
    /// usable; `false` if unavailable (degraded and not yet eligible for
    /// retry, or permanently exhausted).
    fn check(&mut self) -> bool {
        if self.conn.is_some() {
            return true;
        }
        if self.failure_count >= MAX_OPEN_FAILURES {
            return false;
        }
        if let Some(last) = self.last_failure
            && now_secs() - last < OPEN_RETRY_SECS
        {
            return false;
        }
        self.try_open().is_ok()
    }

    fn with_conn<T>(&mut self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        if !self.check() {
            return Err(Error::Unavailable);
        }
        let conn = self.conn.as_ref().expect("checked above");
        f(conn).map_err(|e| {
            self.log_err(format!("index query failed: {e}"));
            Error::Index(e)
        })
    }

    /// Finalize cached statements and close the connection, retrying
    /// once if the handle is busy or locked.
    pub fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        conn.flush_prepared_statement_cache();
        if let Err((conn, e)) = conn.close() {
            log::warn!("cache manifest close failed, retrying: {e}");
            conn.flush_prepared_statement_cache();
            if let Err((_, e)) = conn.close() {
                self.log_err(format!("cache manifest close failed permanently: {e}"));
            }
        }
    }

    /// Delete the manifest triad, move `data/` to `trash/`, schedule the
    /// trash for async deletion, and reopen a fresh manifest.
    pub fn reset(&mut self) -> Result<()> {
        self.close();
        for suffix in ["", "-shm", "-wal"] {
            let path = append_suffix(&self.db_path, suffix);
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
        }
        self.file_store
            .move_all_to_trash()
            .map_err(|e| Error::ResetFailure {
                path: self.db_path.display().to_string(),
                reason: e.to_string(),
            })?;
        self.file_store.empty_trash_async();
        self.failure_count = 0;
        self.last_failure = None;
        self.try_open().map_err(|e| Error::ResetFailure {
            path: self.db_path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn save(
        &mut self,
        key: &str,
        value: &[u8],
        file_name: Option<&str>,
        extended: Option<&[u8]>,
    ) -> Result<()> {
        let now = now_secs();
        let size = value.len() as i64;
        let filename_param = file_name.unwrap_or("");
        let inline_param: &[u8] = if file_name.is_none() { value } else { b"" };
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR REPLACE INTO manifest
                 (key, filename, size, inline_data, modification_time, last_access_time, extended_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)",
            )?;
            stmt.execute(rusqlite::params![
                key,
                filename_param,
                size,
                inline_param,
                now,
                extended
            ])?;
            Ok(())
        })
    }

    pub fn update_access_time(&mut self, key: &str) -> Result<()> {
        let now = now_secs();
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached("UPDATE manifest SET last_access_time = ?1 WHERE key = ?2")?;
            stmt.execute(rusqlite::params![now, key])?;
            Ok(())
        })
    }

    pub fn update_access_time_many(&mut self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let now = now_secs();
        self.with_conn(|conn| {
            let placeholders = in_list_placeholders(keys.len(), 1);
            let sql = format!(
                "UPDATE manifest SET last_access_time = ?1 WHERE key IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut args: Vec<Value> = Vec::with_capacity(keys.len() + 1);
            args.push(Value::Integer(now));
            args.extend(keys.iter().cloned().map(Value::Text));
            stmt.execute(params_from_iter(args.iter()))?;
            Ok(())
        })
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.prepare_cached("DELETE FROM manifest WHERE key = ?1")?
                .execute([key])?;
            Ok(())
        })
    }

    pub fn delete_many(&mut self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let placeholders = in_list_placeholders(keys.len(), 0);
            let sql = format!("DELETE FROM manifest WHERE key IN ({placeholders})");
            let mut stmt = conn.prepare(&sql)?;
            stmt.execute(params_from_iter(keys.iter()))?;
            Ok(())
        })
    }

    pub fn delete_larger_than(&mut self, size: i64) -> Result<usize> {
        self.with_conn(|conn| {
            conn.prepare_cached("DELETE FROM manifest WHERE size > ?1")?
                .execute([size])
        })
    }

    pub fn delete_earlier_than(&mut self, time: i64) -> Result<usize> {
        self.with_conn(|conn| {
            conn.prepare_cached("DELETE FROM manifest WHERE last_access_time < ?1")?
                .execute([time])
        })
    }

    pub fn get_item(&mut self, key: &str, exclude_inline: bool) -> Result<Option<RawRow>> {
        let sql = if exclude_inline {
            "SELECT key, filename, size, NULL, modification_time, last_access_time, extended_data
             FROM manifest WHERE key = ?1"
        } else {
            "SELECT key, filename, size, inline_data, modification_time, last_access_time, extended_data
             FROM manifest WHERE key = ?1"
        };
        self.with_conn(|conn| {
            conn.prepare_cached(sql)?
                .query_row([key], row_to_raw)
                .optional()
        })
    }

    pub fn get_items(&mut self, keys: &[String], exclude_inline: bool) -> Result<Vec<RawRow>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = in_list_placeholders(keys.len(), 0);
        let inline_col = if exclude_inline { "NULL" } else { "inline_data" };
        let sql = format!(
            "SELECT key, filename, size, {inline_col}, modification_time, last_access_time, extended_data
             FROM manifest WHERE key IN ({placeholders})"
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(keys.iter()), row_to_raw)?;
            rows.collect()
        })
    }

    pub fn get_file_name(&mut self, key: &str) -> Result<Option<String>> {
        let name: Option<String> = self.with_conn(|conn| {
            conn.prepare_cached("SELECT filename FROM manifest WHERE key = ?1")?
                .query_row([key], |row| row.get::<_, String>(0))
                .optional()
        })?;
        Ok(name.filter(|n| !n.is_empty()))
    }

    pub fn get_file_names(&mut self, keys: &[String]) -> Result<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = in_list_placeholders(keys.len(), 0);
        let sql = format!(
            "SELECT filename FROM manifest WHERE key IN ({placeholders}) AND filename != ''"
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(keys.iter()), |row| row.get::<_, String>(0))?;
            rows.collect()
        })
    }

    pub fn get_file_names_larger_than(&mut self, size: i64) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT filename FROM manifest WHERE size > ?1 AND filename != ''",
            )?;
            let rows = stmt.query_map([size], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
    }

    pub fn get_file_names_earlier_than(&mut self, time: i64) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT filename FROM manifest WHERE last_access_time < ?1 AND filename != ''",
            )?;
            let rows = stmt.query_map([time], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
    }

    pub fn get_item_size_info_order_by_time_asc(&mut self, limit: i64) -> Result<Vec<SizeInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT key, filename, size FROM manifest ORDER BY last_access_time ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit], |row| {
                let filename: String = row.get(1)?;
                Ok(SizeInfo {
                    key: row.get(0)?,
                    file_name: (!filename.is_empty()).then_some(filename),
                    size: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }

    pub fn get_item_count(&mut self, key: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.prepare_cached("SELECT COUNT(*) FROM manifest WHERE key = ?1")?
                .query_row([key], |row| row.get(0))
        })
    }

    pub fn total_item_count(&mut self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.prepare_cached("SELECT COUNT(*) FROM manifest")?
                .query_row([], |row| row.get(0))
        })
    }

    pub fn total_item_size(&mut self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.prepare_cached("SELECT COALESCE(SUM(size), 0) FROM manifest")?
                .query_row([], |row| row.get(0))
        })
    }

    pub fn checkpoint(&mut self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);"))
    }
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    let filename: String = row.get(1)?;
    let inline_data: Option<Vec<u8>> = row.get(3)?;
    Ok(RawRow {
        key: row.get(0)?,
        file_name: (!filename.is_empty()).then_some(filename),
        size: row.get(2)?,
        inline_data: inline_data.filter(|d| !d.is_empty()),
        mod_time: row.get(4)?,
        access_time: row.get(5)?,
        extended_data: row.get(6)?,
    })
}

fn in_list_placeholders(count: usize, start_at: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", start_at + i + 1))
        .collect::<Vec<_>>()
        .join(", ")
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_index() -> (Index, TempDir) {
        let dir = TempDir::new().unwrap();
        let fs = Arc::new(FileStore::open(dir.path()).unwrap());
        (Index::open(dir.path(), fs, true), dir)
    }

    #[test]
    fn save_and_get_inline() {
        let (mut idx, _dir) = open_index();
        idx.save("a", b"hello", None, None).unwrap();
        let row = idx.get_item("a", false).unwrap().unwrap();
        assert_eq!(row.inline_data.unwrap(), b"hello");
        assert_eq!(row.file_name, None);
        assert_eq!(row.size, 5);
    }

    #[test]
    fn save_external_records_filename() {
        let (mut idx, _dir) = open_index();
        idx.save("a", b"hello", Some("blob-a"), Some(b"ext"))
            .unwrap();
        let row = idx.get_item("a", false).unwrap().unwrap();
        assert_eq!(row.file_name.as_deref(), Some("blob-a"));
        assert_eq!(row.extended_data.as_deref(), Some(&b"ext"[..]));
    }

    #[test]
    fn insert_or_replace_keeps_single_row() {
        let (mut idx, _dir) = open_index();
        idx.save("a", b"v1", None, None).unwrap();
        idx.save("a", b"v2", None, None).unwrap();
        assert_eq!(idx.total_item_count().unwrap(), 1);
        let row = idx.get_item("a", false).unwrap().unwrap();
        assert_eq!(row.inline_data.unwrap(), b"v2");
    }

    #[test]
    fn get_info_excludes_inline_data() {
        let (mut idx, _dir) = open_index();
        idx.save("a", b"hello", None, None).unwrap();
        let row = idx.get_item("a", true).unwrap().unwrap();
        assert!(row.inline_data.is_none());
    }

    #[test]
    fn lru_ordering() {
        let (mut idx, _dir) = open_index();
        idx.save("x", b"1", None, None).unwrap();
        idx.save("y", b"2", None, None).unwrap();
        idx.update_access_time("x").unwrap();
        let ordered = idx.get_item_size_info_order_by_time_asc(10).unwrap();
        assert_eq!(ordered[0].key, "y");
    }

    #[test]
    fn backoff_permanently_unavailable_after_max_failures() {
        let (mut idx, _dir) = open_index();
        idx.conn = None;
        idx.failure_count = MAX_OPEN_FAILURES;
        assert!(!idx.check());
    }

    #[test]
    fn backoff_respects_retry_window() {
        let (mut idx, _dir) = open_index();
        idx.conn = None;
        idx.failure_count = 1;
        idx.last_failure = Some(now_secs());
        assert!(!idx.check());
    }
}
