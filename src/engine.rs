//! Storage Engine: combines the Index and File Store into the single
//! source-of-truth cache primitive.
//!
//! The engine is deliberately not internally synchronized — it assumes
//! single-threaded access per instance, the same assumption the
//! higher-level façade's mutex exists to uphold.

use std::path::Path;
use std::sync::Arc;

use crate::entry::{Entry, EntryInfo};
use crate::error::{Error, Result};
use crate::index::Index;
use crate::store::FileStore;

/// Per-process PATH_MAX headroom left for nested `data/`/`trash/` entries.
const PATH_HEADROOM: usize = 64;
const DEFAULT_PATH_MAX: usize = 4096;

/// Storage mode fixed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Every entry's bytes live in a Blob File; `inline_data` is always empty.
    File,
    /// Every entry's bytes live inline; no Blob Files are ever created.
    Sql,
    /// Per-write choice: inline if the caller passes no file name, external otherwise.
    Mix,
}

/// Batch size used by the LRU eviction cursor for bounded eviction.
const EVICT_BATCH: i64 = 16;
/// Batch size used by `remove_all_with_progress`.
const PROGRESS_BATCH: i64 = 32;

pub struct StorageEngine {
    mode: CacheMode,
    index: Index,
    file_store: Arc<FileStore>,
    error_logs_enabled: bool,
}

impl StorageEngine {
    pub fn open(root: &Path, mode: CacheMode, error_logs_enabled: bool) -> Result<Self> {
        let len = root.as_os_str().len();
        if len > DEFAULT_PATH_MAX - PATH_HEADROOM {
            return Err(Error::PathTooLong {
                len,
                limit: DEFAULT_PATH_MAX - PATH_HEADROOM,
            });
        }
        std::fs::create_dir_all(root)?;
        let file_store = Arc::new(FileStore::open(root)?);
        let index = Index::open(root, Arc::clone(&file_store), error_logs_enabled);
        Ok(Self {
            mode,
            index,
            file_store,
            error_logs_enabled,
        })
    }

    fn log_err(&self, msg: impl AsRef<str>) {
        if self.error_logs_enabled {
            log::error!("{}", msg.as_ref());
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Insert-or-replace `key` with `value`. In `File` mode `file_name`
    /// must be present and non-empty. When writing externally the blob
    /// is written before the index row references it; when replacing a
    /// previously external entry with an inline one, the old blob is
    /// deleted only after the index row has been overwritten.
    pub fn save(
        &mut self,
        key: &str,
        value: &[u8],
        file_name: Option<&str>,
        extended: Option<&[u8]>,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(Error::BadArgument("key must not be empty"));
        }
        if value.is_empty() {
            return Err(Error::BadArgument("value must not be empty"));
        }

        let file_name = match self.mode {
            CacheMode::File => {
                let name = file_name
                    .filter(|n| !n.is_empty())
                    .ok_or(Error::BadArgument("file mode requires a non-empty file name"))?;
                Some(name)
            }
            CacheMode::Sql => None,
            CacheMode::Mix => file_name.filter(|n| !n.is_empty()),
        };

        match file_name {
            Some(name) => {
                // Captured before the row is overwritten, per the ordering
                // rule: an index row must not be overwritten until any
                // replaced row's Blob File has been identified for deletion.
                let previous_file = self.index.get_file_name(key)?;
                if !self.file_store.write(name, value) {
                    return Err(Error::Io(format!("failed to write blob {name}")));
                }
                if let Err(e) = self.index.save(key, value, Some(name), extended) {
                    self.file_store.delete(name);
                    return Err(e);
                }
                if let Some(old) = previous_file
                    && old != name
                {
                    self.file_store.delete(&old);
                }
                Ok(())
            }
            None => {
                let previous_file = self.index.get_file_name(key)?;
                self.index.save(key, value, None, extended)?;
                if let Some(old) = previous_file {
                    self.file_store.delete(&old);
                }
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        if !matches!(self.mode, CacheMode::Sql)
            && let Some(name) = self.index.get_file_name(key)?
        {
            self.file_store.delete(&name);
        }
        self.index.delete(key)
    }

    pub fn remove_many(&mut self, keys: &[String]) -> Result<()> {
        if !matches!(self.mode, CacheMode::Sql) {
            for name in self.index.get_file_names(keys)? {
                self.file_store.delete(&name);
            }
        }
        self.index.delete_many(keys)
    }

    pub fn remove_larger_than_size(&mut self, bound: i64) -> Result<()> {
        if bound == i64::MAX {
            return Ok(());
        }
        if bound <= 0 {
            return self.remove_all();
        }
        if !matches!(self.mode, CacheMode::Sql) {
            for name in self.index.get_file_names_larger_than(bound)? {
                self.file_store.delete(&name);
            }
        }
        self.index.delete_larger_than(bound)?;
        self.index.checkpoint()?;
        Ok(())
    }

    /// Evicts entries whose `last_access_time < cutoff` (an absolute
    /// unix timestamp, not a duration).
    pub fn remove_earlier_than(&mut self, cutoff: i64) -> Result<()> {
        if cutoff <= 0 {
            return Ok(());
        }
        if cutoff == i64::MAX {
            return self.remove_all();
        }
        if !matches!(self.mode, CacheMode::Sql) {
            for name in self.index.get_file_names_earlier_than(cutoff)? {
                self.file_store.delete(&name);
            }
        }
        self.index.delete_earlier_than(cutoff)?;
        self.index.checkpoint()?;
        Ok(())
    }

    /// Evict least-recently-used entries until `running_total` (seeded
    /// once by the caller) reaches `target`, maintaining the total
    /// locally by subtracting each evicted entry's `weight` rather than
    /// re-querying the index after every deletion.
    fn evict_lru_while(
        &mut self,
        mut running_total: i64,
        target: i64,
        mut weight: impl FnMut(&crate::index::SizeInfo) -> i64,
    ) -> Result<()> {
        while running_total > target {
            let batch = self
                .index
                .get_item_size_info_order_by_time_asc(EVICT_BATCH)?;
            if batch.is_empty() {
                break;
            }
            for item in &batch {
                if !matches!(self.mode, CacheMode::Sql)
                    && let Some(name) = &item.file_name
                {
                    self.file_store.delete(name);
                }
                self.index.delete(&item.key)?;
                running_total -= weight(item);
                if running_total <= target {
                    break;
                }
            }
        }
        self.index.checkpoint()?;
        Ok(())
    }

    pub fn remove_to_fit_size(&mut self, target: i64) -> Result<()> {
        let total = self.index.total_item_size()?;
        self.evict_lru_while(total, target, |item| item.size)
    }

    pub fn remove_to_fit_count(&mut self, target: i64) -> Result<()> {
        let total = self.index.total_item_count()?;
        self.evict_lru_while(total, target, |_item| 1)
    }

    /// Evict up to `n` of the least-recently-used entries. Built on the
    /// same LRU eviction cursor as the bounded eviction ops; used by the
    /// façade's free-disk-space trim leg, which has no fixed count/size
    /// target to aim for.
    pub fn remove_oldest(&mut self, n: i64) -> Result<i64> {
        let mut removed = 0i64;
        while removed < n {
            let batch = self.index.get_item_size_info_order_by_time_asc(1)?;
            let Some(item) = batch.into_iter().next() else {
                break;
            };
            if !matches!(self.mode, CacheMode::Sql)
                && let Some(name) = &item.file_name
            {
                self.file_store.delete(name);
            }
            self.index.delete(&item.key)?;
            removed += 1;
        }
        if removed > 0 {
            self.index.checkpoint()?;
        }
        Ok(removed)
    }

    /// Close, reset (move `data/` to trash, delete the manifest triad),
    /// and reopen: the atomic wipe primitive.
    pub fn remove_all(&mut self) -> Result<()> {
        self.index.reset()
    }

    /// Streaming wipe: removes entries in batches of 32, invoking
    /// `progress` after each batch with `(removed_so_far, total_at_start)`,
    /// then `completion(success)` once finished. Unlike the source this
    /// mirrors, the completion callback receives the true success flag.
    pub fn remove_all_with_progress(
        &mut self,
        mut progress: impl FnMut(i64, i64),
        completion: impl FnOnce(bool),
    ) {
        let total = match self.index.total_item_count() {
            Ok(n) => n,
            Err(e) => {
                self.log_err(format!("remove_all_with_progress: {e}"));
                completion(false);
                return;
            }
        };

        let mut removed = 0i64;
        let mut failed = false;
        loop {
            let batch = match self
                .index
                .get_item_size_info_order_by_time_asc(PROGRESS_BATCH)
            {
                Ok(batch) => batch,
                Err(e) => {
                    self.log_err(format!("remove_all_with_progress: {e}"));
                    failed = true;
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            for item in &batch {
                if !matches!(self.mode, CacheMode::Sql)
                    && let Some(name) = &item.file_name
                {
                    self.file_store.delete(name);
                }
                if let Err(e) = self.index.delete(&item.key) {
                    self.log_err(format!("remove_all_with_progress: {e}"));
                    failed = true;
                    break;
                }
                removed += 1;
            }
            progress(removed, total);
            if failed {
                break;
            }
        }

        if !failed
            && let Err(e) = self.index.checkpoint()
        {
            self.log_err(format!("remove_all_with_progress: checkpoint failed: {e}"));
            failed = true;
        }

        completion(!failed);
    }

    /// Read the full entry, updating its access time. If the row names a
    /// file that cannot be read, the row is deleted and `None` returned.
    pub fn item(&mut self, key: &str) -> Result<Option<Entry>> {
        let Some(row) = self.index.get_item(key, false)? else {
            return Ok(None);
        };
        let value = match &row.file_name {
            Some(name) => match self.file_store.read(name) {
                Some(bytes) => bytes,
                None => {
                    self.index.delete(key)?;
                    return Ok(None);
                }
            },
            None => row.inline_data.unwrap_or_default(),
        };
        self.index.update_access_time(key)?;
        Ok(Some(Entry {
            key: row.key,
            value,
            file_name: row.file_name,
            size: row.size,
            mod_time: row.mod_time,
            access_time: row.access_time,
            extended_data: row.extended_data,
        }))
    }

    /// Read metadata only, excluding the value; never updates access time.
    pub fn item_info(&mut self, key: &str) -> Result<Option<EntryInfo>> {
        let Some(row) = self.index.get_item(key, true)? else {
            return Ok(None);
        };
        Ok(Some(EntryInfo {
            key: row.key,
            file_name: row.file_name,
            size: row.size,
            mod_time: row.mod_time,
            access_time: row.access_time,
            extended_data: row.extended_data,
        }))
    }

    /// Read only the value bytes, dispatching by mode: `File` follows
    /// `filename`, `Sql` reads `inline_data`, `Mix` prefers the file if
    /// one is referenced. Updates access time on success; on a failed
    /// file read the row is removed.
    pub fn item_value(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(row) = self.index.get_item(key, false)? else {
            return Ok(None);
        };
        let value = match (&self.mode, &row.file_name) {
            (CacheMode::Sql, _) => row.inline_data.unwrap_or_default(),
            (_, Some(name)) => match self.file_store.read(name) {
                Some(bytes) => bytes,
                None => {
                    self.index.delete(key)?;
                    return Ok(None);
                }
            },
            (_, None) => row.inline_data.unwrap_or_default(),
        };
        self.index.update_access_time(key)?;
        Ok(Some(value))
    }

    /// Bulk read of full entries. File-backed entries whose blob fails to
    /// read are dropped from the result and removed from the index.
    /// Access time is refreshed for the original query set whenever the
    /// result is non-empty.
    pub fn items(&mut self, keys: &[String]) -> Result<Vec<Entry>> {
        let rows = self.index.get_items(keys, false)?;
        let mut out = Vec::with_capacity(rows.len());
        let mut lost = Vec::new();
        for row in rows {
            let value = match &row.file_name {
                Some(name) => match self.file_store.read(name) {
                    Some(bytes) => bytes,
                    None => {
                        lost.push(row.key.clone());
                        continue;
                    }
                },
                None => row.inline_data.clone().unwrap_or_default(),
            };
            out.push(Entry {
                key: row.key,
                value,
                file_name: row.file_name,
                size: row.size,
                mod_time: row.mod_time,
                access_time: row.access_time,
                extended_data: row.extended_data,
            });
        }
        if !lost.is_empty() {
            self.index.delete_many(&lost)?;
        }
        if !out.is_empty() {
            self.index.update_access_time_many(keys)?;
        }
        Ok(out)
    }

    pub fn item_infos(&mut self, keys: &[String]) -> Result<Vec<EntryInfo>> {
        let rows = self.index.get_items(keys, true)?;
        Ok(rows
            .into_iter()
            .map(|row| EntryInfo {
                key: row.key,
                file_name: row.file_name,
                size: row.size,
                mod_time: row.mod_time,
                access_time: row.access_time,
                extended_data: row.extended_data,
            })
            .collect())
    }

    pub fn item_values(&mut self, keys: &[String]) -> Result<std::collections::HashMap<String, Vec<u8>>> {
        let rows = self.index.get_items(keys, false)?;
        let mut out = std::collections::HashMap::with_capacity(rows.len());
        let mut lost = Vec::new();
        for row in rows {
            let value = match (&self.mode, &row.file_name) {
                (CacheMode::Sql, _) => row.inline_data.clone().unwrap_or_default(),
                (_, Some(name)) => match self.file_store.read(name) {
                    Some(bytes) => bytes,
                    None => {
                        lost.push(row.key.clone());
                        continue;
                    }
                },
                (_, None) => row.inline_data.clone().unwrap_or_default(),
            };
            out.insert(row.key, value);
        }
        if !lost.is_empty() {
            self.index.delete_many(&lost)?;
        }
        if !out.is_empty() {
            self.index.update_access_time_many(keys)?;
        }
        Ok(out)
    }

    pub fn item_exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.index.get_item_count(key)? > 0)
    }

    pub fn items_count(&mut self) -> Result<i64> {
        self.index.total_item_count()
    }

    pub fn items_size(&mut self) -> Result<i64> {
        self.index.total_item_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(mode: CacheMode) -> (StorageEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        (StorageEngine::open(dir.path(), mode, true).unwrap(), dir)
    }

    #[test]
    fn round_trip_all_modes() {
        for mode in [CacheMode::Sql, CacheMode::Mix] {
            let (mut e, _dir) = engine(mode);
            e.save("a", &[1, 2, 3], None, None).unwrap();
            let entry = e.item("a").unwrap().unwrap();
            assert_eq!(entry.value, vec![1, 2, 3]);
        }

        let (mut e, _dir) = engine(CacheMode::File);
        e.save("a", &[1, 2, 3], Some("file-a"), None).unwrap();
        let entry = e.item("a").unwrap().unwrap();
        assert_eq!(entry.value, vec![1, 2, 3]);
    }

    #[test]
    fn insert_or_replace_deletes_old_file() {
        let (mut e, dir) = engine(CacheMode::Mix);
        e.save("a", &[1; 30000], Some("file-a"), None).unwrap();
        assert!(dir.path().join("data/file-a").exists());
        e.save("a", &[9; 5], None, None).unwrap();
        assert!(!dir.path().join("data/file-a").exists());
        let entry = e.item("a").unwrap().unwrap();
        assert_eq!(entry.value, vec![9; 5]);
    }

    #[test]
    fn insert_or_replace_deletes_old_file_when_new_name_differs() {
        let (mut e, dir) = engine(CacheMode::File);
        e.save("a", &[1; 10], Some("file-1"), None).unwrap();
        assert!(dir.path().join("data/file-1").exists());
        e.save("a", &[2; 10], Some("file-2"), None).unwrap();
        assert!(!dir.path().join("data/file-1").exists());
        assert!(dir.path().join("data/file-2").exists());
        assert_eq!(e.items_count().unwrap(), 1);
        assert_eq!(e.item("a").unwrap().unwrap().value, vec![2; 10]);
    }

    #[test]
    fn access_time_monotonic_and_info_is_non_mutating() {
        let (mut e, _dir) = engine(CacheMode::Mix);
        e.save("a", b"v", None, None).unwrap();
        let before = e.item_info("a").unwrap().unwrap().access_time;
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let info_again = e.item_info("a").unwrap().unwrap().access_time;
        assert_eq!(before, info_again);
        e.item("a").unwrap();
        let after = e.item_info("a").unwrap().unwrap().access_time;
        assert!(after >= before);
    }

    #[test]
    fn lru_eviction_removes_oldest_first() {
        let (mut e, _dir) = engine(CacheMode::Mix);
        e.save("x", b"aaaaaaaaaa", None, None).unwrap();
        e.index.update_access_time("x").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        e.save("y", b"bbbbbbbbbbbbbbbbbbbb", None, None).unwrap();

        e.remove_to_fit_count(1).unwrap();
        assert!(!e.item_exists("x").unwrap());
        assert!(e.item_exists("y").unwrap());
        assert_eq!(e.items_count().unwrap(), 1);
    }

    #[test]
    fn sql_mode_never_creates_files() {
        let (mut e, dir) = engine(CacheMode::Sql);
        e.save("k", &[0x42; 5], Some("ignored"), None).unwrap();
        assert!(!dir.path().join("data/ignored").exists());
        assert_eq!(e.item("k").unwrap().unwrap().value, vec![0x42; 5]);
    }

    #[test]
    fn file_mode_requires_file_name() {
        let (mut e, _dir) = engine(CacheMode::File);
        let err = e.save("k", b"v", None, None).unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
    }

    #[test]
    fn integrity_repair_on_missing_blob() {
        let (mut e, dir) = engine(CacheMode::Mix);
        e.save("k", b"value", Some("f"), None).unwrap();
        std::fs::remove_file(dir.path().join("data/f")).unwrap();
        assert!(e.item("k").unwrap().is_none());
        assert!(!e.item_exists("k").unwrap());
    }

    #[test]
    fn remove_all_then_save_again_works() {
        let (mut e, _dir) = engine(CacheMode::Mix);
        e.save("k", b"value", None, None).unwrap();
        e.remove_all().unwrap();
        assert_eq!(e.items_count().unwrap(), 0);
        assert!(!e.item_exists("k").unwrap());
        e.save("k", b"value2", None, None).unwrap();
        assert_eq!(e.item("k").unwrap().unwrap().value, b"value2".to_vec());
    }

    #[test]
    fn remove_all_is_idempotent() {
        let (mut e, _dir) = engine(CacheMode::Mix);
        e.save("k", b"value", None, None).unwrap();
        e.remove_all().unwrap();
        e.remove_all().unwrap();
        assert_eq!(e.items_count().unwrap(), 0);
    }

    #[test]
    fn remove_all_with_progress_reports_true_success() {
        let (mut e, _dir) = engine(CacheMode::Mix);
        for i in 0..5 {
            e.save(&format!("k{i}"), b"value", None, None).unwrap();
        }
        let mut seen_progress = false;
        let mut final_success = None;
        e.remove_all_with_progress(
            |_removed, _total| seen_progress = true,
            |success| final_success = Some(success),
        );
        assert!(seen_progress);
        assert_eq!(final_success, Some(true));
        assert_eq!(e.items_count().unwrap(), 0);
    }
}
