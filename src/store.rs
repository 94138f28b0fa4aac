//! File Store: the `data/` and `trash/` subtrees of a cache root.
//!
//! Blob files are written, read and deleted by opaque file name under
//! `data/`. Bulk wipes rename the whole `data/` subtree into a fresh
//! UUID-named subdirectory of `trash/` and recreate an empty `data/`;
//! `trash/` contents are deleted asynchronously and are never read back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

/// Owns the `data/` and `trash/` directories under a cache root.
#[derive(Debug, Clone)]
pub(crate) struct FileStore {
    data_dir: PathBuf,
    trash_dir: PathBuf,
}

impl FileStore {
    /// Open (creating if necessary) the file store rooted at `root`.
    pub fn open(root: &Path) -> std::io::Result<Self> {
        let data_dir = root.join("data");
        let trash_dir = root.join("trash");
        std::fs::create_dir_all(&data_dir)?;
        std::fs::create_dir_all(&trash_dir)?;
        Ok(Self {
            data_dir,
            trash_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn blob_path(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    /// Write `bytes` to `data/<file_name>`, creating or truncating. No
    /// fsync is performed; durability here is best-effort, matching the
    /// rest of the index/store split.
    pub fn write(&self, file_name: &str, bytes: &[u8]) -> bool {
        std::fs::write(self.blob_path(file_name), bytes).is_ok()
    }

    /// Read `data/<file_name>`. Returns `None` on any I/O error.
    pub fn read(&self, file_name: &str) -> Option<Vec<u8>> {
        match std::fs::read(self.blob_path(file_name)) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("failed to read blob {file_name}: {e}");
                None
            }
        }
    }

    /// Remove `data/<file_name>`. A missing file is reported as failure
    /// by this primitive; callers that consider a missing file harmless
    /// (e.g. `remove`) should ignore a `false` return.
    pub fn delete(&self, file_name: &str) -> bool {
        match std::fs::remove_file(self.blob_path(file_name)) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("failed to delete blob {file_name}: {e}");
                false
            }
        }
    }

    /// Atomically rename `data/` into a fresh UUID-named subdirectory of
    /// `trash/`, then recreate an empty `data/`.
    pub fn move_all_to_trash(&self) -> std::io::Result<()> {
        let staged = self.trash_dir.join(Uuid::new_v4().to_string());
        std::fs::rename(&self.data_dir, &staged)?;
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// Schedule deletion of every entry currently in `trash/` on a
    /// dedicated serial background worker. Never blocks the caller;
    /// concurrent calls coalesce naturally since each pass only deletes
    /// what it observes in its own directory listing. The engine is
    /// runtime-independent (the façade owns the async story), so this
    /// spawns a plain OS thread rather than a Tokio task.
    pub fn empty_trash_async(&self) {
        let trash_dir = self.trash_dir.clone();
        std::thread::spawn(move || {
            Self::empty_trash_once(&trash_dir);
        });
    }

    fn empty_trash_once(trash_dir: &Path) {
        let entries = match std::fs::read_dir(trash_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("failed to enumerate trash directory: {e}");
                return;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("error walking trash directory: {e}");
                    break;
                }
            };
            let path = entry.path();
            if let Err(e) = std::fs::remove_dir_all(&path) {
                log::warn!("failed to remove trashed subtree {path:?}: {e}");
            }
        }
    }
}

/// Shared handle used by the Index and Storage Engine; cheap to clone.
pub(crate) type SharedFileStore = Arc<FileStore>;
