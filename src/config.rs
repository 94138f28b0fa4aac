//! Façade configuration: storage mode, inline threshold, eviction limits
//! and the auto-trim interval.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::CacheMode;

/// Responses larger than this are stored as external blobs when the mode
/// is not `Sql`.
pub const DEFAULT_INLINE_THRESHOLD: usize = 20 * 1024;

/// Default period between automatic trim passes.
pub const DEFAULT_TRIM_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for a [`crate::Cache`] instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub(crate) root: PathBuf,
    pub(crate) mode: CacheMode,
    pub(crate) inline_threshold: usize,
    pub(crate) limits: CacheLimits,
    pub(crate) trim_interval: Duration,
    pub(crate) error_logs_enabled: bool,
}

/// Eviction limits enforced by the façade's trim pass, in the order
/// cost → count → age → free-disk-space. Each defaults to "no limit".
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheLimits {
    pub max_count: Option<i64>,
    pub max_cost_bytes: Option<i64>,
    pub max_age_secs: Option<i64>,
    pub min_free_bytes: Option<u64>,
}

impl CacheConfig {
    /// Start a builder rooted at `root` in `Mix` mode with every limit
    /// and the inline threshold at their spec-mandated defaults.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            mode: CacheMode::Mix,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            limits: CacheLimits::default(),
            trim_interval: DEFAULT_TRIM_INTERVAL,
            error_logs_enabled: true,
        }
    }

    /// Start a builder rooted at the platform cache directory, under
    /// `app_name` (e.g. `~/.cache/<app_name>` on Linux). Returns
    /// [`crate::Error::BadArgument`] if the platform has no resolvable
    /// home/cache directory.
    pub fn new_in_default_cache_dir(app_name: &str) -> crate::error::Result<Self> {
        let base = dirs::cache_dir()
            .ok_or(crate::error::Error::BadArgument("no cache directory for this platform"))?;
        Ok(Self::new(base.join(app_name)))
    }

    pub fn mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn inline_threshold(mut self, bytes: usize) -> Self {
        self.inline_threshold = bytes;
        self
    }

    pub fn max_count(mut self, n: i64) -> Self {
        self.limits.max_count = Some(n);
        self
    }

    pub fn max_cost_bytes(mut self, n: i64) -> Self {
        self.limits.max_cost_bytes = Some(n);
        self
    }

    pub fn max_age_secs(mut self, n: i64) -> Self {
        self.limits.max_age_secs = Some(n);
        self
    }

    pub fn min_free_bytes(mut self, n: u64) -> Self {
        self.limits.min_free_bytes = Some(n);
        self
    }

    pub fn trim_interval(mut self, interval: Duration) -> Self {
        self.trim_interval = interval;
        self
    }

    pub fn error_logs_enabled(mut self, enabled: bool) -> Self {
        self.error_logs_enabled = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
