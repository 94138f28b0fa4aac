//! A persistent, on-disk key/value cache for binary payloads.
//!
//! Small values are stored inline in a SQLite manifest; large values are
//! stored as external blob files referenced by that manifest. The
//! manifest is the single source of truth across both storage media.
//!
//! The crate is layered, leaves first:
//!
//! - [`store`] — the File Store: `data/` and `trash/` under the cache root.
//! - [`index`] — the Index: the SQLite manifest, statement caching, and
//!   the capped-backoff availability state machine.
//! - [`engine`] — the Storage Engine: combines Index + File Store behind
//!   the inline/file mode policy and the eviction operations.
//! - [`cache`] — a thin façade: object (de)serialization, thresholding,
//!   locking, async variants, and the background trim task.
//!
//! Most applications only need [`Cache`] and [`CacheConfig`]; the lower
//! layers are public for callers that want the engine without the
//! façade's serialization and locking policy.

pub mod cache;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
mod index;
mod store;

pub use cache::{Cache, FreeSpaceProvider, NoFreeSpaceSensing, TrimHandle};
pub use config::{CacheConfig, CacheLimits};
pub use engine::{CacheMode, StorageEngine};
pub use entry::{Entry, EntryInfo};
pub use error::{Error, Result};
