//! Façade layer: object (de)serialization, inline/file thresholding,
//! per-instance locking, async variants and the background trim task.
//! See [`facade`] for the `Cache` type itself.

pub mod facade;
pub mod key;

pub use facade::{Cache, FreeSpaceProvider, NoFreeSpaceSensing, TrimHandle};
