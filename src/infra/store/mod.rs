//! Storage backends implementing the contracts in [`crate::core::store`].

pub mod file;
pub mod memory;

pub use file::{SnapshotFile, open_file_store};
pub use memory::{FailPoint, MemoryStore, StoreState};
