//! Infrastructure adapters for storage backends.

pub mod store;

pub use store::{FailPoint, MemoryStore, SnapshotFile, open_file_store};
