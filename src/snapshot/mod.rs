mod error;
mod store;

pub use error::StorageError;
pub use store::{Snapshot, SnapshotStore, SnapshotSummary};
