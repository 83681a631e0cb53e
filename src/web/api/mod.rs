pub mod error;
pub mod snapshots;
pub mod status;
pub mod visibility;
