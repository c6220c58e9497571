//! Durable migration state
//!
//! - [`progress`]: SQLite-backed progress store
//! - [`types`]: job, account and folder records

pub mod progress;
pub mod types;

pub use progress::ProgressStore;
pub use types::{
    AccountRecord, Endpoint, FolderRecord, JobRecord, MigrationMode, MigrationStatus,
};
