//! migrate-rs: IMAP mailbox migration engine
//!
//! Copies mailbox contents between two mail servers while tracking
//! per-account and per-folder progress durably, so a long-running
//! transfer can be observed live and resumed after interruption.
//!
//! # Features
//!
//! - **Resumable**: per-folder cursors are persisted after every copied
//!   message; a restarted job continues where it stopped
//! - **Observable**: every state transition is broadcast to live
//!   subscribers and written to SQLite
//! - **Fault-isolating**: a bad message never aborts its folder, a bad
//!   folder never aborts its account, a bad account never aborts the job
//! - **Dry-run**: size a job without touching the destination
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`credentials`]: Ephemeral credential vault
//! - [`engine`]: Job driver, account processing and batch copy loop
//! - [`error`]: Error types and handling
//! - [`events`]: Live progress events
//! - [`reconcile`]: Folder name reconciliation
//! - [`store`]: Durable progress store
//! - [`transport`]: Mail transport abstraction and IMAP implementation

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod events;
pub mod reconcile;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use engine::{MigrationEngine, MigrationPlan};
pub use error::{MigrateError, Result};
pub use events::{EventBus, EventKind, MigrationEvent};
pub use store::{MigrationMode, MigrationStatus, ProgressStore};
