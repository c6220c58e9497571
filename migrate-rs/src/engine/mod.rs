//! Migration engine
//!
//! Drives the job lifecycle: accounts in row order, folders per
//! account, and the resumable batch copy loop per folder, updating the
//! progress store and event bus at every state transition.
//!
//! - [`driver`]: job creation and the per-job driver loop
//! - [`flags`]: flag sanitization for cross-server copies
//! - [`plan`]: migration plan files

mod account;
mod copier;

pub mod driver;
pub mod flags;
pub mod plan;

pub use driver::MigrationEngine;
pub use plan::MigrationPlan;
