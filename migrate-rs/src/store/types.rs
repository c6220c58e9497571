//! Migration job, account and folder records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Migration mode, decided once at job creation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationMode {
    /// Discover and count messages without copying anything
    DryRun,
    /// Copy messages to the destination
    Migrate,
}

impl std::fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationMode::DryRun => write!(f, "dry-run"),
            MigrationMode::Migrate => write!(f, "migrate"),
        }
    }
}

impl std::str::FromStr for MigrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dry-run" => Ok(MigrationMode::DryRun),
            "migrate" => Ok(MigrationMode::Migrate),
            other => Err(format!("unknown migration mode: {other}")),
        }
    }
}

/// Status shared by jobs, accounts and folders
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Not started yet
    Pending,
    /// Currently being processed
    Running,
    /// Finished successfully
    Done,
    /// Finished with a fatal error
    Failed,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Pending => write!(f, "pending"),
            MigrationStatus::Running => write!(f, "running"),
            MigrationStatus::Done => write!(f, "done"),
            MigrationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for MigrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MigrationStatus::Pending),
            "running" => Ok(MigrationStatus::Running),
            "done" => Ok(MigrationStatus::Done),
            "failed" => Ok(MigrationStatus::Failed),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// One migration run covering multiple accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique ID
    pub id: String,
    /// Dry-run or migrate
    pub mode: MigrationMode,
    /// Job status
    pub status: MigrationStatus,
    /// Total messages discovered across all accounts
    pub total_messages: i64,
    /// Messages copied so far
    pub moved_messages: i64,
    /// Number of failed accounts
    pub error_count: i64,
    /// Row index of the account currently in flight
    pub current_row_index: i64,
    /// Accounts processed in parallel (pinned to 1)
    pub concurrency: i64,
    /// Default batch size for this job
    pub batch_size: i64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Connection parameters for one side of an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub use_tls: bool,
}

/// One source-to-destination mailbox pair within a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Owning job
    pub job_id: String,
    /// Stable ordering key within the job
    pub row_index: i64,
    /// Source mailbox connection parameters
    pub source: Endpoint,
    /// Destination mailbox connection parameters
    pub destination: Endpoint,
    /// Per-account batch size override
    pub batch_size: Option<i64>,
    /// Account status
    pub status: MigrationStatus,
    /// Last error message if failed
    pub last_error: Option<String>,
    /// Total messages discovered for this account
    pub total_messages: i64,
    /// Messages copied for this account
    pub moved_messages: i64,
}

/// One mailbox path being copied within an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRecord {
    /// Owning job
    pub job_id: String,
    /// Owning account row
    pub row_index: i64,
    /// Source folder path
    pub source_path: String,
    /// Messages discovered in the source folder
    pub total_messages: i64,
    /// Messages copied so far
    pub moved_messages: i64,
    /// Highest source UID successfully copied; resumption anchor
    pub last_uid: i64,
    /// Folder status
    pub status: MigrationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn mode_round_trips_through_strings() {
        assert_eq!(MigrationMode::DryRun.to_string(), "dry-run");
        assert_eq!(MigrationMode::Migrate.to_string(), "migrate");
        assert_eq!(
            MigrationMode::from_str("dry-run").unwrap(),
            MigrationMode::DryRun
        );
        assert!(MigrationMode::from_str("bogus").is_err());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            MigrationStatus::Pending,
            MigrationStatus::Running,
            MigrationStatus::Done,
            MigrationStatus::Failed,
        ] {
            let parsed = MigrationStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(parsed, status);
        }
    }
}
