//! Migration plan files
//!
//! A plan is the validated input a job is created from: one account row
//! per source/destination pair, plus job-wide options.

use crate::error::{MigrateError, Result};
use crate::store::types::MigrationMode;
use serde::Deserialize;
use std::path::Path;

/// Input for creating a migration job
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationPlan {
    /// Dry-run or migrate
    pub mode: MigrationMode,
    /// Job-wide batch size; falls back to the engine default
    pub batch_size: Option<i64>,
    /// Account rows in order
    pub accounts: Vec<PlanAccount>,
}

/// One source-to-destination pair in a plan
#[derive(Debug, Clone, Deserialize)]
pub struct PlanAccount {
    /// Per-account batch size override
    pub batch_size: Option<i64>,
    pub source: PlanEndpoint,
    pub destination: PlanEndpoint,
}

/// Connection parameters for one side of a plan row
#[derive(Debug, Clone, Deserialize)]
pub struct PlanEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Required on the source side; optional on the destination, which
    /// then falls back to the source password
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

fn default_true() -> bool {
    true
}

impl MigrationPlan {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| MigrateError::Config(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let plan: MigrationPlan =
            toml::from_str(content).map_err(|e| MigrateError::Config(e.to_string()))?;

        if plan.accounts.is_empty() {
            return Err(MigrateError::Config("plan has no accounts".to_string()));
        }
        for (index, account) in plan.accounts.iter().enumerate() {
            if account.source.password.is_none() {
                return Err(MigrateError::Config(format!(
                    "account row {index} has no source password"
                )));
            }
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
mode = "migrate"
batch_size = 50

[[accounts]]
[accounts.source]
host = "imap.old.example"
port = 993
username = "alice@old.example"
password = "secret"

[accounts.destination]
host = "imap.new.example"
port = 993
username = "alice@new.example"
use_tls = false
"#;

    #[test]
    fn test_parse_plan() {
        let plan = MigrationPlan::from_toml(PLAN).unwrap();
        assert_eq!(plan.mode, MigrationMode::Migrate);
        assert_eq!(plan.batch_size, Some(50));
        assert_eq!(plan.accounts.len(), 1);

        let account = &plan.accounts[0];
        assert_eq!(account.source.host, "imap.old.example");
        assert!(account.source.use_tls);
        assert_eq!(account.destination.password, None);
        assert!(!account.destination.use_tls);
    }

    #[test]
    fn test_missing_source_password_rejected() {
        let broken = PLAN.replace("password = \"secret\"\n", "");
        let err = MigrationPlan::from_toml(&broken).unwrap_err();
        assert!(err.to_string().contains("source password"));
    }

    #[test]
    fn test_empty_plan_rejected() {
        let err = MigrationPlan::from_toml("mode = \"dry-run\"\naccounts = []\n").unwrap_err();
        assert!(err.to_string().contains("no accounts"));
    }
}
