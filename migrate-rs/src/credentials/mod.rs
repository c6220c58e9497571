//! Ephemeral credential storage
//!
//! Passwords are never written to the progress store. They live in a
//! process-local map keyed by (job, row, side), populated at job
//! creation and dropped when the job is deleted.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Which side of an account a credential belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialSide {
    Source,
    Destination,
}

impl CredentialSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSide::Source => "source",
            CredentialSide::Destination => "destination",
        }
    }
}

/// In-memory credential vault shared between the job-creation surface
/// and the engine
#[derive(Clone, Default)]
pub struct CredentialVault {
    secrets: Arc<RwLock<HashMap<(String, i64, CredentialSide), String>>>,
}

impl CredentialVault {
    /// Create an empty vault
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a secret for (job, row, side)
    pub async fn store(&self, job_id: &str, row_index: i64, side: CredentialSide, secret: String) {
        let mut secrets = self.secrets.write().await;
        secrets.insert((job_id.to_string(), row_index, side), secret);
    }

    /// Get the secret for (job, row, side), if present
    pub async fn get(&self, job_id: &str, row_index: i64, side: CredentialSide) -> Option<String> {
        let secrets = self.secrets.read().await;
        secrets
            .get(&(job_id.to_string(), row_index, side))
            .cloned()
    }

    /// Drop all secrets belonging to a job
    pub async fn remove_job(&self, job_id: &str) {
        let mut secrets = self.secrets.write().await;
        secrets.retain(|(job, _, _), _| job != job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_get() {
        let vault = CredentialVault::new();
        vault
            .store("job-1", 0, CredentialSide::Source, "hunter2".to_string())
            .await;

        let secret = vault.get("job-1", 0, CredentialSide::Source).await;
        assert_eq!(secret.as_deref(), Some("hunter2"));

        let missing = vault.get("job-1", 0, CredentialSide::Destination).await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_remove_job_drops_all_rows() {
        let vault = CredentialVault::new();
        vault
            .store("job-1", 0, CredentialSide::Source, "a".to_string())
            .await;
        vault
            .store("job-1", 1, CredentialSide::Destination, "b".to_string())
            .await;
        vault
            .store("job-2", 0, CredentialSide::Source, "c".to_string())
            .await;

        vault.remove_job("job-1").await;

        assert!(vault.get("job-1", 0, CredentialSide::Source).await.is_none());
        assert!(vault
            .get("job-1", 1, CredentialSide::Destination)
            .await
            .is_none());
        assert_eq!(
            vault.get("job-2", 0, CredentialSide::Source).await.as_deref(),
            Some("c")
        );
    }
}
