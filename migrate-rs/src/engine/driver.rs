//! Job driver - creates jobs and runs them account by account

use crate::credentials::{CredentialSide, CredentialVault};
use crate::engine::plan::MigrationPlan;
use crate::error::{MigrateError, Result};
use crate::events::{EventBus, MigrationEvent};
use crate::store::types::{AccountRecord, Endpoint, JobRecord, MigrationStatus};
use crate::store::ProgressStore;
use crate::transport::MailTransport;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Orchestrates migration jobs: iterates accounts in row order, drives
/// the per-account processing and keeps the progress store and event
/// bus in sync at every state transition.
pub struct MigrationEngine {
    pub(crate) store: ProgressStore,
    pub(crate) events: EventBus,
    pub(crate) vault: CredentialVault,
    pub(crate) transport: Arc<dyn MailTransport>,
    default_batch_size: i64,
}

impl MigrationEngine {
    /// Create a new engine
    pub fn new(
        store: ProgressStore,
        events: EventBus,
        vault: CredentialVault,
        transport: Arc<dyn MailTransport>,
        default_batch_size: i64,
    ) -> Self {
        Self {
            store,
            events,
            vault,
            transport,
            default_batch_size,
        }
    }

    /// The engine's progress store
    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// The engine's event bus
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The engine's credential vault
    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// Create a job with its account rows from a validated plan.
    ///
    /// Passwords go into the ephemeral vault, never into the store.
    pub async fn create_job(&self, plan: &MigrationPlan) -> Result<JobRecord> {
        let job = JobRecord {
            id: Uuid::new_v4().to_string(),
            mode: plan.mode,
            status: MigrationStatus::Pending,
            total_messages: 0,
            moved_messages: 0,
            error_count: 0,
            current_row_index: 0,
            concurrency: 1,
            batch_size: plan.batch_size.unwrap_or(self.default_batch_size),
            created_at: Utc::now(),
        };
        self.store.create_job(&job).await?;

        for (index, row) in plan.accounts.iter().enumerate() {
            let row_index = index as i64;
            let source_secret = row.source.password.clone().ok_or_else(|| {
                MigrateError::Config(format!("account row {row_index} has no source password"))
            })?;

            let account = AccountRecord {
                job_id: job.id.clone(),
                row_index,
                source: Endpoint {
                    host: row.source.host.clone(),
                    port: row.source.port,
                    username: row.source.username.clone(),
                    use_tls: row.source.use_tls,
                },
                destination: Endpoint {
                    host: row.destination.host.clone(),
                    port: row.destination.port,
                    username: row.destination.username.clone(),
                    use_tls: row.destination.use_tls,
                },
                batch_size: row.batch_size,
                status: MigrationStatus::Pending,
                last_error: None,
                total_messages: 0,
                moved_messages: 0,
            };
            self.store.create_account(&account).await?;

            self.vault
                .store(&job.id, row_index, CredentialSide::Source, source_secret)
                .await;
            if let Some(secret) = row.destination.password.clone() {
                self.vault
                    .store(&job.id, row_index, CredentialSide::Destination, secret)
                    .await;
            }
        }

        info!(
            "Created job {} ({} accounts, mode {})",
            job.id,
            plan.accounts.len(),
            job.mode
        );
        Ok(job)
    }

    /// Delete a job with its durable rows, vault entries and event
    /// channel
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.store.delete_job(job_id).await?;
        self.vault.remove_job(job_id).await;
        self.events.remove_job(job_id).await;
        Ok(())
    }

    /// Run a job as an independently scheduled background task
    pub fn spawn_job(self: &Arc<Self>, job_id: &str) -> JoinHandle<Result<()>> {
        let engine = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move { engine.run_job(&job_id).await })
    }

    /// Run a job to completion.
    ///
    /// Account failures are counted and skipped; only driver-level
    /// failures (for example an unreachable progress store) mark the
    /// job `failed` and propagate to the caller.
    pub async fn run_job(&self, job_id: &str) -> Result<()> {
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| MigrateError::NotFound(format!("job {job_id}")))?;

        if job.status == MigrationStatus::Running {
            return Err(MigrateError::JobAlreadyRunning(job_id.to_string()));
        }

        // Restart from scratch: aggregates re-accumulate while folder
        // cursors keep their resumption state.
        job.status = MigrationStatus::Running;
        job.total_messages = 0;
        job.moved_messages = 0;
        job.error_count = 0;
        job.current_row_index = 0;
        self.store
            .update_job_status(job_id, MigrationStatus::Running)
            .await?;
        self.store.update_job_progress(job_id, 0, 0, 0, 0).await?;
        self.events.publish(MigrationEvent::job_status(&job)).await;
        info!("Job {} started in {} mode", job_id, job.mode);

        match self.drive_accounts(&mut job).await {
            Ok(()) => {
                job.status = MigrationStatus::Done;
                self.store
                    .update_job_status(job_id, MigrationStatus::Done)
                    .await?;
                self.events.publish(MigrationEvent::job_status(&job)).await;
                info!(
                    "Job {} done: {}/{} messages moved, {} failed accounts",
                    job_id, job.moved_messages, job.total_messages, job.error_count
                );
                Ok(())
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                if let Err(store_err) = self
                    .store
                    .update_job_status(job_id, MigrationStatus::Failed)
                    .await
                {
                    error!("Could not persist failure of job {}: {}", job_id, store_err);
                }
                job.status = MigrationStatus::Failed;
                self.events
                    .publish(MigrationEvent::log(job_id, "error", &e.to_string()))
                    .await;
                self.events.publish(MigrationEvent::job_status(&job)).await;
                Err(e)
            }
        }
    }

    async fn drive_accounts(&self, job: &mut JobRecord) -> Result<()> {
        let accounts = self.store.get_accounts_by_job(&job.id).await?;

        for mut account in accounts {
            // Persisted before the account starts so a crash records
            // which row was in flight
            job.current_row_index = account.row_index;
            self.store
                .update_job_progress(
                    &job.id,
                    job.total_messages,
                    job.moved_messages,
                    job.error_count,
                    job.current_row_index,
                )
                .await?;
            self.events.publish(MigrationEvent::job_status(job)).await;

            match self.process_account(job, &mut account).await {
                Ok(()) => {
                    job.total_messages += account.total_messages;
                    job.moved_messages += account.moved_messages;
                }
                Err(e) => {
                    // Account failures are non-fatal to the job
                    warn!("Account row {} failed: {}", account.row_index, e);
                    job.error_count += 1;
                }
            }

            self.store
                .update_job_progress(
                    &job.id,
                    job.total_messages,
                    job.moved_messages,
                    job.error_count,
                    job.current_row_index,
                )
                .await?;
            self.events.publish(MigrationEvent::job_status(job)).await;
        }

        Ok(())
    }
}
