//! Account processing - one source/destination pair at a time

use crate::credentials::CredentialSide;
use crate::engine::MigrationEngine;
use crate::error::{MigrateError, Result};
use crate::events::MigrationEvent;
use crate::reconcile::reconcile;
use crate::store::types::{AccountRecord, JobRecord, MigrationMode, MigrationStatus};
use crate::transport::{ConnectParams, MailSession};
use tracing::{debug, info, warn};

/// Provider-specific virtual folders that must not be migrated: they
/// aggregate messages that already exist in real folders.
const NON_MIGRATABLE_FOLDERS: &[&str] = &[
    "[Gmail]",
    "[Gmail]/All Mail",
    "[Gmail]/Important",
    "[Gmail]/Starred",
    "[Google Mail]",
    "[Google Mail]/All Mail",
    "[Google Mail]/Important",
    "[Google Mail]/Starred",
];

fn is_non_migratable(path: &str) -> bool {
    NON_MIGRATABLE_FOLDERS.iter().any(|excluded| path == *excluded)
}

/// Lazily opened destination session, shared across an account's
/// folders
pub(crate) struct DestState {
    pub(crate) session: Option<Box<dyn MailSession>>,
    pub(crate) folders: Vec<String>,
}

impl MigrationEngine {
    /// Process one account: discover folders, then copy each one.
    ///
    /// Folder failures are logged and skipped; anything that escapes
    /// this method marks the account `failed` and is re-raised to the
    /// job driver.
    pub(crate) async fn process_account(
        &self,
        job: &JobRecord,
        account: &mut AccountRecord,
    ) -> Result<()> {
        info!(
            "Processing account row {} ({})",
            account.row_index, account.source.username
        );
        // Counters re-accumulate from folder rows during discovery, so
        // a re-run must start from zero or every folder counts twice
        account.status = MigrationStatus::Running;
        account.last_error = None;
        account.total_messages = 0;
        account.moved_messages = 0;
        self.store
            .update_account_status(
                &account.job_id,
                account.row_index,
                MigrationStatus::Running,
                None,
            )
            .await?;
        self.store
            .update_account_progress(&account.job_id, account.row_index, 0, 0)
            .await?;
        self.events
            .publish(MigrationEvent::account_status(account))
            .await;

        let mut source: Option<Box<dyn MailSession>> = None;
        let mut dest = DestState {
            session: None,
            folders: Vec::new(),
        };

        let result = self.run_account(job, account, &mut source, &mut dest).await;

        // Disconnect failures must never mask the account outcome
        if let Some(mut session) = source.take() {
            if let Err(e) = session.disconnect().await {
                warn!("Source disconnect failed: {}", e);
            }
        }
        if let Some(mut session) = dest.session.take() {
            if let Err(e) = session.disconnect().await {
                warn!("Destination disconnect failed: {}", e);
            }
        }

        match result {
            Ok(()) => {
                if job.mode == MigrationMode::DryRun {
                    // Dry-run never copies
                    account.moved_messages = 0;
                }
                account.status = MigrationStatus::Done;
                self.store
                    .update_account_progress(
                        &account.job_id,
                        account.row_index,
                        account.total_messages,
                        account.moved_messages,
                    )
                    .await?;
                self.store
                    .update_account_status(
                        &account.job_id,
                        account.row_index,
                        MigrationStatus::Done,
                        None,
                    )
                    .await?;
                self.events
                    .publish(MigrationEvent::account_status(account))
                    .await;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                account.status = MigrationStatus::Failed;
                account.last_error = Some(message.clone());
                self.store
                    .update_account_status(
                        &account.job_id,
                        account.row_index,
                        MigrationStatus::Failed,
                        Some(&message),
                    )
                    .await?;
                self.events
                    .publish(MigrationEvent::account_status(account))
                    .await;
                self.events
                    .publish(MigrationEvent::log(
                        &account.job_id,
                        "error",
                        &format!("account row {} failed: {message}", account.row_index),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_account(
        &self,
        job: &JobRecord,
        account: &mut AccountRecord,
        source: &mut Option<Box<dyn MailSession>>,
        dest: &mut DestState,
    ) -> Result<()> {
        // Missing credential is a hard precondition failure, not retryable
        let source_secret = self
            .vault
            .get(&account.job_id, account.row_index, CredentialSide::Source)
            .await
            .ok_or_else(|| MigrateError::MissingCredential {
                job_id: account.job_id.clone(),
                row_index: account.row_index,
                side: "source",
            })?;

        let session = self
            .transport
            .connect(&ConnectParams {
                host: account.source.host.clone(),
                port: account.source.port,
                username: account.source.username.clone(),
                secret: source_secret,
                use_tls: account.source.use_tls,
            })
            .await?;
        let src = source.insert(session);

        let mut folders = src.list_folders().await?;
        folders.retain(|path| {
            if is_non_migratable(path) {
                debug!("Skipping non-migratable folder {}", path);
                false
            } else {
                true
            }
        });

        for path in folders {
            if let Err(e) = self.migrate_folder(job, account, src, dest, &path).await {
                // Folder failures are non-fatal to the account. Only
                // the copy loop writes cursors, so a discovery failure
                // cannot clobber a partially-copied folder.
                warn!("Folder {} failed: {}", path, e);
                self.store
                    .update_folder_status(
                        &account.job_id,
                        account.row_index,
                        &path,
                        MigrationStatus::Failed,
                    )
                    .await?;
                self.events
                    .publish(MigrationEvent::log(
                        &account.job_id,
                        "warn",
                        &format!("folder {path} failed: {e}"),
                    ))
                    .await;
            }
        }

        Ok(())
    }

    async fn migrate_folder(
        &self,
        job: &JobRecord,
        account: &mut AccountRecord,
        src: &mut Box<dyn MailSession>,
        dest: &mut DestState,
        path: &str,
    ) -> Result<()> {
        let total = i64::from(src.count_messages(path).await?);

        // Idempotent: rediscovery refreshes the total without resetting
        // progress of a folder already in flight
        self.store
            .upsert_folder(&account.job_id, account.row_index, path, total)
            .await?;
        let mut folder = self
            .store
            .get_folder(&account.job_id, account.row_index, path)
            .await?
            .ok_or_else(|| MigrateError::NotFound(format!("folder {path}")))?;
        self.events
            .publish(MigrationEvent::folder_status(&folder))
            .await;

        // Account totals grow as discovery proceeds, so observers see
        // the full size before any copying happens
        account.total_messages += folder.total_messages;
        account.moved_messages += folder.moved_messages;
        self.store
            .update_account_progress(
                &account.job_id,
                account.row_index,
                account.total_messages,
                account.moved_messages,
            )
            .await?;
        self.events
            .publish(MigrationEvent::account_status(account))
            .await;

        if job.mode == MigrationMode::DryRun {
            debug!("Dry-run: not copying {} ({} messages)", path, total);
            return Ok(());
        }

        if dest.session.is_none() {
            // One destination session per account, reused across folders
            let secret = match self
                .vault
                .get(
                    &account.job_id,
                    account.row_index,
                    CredentialSide::Destination,
                )
                .await
            {
                Some(secret) => secret,
                // Documented fallback: reuse the source credential
                None => self
                    .vault
                    .get(&account.job_id, account.row_index, CredentialSide::Source)
                    .await
                    .ok_or_else(|| MigrateError::MissingCredential {
                        job_id: account.job_id.clone(),
                        row_index: account.row_index,
                        side: "destination",
                    })?,
            };

            let mut session = self
                .transport
                .connect(&ConnectParams {
                    host: account.destination.host.clone(),
                    port: account.destination.port,
                    username: account.destination.username.clone(),
                    secret,
                    use_tls: account.destination.use_tls,
                })
                .await?;
            dest.folders = session.list_folders().await?;
            dest.session = Some(session);
        }

        let dest_path = reconcile(path, &dest.folders);
        if !dest.folders.contains(&dest_path) {
            dest.folders.push(dest_path.clone());
        }

        let dst = dest
            .session
            .as_mut()
            .ok_or_else(|| MigrateError::Imap("destination session unavailable".to_string()))?;
        dst.ensure_folder(&dest_path).await?;

        self.copy_folder(job, account, src, dst, path, &dest_path, &mut folder)
            .await
    }
}
