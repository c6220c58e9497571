//! Batch copy loop - the resumable core of a migration
//!
//! Progress is persisted after every single message, so an interrupted
//! run loses at most one in-flight batch fetch, never a folder.

use crate::engine::flags::sanitize_flags;
use crate::engine::MigrationEngine;
use crate::error::Result;
use crate::events::MigrationEvent;
use crate::store::types::{AccountRecord, FolderRecord, JobRecord, MigrationStatus};
use crate::transport::MailSession;
use tracing::{debug, info, warn};

impl MigrationEngine {
    /// Copy all not-yet-copied messages of one folder.
    ///
    /// Resumes from the folder's persisted cursor. The batch cursor
    /// always advances past the last fetched UID, copied or not, so the
    /// loop terminates even under repeated per-message failures.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn copy_folder(
        &self,
        job: &JobRecord,
        account: &mut AccountRecord,
        src: &mut Box<dyn MailSession>,
        dst: &mut Box<dyn MailSession>,
        source_path: &str,
        dest_path: &str,
        folder: &mut FolderRecord,
    ) -> Result<()> {
        let batch_size = account.batch_size.unwrap_or(job.batch_size).max(1) as usize;
        let mut cursor = (folder.last_uid + 1) as u32;
        let mut processed = folder.moved_messages;

        folder.status = MigrationStatus::Running;
        self.store
            .update_folder_progress(
                &account.job_id,
                account.row_index,
                source_path,
                processed,
                folder.last_uid,
                folder.status,
            )
            .await?;
        self.events
            .publish(MigrationEvent::folder_status(folder))
            .await;
        debug!(
            "Copying {} -> {} from UID {} ({}/{} already moved)",
            source_path, dest_path, cursor, processed, folder.total_messages
        );

        while processed < folder.total_messages {
            let batch = src.fetch_messages(source_path, cursor, batch_size).await?;

            // Totals are a point-in-time estimate; a short source is
            // acceptable and ends the loop
            let Some(last) = batch.last() else {
                debug!(
                    "Source returned no messages above UID {} in {}",
                    cursor, source_path
                );
                break;
            };
            let next_cursor = last.uid + 1;

            for message in &batch {
                let Some(body) = message.body.as_deref() else {
                    warn!(
                        "Message {} in {} has no retrievable body, skipping",
                        message.uid, source_path
                    );
                    self.events
                        .publish(MigrationEvent::log(
                            &account.job_id,
                            "warn",
                            &format!(
                                "message {} in {source_path} has no retrievable body, skipped",
                                message.uid
                            ),
                        ))
                        .await;
                    continue;
                };

                let flags = sanitize_flags(&message.flags);
                if let Err(e) = dst
                    .append_message(dest_path, body, flags.as_deref(), message.internal_date)
                    .await
                {
                    // A single bad message must not abort the folder
                    warn!(
                        "Append of message {} to {} failed: {}",
                        message.uid, dest_path, e
                    );
                    self.events
                        .publish(MigrationEvent::log(
                            &account.job_id,
                            "warn",
                            &format!(
                                "message {} could not be appended to {dest_path}: {e}",
                                message.uid
                            ),
                        ))
                        .await;
                    continue;
                }

                processed += 1;
                account.moved_messages += 1;
                folder.moved_messages = processed;
                folder.last_uid = i64::from(message.uid);
                folder.status = if processed >= folder.total_messages {
                    MigrationStatus::Done
                } else {
                    MigrationStatus::Running
                };

                self.store
                    .update_folder_progress(
                        &account.job_id,
                        account.row_index,
                        source_path,
                        processed,
                        folder.last_uid,
                        folder.status,
                    )
                    .await?;
                self.events
                    .publish(MigrationEvent::folder_status(folder))
                    .await;
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
            }

            // Advance past the last fetched message even if some were
            // skipped; skipped messages are not retried
            cursor = next_cursor;
        }

        // A short source count is accepted as final
        folder.status = MigrationStatus::Done;
        folder.moved_messages = processed;
        self.store
            .update_folder_progress(
                &account.job_id,
                account.row_index,
                source_path,
                processed,
                folder.last_uid,
                folder.status,
            )
            .await?;
        self.events
            .publish(MigrationEvent::folder_status(folder))
            .await;
        info!(
            "Folder {} done: {}/{} messages",
            source_path, processed, folder.total_messages
        );

        Ok(())
    }
}
