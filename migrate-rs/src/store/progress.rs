//! Progress store - durable state for jobs, accounts and folders
//!
//! Single source of truth for resumption. All mutations are single-row
//! upserts keyed by (job), (job, row) or (job, row, folder).

use crate::error::{MigrateError, Result};
use crate::store::types::{
    AccountRecord, Endpoint, FolderRecord, JobRecord, MigrationMode, MigrationStatus,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Durable progress store backed by SQLite
#[derive(Clone)]
pub struct ProgressStore {
    db: SqlitePool,
}

impl ProgressStore {
    /// Create a new progress store
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS migration_jobs (
                id TEXT PRIMARY KEY,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                total_messages INTEGER NOT NULL DEFAULT 0,
                moved_messages INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                current_row_index INTEGER NOT NULL DEFAULT 0,
                concurrency INTEGER NOT NULL DEFAULT 1,
                batch_size INTEGER NOT NULL DEFAULT 200,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS migration_accounts (
                job_id TEXT NOT NULL,
                row_index INTEGER NOT NULL,
                source_host TEXT NOT NULL,
                source_port INTEGER NOT NULL,
                source_user TEXT NOT NULL,
                source_tls BOOLEAN NOT NULL DEFAULT 1,
                dest_host TEXT NOT NULL,
                dest_port INTEGER NOT NULL,
                dest_user TEXT NOT NULL,
                dest_tls BOOLEAN NOT NULL DEFAULT 1,
                batch_size INTEGER,
                status TEXT NOT NULL,
                last_error TEXT,
                total_messages INTEGER NOT NULL DEFAULT 0,
                moved_messages INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (job_id, row_index)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS migration_folders (
                job_id TEXT NOT NULL,
                row_index INTEGER NOT NULL,
                source_path TEXT NOT NULL,
                total_messages INTEGER NOT NULL DEFAULT 0,
                moved_messages INTEGER NOT NULL DEFAULT 0,
                last_uid INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                PRIMARY KEY (job_id, row_index, source_path)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_migration_accounts_job ON migration_accounts(job_id)",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_migration_folders_account ON migration_folders(job_id, row_index)",
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    // -- jobs --

    /// Persist a new job
    pub async fn create_job(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_jobs (
                id, mode, status, total_messages, moved_messages, error_count,
                current_row_index, concurrency, batch_size, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.mode.to_string())
        .bind(job.status.to_string())
        .bind(job.total_messages)
        .bind(job.moved_messages)
        .bind(job.error_count)
        .bind(job.current_row_index)
        .bind(job.concurrency)
        .bind(job.batch_size)
        .bind(job.created_at.to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Get a job by ID
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, mode, status, total_messages, moved_messages, error_count,
                   current_row_index, concurrency, batch_size, created_at
            FROM migration_jobs
            WHERE id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// List all jobs, newest first
    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, mode, status, total_messages, moved_messages, error_count,
                   current_row_index, concurrency, batch_size, created_at
            FROM migration_jobs
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    /// Update a job's status
    pub async fn update_job_status(&self, job_id: &str, status: MigrationStatus) -> Result<()> {
        sqlx::query("UPDATE migration_jobs SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(job_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Update a job's aggregate counters and resume cursor
    pub async fn update_job_progress(
        &self,
        job_id: &str,
        total: i64,
        moved: i64,
        error_count: i64,
        current_row_index: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE migration_jobs
            SET total_messages = ?, moved_messages = ?, error_count = ?, current_row_index = ?
            WHERE id = ?
            "#,
        )
        .bind(total)
        .bind(moved)
        .bind(error_count)
        .bind(current_row_index)
        .bind(job_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Delete a job with its accounts and folders
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM migration_folders WHERE job_id = ?")
            .bind(job_id)
            .execute(&self.db)
            .await?;
        sqlx::query("DELETE FROM migration_accounts WHERE job_id = ?")
            .bind(job_id)
            .execute(&self.db)
            .await?;
        sqlx::query("DELETE FROM migration_jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    // -- accounts --

    /// Persist a new account row
    pub async fn create_account(&self, account: &AccountRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_accounts (
                job_id, row_index, source_host, source_port, source_user, source_tls,
                dest_host, dest_port, dest_user, dest_tls, batch_size, status,
                last_error, total_messages, moved_messages
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.job_id)
        .bind(account.row_index)
        .bind(&account.source.host)
        .bind(account.source.port)
        .bind(&account.source.username)
        .bind(account.source.use_tls)
        .bind(&account.destination.host)
        .bind(account.destination.port)
        .bind(&account.destination.username)
        .bind(account.destination.use_tls)
        .bind(account.batch_size)
        .bind(account.status.to_string())
        .bind(&account.last_error)
        .bind(account.total_messages)
        .bind(account.moved_messages)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Get one account by (job, row)
    pub async fn get_account(&self, job_id: &str, row_index: i64) -> Result<Option<AccountRecord>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, row_index, source_host, source_port, source_user, source_tls,
                   dest_host, dest_port, dest_user, dest_tls, batch_size, status,
                   last_error, total_messages, moved_messages
            FROM migration_accounts
            WHERE job_id = ? AND row_index = ?
            "#,
        )
        .bind(job_id)
        .bind(row_index)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    /// Get all accounts of a job, ordered by row index
    pub async fn get_accounts_by_job(&self, job_id: &str) -> Result<Vec<AccountRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, row_index, source_host, source_port, source_user, source_tls,
                   dest_host, dest_port, dest_user, dest_tls, batch_size, status,
                   last_error, total_messages, moved_messages
            FROM migration_accounts
            WHERE job_id = ?
            ORDER BY row_index ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::row_to_account).collect()
    }

    /// Update an account's status and last error
    pub async fn update_account_status(
        &self,
        job_id: &str,
        row_index: i64,
        status: MigrationStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE migration_accounts
            SET status = ?, last_error = ?
            WHERE job_id = ? AND row_index = ?
            "#,
        )
        .bind(status.to_string())
        .bind(last_error)
        .bind(job_id)
        .bind(row_index)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Update an account's message counters
    pub async fn update_account_progress(
        &self,
        job_id: &str,
        row_index: i64,
        total: i64,
        moved: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE migration_accounts
            SET total_messages = ?, moved_messages = ?
            WHERE job_id = ? AND row_index = ?
            "#,
        )
        .bind(total)
        .bind(moved)
        .bind(job_id)
        .bind(row_index)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    // -- folders --

    /// Create or refresh a folder record with a freshly discovered total.
    ///
    /// Idempotent: rediscovery never resets moved_messages, last_uid or
    /// the status of a folder that is already in progress.
    pub async fn upsert_folder(
        &self,
        job_id: &str,
        row_index: i64,
        source_path: &str,
        total: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_folders (
                job_id, row_index, source_path, total_messages, moved_messages, last_uid, status
            ) VALUES (?, ?, ?, ?, 0, 0, ?)
            ON CONFLICT(job_id, row_index, source_path) DO UPDATE SET
                total_messages = excluded.total_messages
            "#,
        )
        .bind(job_id)
        .bind(row_index)
        .bind(source_path)
        .bind(total)
        .bind(MigrationStatus::Pending.to_string())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Get one folder by (job, row, path)
    pub async fn get_folder(
        &self,
        job_id: &str,
        row_index: i64,
        source_path: &str,
    ) -> Result<Option<FolderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, row_index, source_path, total_messages, moved_messages, last_uid, status
            FROM migration_folders
            WHERE job_id = ? AND row_index = ? AND source_path = ?
            "#,
        )
        .bind(job_id)
        .bind(row_index)
        .bind(source_path)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_folder(&row)?)),
            None => Ok(None),
        }
    }

    /// Get all folders of an account
    pub async fn get_folders_by_account(
        &self,
        job_id: &str,
        row_index: i64,
    ) -> Result<Vec<FolderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, row_index, source_path, total_messages, moved_messages, last_uid, status
            FROM migration_folders
            WHERE job_id = ? AND row_index = ?
            ORDER BY source_path ASC
            "#,
        )
        .bind(job_id)
        .bind(row_index)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::row_to_folder).collect()
    }

    /// Update a folder's copy progress
    pub async fn update_folder_progress(
        &self,
        job_id: &str,
        row_index: i64,
        source_path: &str,
        moved: i64,
        last_uid: i64,
        status: MigrationStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE migration_folders
            SET moved_messages = ?, last_uid = ?, status = ?
            WHERE job_id = ? AND row_index = ? AND source_path = ?
            "#,
        )
        .bind(moved)
        .bind(last_uid)
        .bind(status.to_string())
        .bind(job_id)
        .bind(row_index)
        .bind(source_path)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Set a folder's status without touching its copy progress.
    ///
    /// Inserts the row if discovery failed before the first upsert.
    pub async fn update_folder_status(
        &self,
        job_id: &str,
        row_index: i64,
        source_path: &str,
        status: MigrationStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_folders (
                job_id, row_index, source_path, total_messages, moved_messages, last_uid, status
            ) VALUES (?, ?, ?, 0, 0, 0, ?)
            ON CONFLICT(job_id, row_index, source_path) DO UPDATE SET
                status = excluded.status
            "#,
        )
        .bind(job_id)
        .bind(row_index)
        .bind(source_path)
        .bind(status.to_string())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Sum of moved messages across all folders of an account
    pub async fn sum_account_moved(&self, job_id: &str, row_index: i64) -> Result<i64> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(moved_messages), 0) AS moved
            FROM migration_folders
            WHERE job_id = ? AND row_index = ?
            "#,
        )
        .bind(job_id)
        .bind(row_index)
        .fetch_one(&self.db)
        .await?;

        Ok(row.try_get("moved")?)
    }

    // -- row converters --

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<JobRecord> {
        use sqlx::Row;

        let mode_str: String = row.try_get("mode")?;
        let status_str: String = row.try_get("status")?;
        let created_at_str: String = row.try_get("created_at")?;

        Ok(JobRecord {
            id: row.try_get("id")?,
            mode: MigrationMode::from_str(&mode_str).map_err(MigrateError::Parse)?,
            status: MigrationStatus::from_str(&status_str).map_err(MigrateError::Parse)?,
            total_messages: row.try_get("total_messages")?,
            moved_messages: row.try_get("moved_messages")?,
            error_count: row.try_get("error_count")?,
            current_row_index: row.try_get("current_row_index")?,
            concurrency: row.try_get("concurrency")?,
            batch_size: row.try_get("batch_size")?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map_err(|e| MigrateError::Parse(e.to_string()))?
                .with_timezone(&Utc),
        })
    }

    fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<AccountRecord> {
        use sqlx::Row;

        let status_str: String = row.try_get("status")?;
        let source_port: i64 = row.try_get("source_port")?;
        let dest_port: i64 = row.try_get("dest_port")?;

        Ok(AccountRecord {
            job_id: row.try_get("job_id")?,
            row_index: row.try_get("row_index")?,
            source: Endpoint {
                host: row.try_get("source_host")?,
                port: source_port as u16,
                username: row.try_get("source_user")?,
                use_tls: row.try_get("source_tls")?,
            },
            destination: Endpoint {
                host: row.try_get("dest_host")?,
                port: dest_port as u16,
                username: row.try_get("dest_user")?,
                use_tls: row.try_get("dest_tls")?,
            },
            batch_size: row.try_get("batch_size")?,
            status: MigrationStatus::from_str(&status_str).map_err(MigrateError::Parse)?,
            last_error: row.try_get("last_error")?,
            total_messages: row.try_get("total_messages")?,
            moved_messages: row.try_get("moved_messages")?,
        })
    }

    fn row_to_folder(row: &sqlx::sqlite::SqliteRow) -> Result<FolderRecord> {
        use sqlx::Row;

        let status_str: String = row.try_get("status")?;

        Ok(FolderRecord {
            job_id: row.try_get("job_id")?,
            row_index: row.try_get("row_index")?,
            source_path: row.try_get("source_path")?,
            total_messages: row.try_get("total_messages")?,
            moved_messages: row.try_get("moved_messages")?,
            last_uid: row.try_get("last_uid")?,
            status: MigrationStatus::from_str(&status_str).map_err(MigrateError::Parse)?,
        })
    }
}
