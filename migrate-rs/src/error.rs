use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IMAP protocol error: {0}")]
    Imap(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Missing {side} credential for job {job_id} row {row_index}")]
    MissingCredential {
        job_id: String,
        row_index: i64,
        side: &'static str,
    },

    #[error("Job {0} is already running")]
    JobAlreadyRunning(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MigrateError>;
