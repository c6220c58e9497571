//! Mail transport abstraction
//!
//! The engine drives migrations through these traits; [`imap`] provides
//! the production implementation. Tests substitute an in-memory
//! transport. Retry policy, if any, belongs to a transport
//! implementation, never to the engine.

pub mod imap;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

pub use imap::ImapTransport;

/// Parameters for opening one mail session
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub use_tls: bool,
}

/// One message as fetched from a source folder
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    /// Source-side message identifier, unique and ascending per folder
    pub uid: u32,
    /// Raw message bytes; absent when the server returned no body
    pub body: Option<Vec<u8>>,
    /// Flag tokens as reported by the server, unsanitized
    pub flags: Vec<String>,
    /// Original received timestamp
    pub internal_date: Option<DateTime<FixedOffset>>,
}

/// Factory for mail sessions
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Open an authenticated session
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn MailSession>>;
}

/// A stateful, authenticated mail session
#[async_trait]
pub trait MailSession: Send {
    /// List all folder paths
    async fn list_folders(&mut self) -> Result<Vec<String>>;

    /// Count messages in a folder
    async fn count_messages(&mut self, path: &str) -> Result<u32>;

    /// Fetch up to `max` messages with UID >= `from_uid`, ascending
    async fn fetch_messages(
        &mut self,
        path: &str,
        from_uid: u32,
        max: usize,
    ) -> Result<Vec<FetchedMessage>>;

    /// Append a message to a folder, preserving flags and timestamp
    async fn append_message(
        &mut self,
        path: &str,
        body: &[u8],
        flags: Option<&[String]>,
        internal_date: Option<DateTime<FixedOffset>>,
    ) -> Result<()>;

    /// Create a folder and any missing parent segments
    async fn ensure_folder(&mut self, path: &str) -> Result<()>;

    /// Close the session
    async fn disconnect(&mut self) -> Result<()>;
}
