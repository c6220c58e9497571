//! IMAP implementation of the mail transport

use crate::error::{MigrateError, Result};
use crate::transport::{ConnectParams, FetchedMessage, MailSession, MailTransport};
use async_imap::types::Flag;
use async_imap::Session;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use futures::StreamExt;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

type TlsSession = Session<Compat<tokio_rustls::client::TlsStream<TcpStream>>>;
type PlainSession = Session<Compat<TcpStream>>;

enum SessionInner {
    Tls(TlsSession),
    Plain(PlainSession),
}

macro_rules! with_session {
    ($self:expr, $s:ident => $body:expr) => {
        match &mut $self.inner {
            SessionInner::Tls($s) => $body,
            SessionInner::Plain($s) => $body,
        }
    };
}

/// IMAP transport over TLS or plain TCP
#[derive(Default)]
pub struct ImapTransport;

impl ImapTransport {
    pub fn new() -> Self {
        Self
    }

    fn tls_connector() -> TlsConnector {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        TlsConnector::from(Arc::new(config))
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn MailSession>> {
        let addr = format!("{}:{}", params.host, params.port);
        debug!("Connecting to IMAP server at {}", addr);

        let tcp = TcpStream::connect(&addr).await?;

        let inner = if params.use_tls {
            let server_name = ServerName::try_from(params.host.as_str())
                .map_err(|e| MigrateError::Tls(format!("Invalid server name: {e}")))?;
            let tls = Self::tls_connector()
                .connect(server_name, tcp)
                .await
                .map_err(|e| MigrateError::Tls(e.to_string()))?;

            let client = async_imap::Client::new(tls.compat());
            let session = client
                .login(&params.username, &params.secret)
                .await
                .map_err(|(e, _)| MigrateError::Imap(format!("Login failed: {e}")))?;
            SessionInner::Tls(session)
        } else {
            let client = async_imap::Client::new(tcp.compat());
            let session = client
                .login(&params.username, &params.secret)
                .await
                .map_err(|(e, _)| MigrateError::Imap(format!("Login failed: {e}")))?;
            SessionInner::Plain(session)
        };

        info!("Connected to {} as {}", addr, params.username);
        Ok(Box::new(ImapMailSession {
            inner,
            selected: None,
        }))
    }
}

/// One authenticated IMAP session
pub struct ImapMailSession {
    inner: SessionInner,
    selected: Option<String>,
}

impl ImapMailSession {
    /// SELECT a folder, skipping the round trip when already selected
    async fn select(&mut self, path: &str) -> Result<async_imap::types::Mailbox> {
        let mailbox = with_session!(self, s => s.select(path).await)
            .map_err(|e| MigrateError::Imap(format!("SELECT {path} failed: {e}")))?;
        self.selected = Some(path.to_string());
        Ok(mailbox)
    }

    async fn select_if_needed(&mut self, path: &str) -> Result<()> {
        if self.selected.as_deref() != Some(path) {
            self.select(path).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MailSession for ImapMailSession {
    async fn list_folders(&mut self) -> Result<Vec<String>> {
        with_session!(self, s => {
            let mut stream = s
                .list(Some(""), Some("*"))
                .await
                .map_err(|e| MigrateError::Imap(format!("LIST failed: {e}")))?;

            let mut names = Vec::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(name) => names.push(name.name().to_string()),
                    Err(e) => warn!("Skipping unparseable LIST item: {}", e),
                }
            }
            Ok(names)
        })
    }

    async fn count_messages(&mut self, path: &str) -> Result<u32> {
        let mailbox = self.select(path).await?;
        Ok(mailbox.exists)
    }

    async fn fetch_messages(
        &mut self,
        path: &str,
        from_uid: u32,
        max: usize,
    ) -> Result<Vec<FetchedMessage>> {
        self.select_if_needed(path).await?;

        // UID n:* always matches the mailbox's last message even when
        // its UID is below n, so the result must be filtered again.
        let query = format!("UID {from_uid}:*");
        let uids = with_session!(self, s => s.uid_search(&query).await)
            .map_err(|e| MigrateError::Imap(format!("UID SEARCH failed: {e}")))?;

        let mut uid_list: Vec<u32> = uids.into_iter().filter(|uid| *uid >= from_uid).collect();
        uid_list.sort_unstable();
        uid_list.truncate(max);

        if uid_list.is_empty() {
            return Ok(vec![]);
        }

        let set = uid_list
            .iter()
            .map(|uid| uid.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut messages = with_session!(self, s => {
            let mut stream = s
                .uid_fetch(&set, "(UID FLAGS INTERNALDATE BODY.PEEK[])")
                .await
                .map_err(|e| MigrateError::Imap(format!("UID FETCH failed: {e}")))?;

            let mut messages = Vec::new();
            while let Some(item) = stream.next().await {
                let fetch = item.map_err(|e| MigrateError::Imap(format!("FETCH error: {e}")))?;
                let Some(uid) = fetch.uid else {
                    warn!("FETCH response without UID in {}, skipping", path);
                    continue;
                };
                messages.push(FetchedMessage {
                    uid,
                    body: fetch.body().map(|b| b.to_vec()),
                    flags: fetch.flags().filter_map(|f| flag_token(&f)).collect(),
                    internal_date: fetch.internal_date(),
                });
            }
            Ok::<_, MigrateError>(messages)
        })?;

        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    async fn append_message(
        &mut self,
        path: &str,
        body: &[u8],
        flags: Option<&[String]>,
        internal_date: Option<DateTime<FixedOffset>>,
    ) -> Result<()> {
        let flag_str = flags.map(flag_list);
        let date_str = internal_date.map(date_literal);

        with_session!(self, s => {
            s.append(path, flag_str.as_deref(), date_str.as_deref(), body)
                .await
                .map_err(|e| MigrateError::Imap(format!("APPEND to {path} failed: {e}")))
        })
    }

    async fn ensure_folder(&mut self, path: &str) -> Result<()> {
        let existing = self.list_folders().await?;
        if existing.iter().any(|e| e == path) {
            return Ok(());
        }

        let separator = if path.contains('/') {
            Some('/')
        } else if path.contains('.') {
            Some('.')
        } else {
            None
        };

        let mut prefixes = Vec::new();
        match separator {
            Some(sep) => {
                let mut acc = String::new();
                for segment in path.split(sep) {
                    if !acc.is_empty() {
                        acc.push(sep);
                    }
                    acc.push_str(segment);
                    prefixes.push(acc.clone());
                }
            }
            None => prefixes.push(path.to_string()),
        }

        for prefix in &prefixes {
            if existing.iter().any(|e| e == prefix) {
                continue;
            }
            let result = with_session!(self, s => s.create(prefix).await);
            if let Err(e) = result {
                if prefix == path {
                    return Err(MigrateError::Imap(format!("CREATE {prefix} failed: {e}")));
                }
                // Intermediate segment may already exist under a
                // different listing; the final CREATE decides.
                debug!("CREATE {} rejected: {}", prefix, e);
            }
        }

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        with_session!(self, s => {
            s.logout()
                .await
                .map_err(|e| MigrateError::Imap(format!("LOGOUT failed: {e}")))
        })
    }
}

/// Wire token for a fetched flag; `\Recent` is session state and not
/// settable on APPEND, so it is dropped here.
fn flag_token(flag: &Flag<'_>) -> Option<String> {
    match flag {
        Flag::Seen => Some("\\Seen".to_string()),
        Flag::Answered => Some("\\Answered".to_string()),
        Flag::Flagged => Some("\\Flagged".to_string()),
        Flag::Deleted => Some("\\Deleted".to_string()),
        Flag::Draft => Some("\\Draft".to_string()),
        Flag::Custom(token) => Some(token.to_string()),
        _ => None,
    }
}

/// Parenthesized flag list for APPEND; the string is inserted into the
/// command verbatim, so the parentheses must be part of it.
fn flag_list(flags: &[String]) -> String {
    format!("({})", flags.join(" "))
}

/// Quoted date-time literal for APPEND, same verbatim rule as
/// [`flag_list`].
fn date_literal(date: DateTime<FixedOffset>) -> String {
    format!("\"{}\"", date.format("%d-%b-%Y %H:%M:%S %z"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_flag_list_is_parenthesized() {
        let flags = vec!["\\Seen".to_string(), "custom-1".to_string()];
        assert_eq!(flag_list(&flags), "(\\Seen custom-1)");
    }

    #[test]
    fn test_date_literal_is_quoted() {
        let date = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 2, 5, 9, 30, 0)
            .unwrap();
        assert_eq!(date_literal(date), "\"05-Feb-2024 09:30:00 +0100\"");
    }

    #[test]
    fn test_recent_flag_is_dropped() {
        assert_eq!(flag_token(&Flag::Recent), None);
        assert_eq!(flag_token(&Flag::Seen).as_deref(), Some("\\Seen"));
    }
}
