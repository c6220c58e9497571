//! Integration tests for the migration engine
//!
//! Uses an in-memory mail transport so jobs run against scripted
//! mailboxes, and an in-memory SQLite progress store.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use migrate_rs::credentials::CredentialVault;
use migrate_rs::engine::plan::{MigrationPlan, PlanAccount, PlanEndpoint};
use migrate_rs::engine::MigrationEngine;
use migrate_rs::error::{MigrateError, Result};
use migrate_rs::events::EventBus;
use migrate_rs::store::{MigrationMode, MigrationStatus, ProgressStore};
use migrate_rs::transport::{ConnectParams, FetchedMessage, MailSession, MailTransport};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct StoredMessage {
    uid: u32,
    body: Option<Vec<u8>>,
    flags: Vec<String>,
    internal_date: Option<DateTime<FixedOffset>>,
}

#[derive(Default)]
struct ServerState {
    folders: BTreeMap<String, Vec<StoredMessage>>,
}

#[derive(Default)]
struct MemoryState {
    servers: HashMap<String, ServerState>,
    fail_connect: HashSet<String>,
    /// (host, folder, from_uid, max) per fetch call
    fetch_calls: Vec<(String, String, u32, usize)>,
}

/// In-memory mail transport; servers are keyed by host name
#[derive(Clone, Default)]
struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    fn new() -> Self {
        Self::default()
    }

    fn seed_folder(&self, host: &str, path: &str, messages: Vec<StoredMessage>) {
        let mut state = self.state.lock().unwrap();
        state
            .servers
            .entry(host.to_string())
            .or_default()
            .folders
            .insert(path.to_string(), messages);
    }

    fn fail_connect(&self, host: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_connect
            .insert(host.to_string());
    }

    fn folder_messages(&self, host: &str, path: &str) -> Vec<StoredMessage> {
        let state = self.state.lock().unwrap();
        state
            .servers
            .get(host)
            .and_then(|server| server.folders.get(path))
            .cloned()
            .unwrap_or_default()
    }

    fn folder_names(&self, host: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .servers
            .get(host)
            .map(|server| server.folders.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn fetch_calls(&self) -> Vec<(String, String, u32, usize)> {
        self.state.lock().unwrap().fetch_calls.clone()
    }

    fn clear_fetch_calls(&self) {
        self.state.lock().unwrap().fetch_calls.clear();
    }
}

#[async_trait]
impl MailTransport for MemoryTransport {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn MailSession>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_connect.contains(&params.host) {
            return Err(MigrateError::Imap(format!(
                "connection refused: {}",
                params.host
            )));
        }
        state.servers.entry(params.host.clone()).or_default();
        Ok(Box::new(MemorySession {
            state: self.state.clone(),
            host: params.host.clone(),
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
    host: String,
}

#[async_trait]
impl MailSession for MemorySession {
    async fn list_folders(&mut self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .servers
            .get(&self.host)
            .map(|server| server.folders.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn count_messages(&mut self, path: &str) -> Result<u32> {
        let state = self.state.lock().unwrap();
        state
            .servers
            .get(&self.host)
            .and_then(|server| server.folders.get(path))
            .map(|messages| messages.len() as u32)
            .ok_or_else(|| MigrateError::Imap(format!("no such folder: {path}")))
    }

    async fn fetch_messages(
        &mut self,
        path: &str,
        from_uid: u32,
        max: usize,
    ) -> Result<Vec<FetchedMessage>> {
        let mut state = self.state.lock().unwrap();
        state
            .fetch_calls
            .push((self.host.clone(), path.to_string(), from_uid, max));

        let messages = state
            .servers
            .get(&self.host)
            .and_then(|server| server.folders.get(path))
            .ok_or_else(|| MigrateError::Imap(format!("no such folder: {path}")))?;

        Ok(messages
            .iter()
            .filter(|m| m.uid >= from_uid)
            .take(max)
            .map(|m| FetchedMessage {
                uid: m.uid,
                body: m.body.clone(),
                flags: m.flags.clone(),
                internal_date: m.internal_date,
            })
            .collect())
    }

    async fn append_message(
        &mut self,
        path: &str,
        body: &[u8],
        flags: Option<&[String]>,
        internal_date: Option<DateTime<FixedOffset>>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let folder = state
            .servers
            .get_mut(&self.host)
            .and_then(|server| server.folders.get_mut(path))
            .ok_or_else(|| MigrateError::Imap(format!("no such folder: {path}")))?;

        let uid = folder.iter().map(|m| m.uid).max().unwrap_or(0) + 1;
        folder.push(StoredMessage {
            uid,
            body: Some(body.to_vec()),
            flags: flags.map(<[String]>::to_vec).unwrap_or_default(),
            internal_date,
        });
        Ok(())
    }

    async fn ensure_folder(&mut self, path: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .servers
            .get_mut(&self.host)
            .ok_or_else(|| MigrateError::Imap("session lost".to_string()))?
            .folders
            .entry(path.to_string())
            .or_default();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

// -- fixtures --

fn message(uid: u32) -> StoredMessage {
    let date = FixedOffset::east_opt(3600)
        .unwrap()
        .with_ymd_and_hms(2023, 5, 1, 10, 0, uid % 60)
        .unwrap();
    StoredMessage {
        uid,
        body: Some(format!("From: a@example\r\nSubject: msg {uid}\r\n\r\nbody {uid}").into_bytes()),
        flags: vec!["\\Seen".to_string()],
        internal_date: Some(date),
    }
}

fn messages(uids: std::ops::RangeInclusive<u32>) -> Vec<StoredMessage> {
    uids.map(message).collect()
}

fn endpoint(host: &str) -> PlanEndpoint {
    PlanEndpoint {
        host: host.to_string(),
        port: 143,
        username: format!("user@{host}"),
        password: Some("secret".to_string()),
        use_tls: false,
    }
}

fn account_row(source: &str, destination: &str) -> PlanAccount {
    PlanAccount {
        batch_size: None,
        source: endpoint(source),
        destination: endpoint(destination),
    }
}

fn plan(mode: MigrationMode, batch_size: i64, rows: Vec<PlanAccount>) -> MigrationPlan {
    MigrationPlan {
        mode,
        batch_size: Some(batch_size),
        accounts: rows,
    }
}

async fn setup_engine(
    transport: &MemoryTransport,
) -> (Arc<MigrationEngine>, ProgressStore, CredentialVault, EventBus) {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let store = ProgressStore::new(pool);
    store.init_db().await.unwrap();

    let events = EventBus::new();
    let vault = CredentialVault::new();
    let engine = Arc::new(MigrationEngine::new(
        store.clone(),
        events.clone(),
        vault.clone(),
        Arc::new(transport.clone()),
        200,
    ));
    (engine, store, vault, events)
}

// -- scenarios --

#[tokio::test]
async fn test_end_to_end_single_folder() {
    let transport = MemoryTransport::new();
    transport.seed_folder("src", "INBOX", messages(1..=5));
    let (engine, store, _, _) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::Migrate,
            2,
            vec![account_row("src", "dst")],
        ))
        .await
        .unwrap();
    engine.run_job(&job.id).await.unwrap();

    let job = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, MigrationStatus::Done);
    assert_eq!(job.total_messages, 5);
    assert_eq!(job.moved_messages, 5);
    assert_eq!(job.error_count, 0);

    let account = store.get_account(&job.id, 0).await.unwrap().unwrap();
    assert_eq!(account.status, MigrationStatus::Done);
    assert_eq!(account.moved_messages, 5);

    let folder = store.get_folder(&job.id, 0, "INBOX").await.unwrap().unwrap();
    assert_eq!(folder.status, MigrationStatus::Done);
    assert_eq!(folder.moved_messages, 5);
    assert_eq!(folder.last_uid, 5);

    // Batch size 2 over 5 messages: fetches from UID 1, 3 and 5
    let calls = transport.fetch_calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].2, 1);
    assert_eq!(calls[1].2, 3);
    assert_eq!(calls[2].2, 5);

    // Content, flags and timestamps arrive at the destination
    let copied = transport.folder_messages("dst", "INBOX");
    assert_eq!(copied.len(), 5);
    assert_eq!(copied[0].flags, vec!["\\Seen".to_string()]);
    assert!(copied[0].internal_date.is_some());
    assert!(copied[0]
        .body
        .as_deref()
        .unwrap()
        .starts_with(b"From: a@example"));
}

#[tokio::test]
async fn test_resume_starts_after_persisted_cursor() {
    let transport = MemoryTransport::new();
    transport.seed_folder("src", "INBOX", messages(1..=5));
    let (engine, store, _, _) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::Migrate,
            10,
            vec![account_row("src", "dst")],
        ))
        .await
        .unwrap();

    // Simulate an interrupted earlier run: 3 of 5 already copied
    store.upsert_folder(&job.id, 0, "INBOX", 5).await.unwrap();
    store
        .update_folder_progress(&job.id, 0, "INBOX", 3, 3, MigrationStatus::Running)
        .await
        .unwrap();

    engine.run_job(&job.id).await.unwrap();

    // The copy resumed at UID 4: no fetch below the cursor
    let calls = transport.fetch_calls();
    assert!(!calls.is_empty());
    assert_eq!(calls[0].2, 4);

    // Only the two remaining messages were appended
    assert_eq!(transport.folder_messages("dst", "INBOX").len(), 2);

    let folder = store.get_folder(&job.id, 0, "INBOX").await.unwrap().unwrap();
    assert_eq!(folder.status, MigrationStatus::Done);
    assert_eq!(folder.moved_messages, 5);
    assert_eq!(folder.last_uid, 5);

    // Account and job totals count every message exactly once, the
    // already-copied three included
    let account = store.get_account(&job.id, 0).await.unwrap().unwrap();
    assert_eq!(account.total_messages, 5);
    assert_eq!(account.moved_messages, 5);

    let job = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.total_messages, 5);
    assert_eq!(job.moved_messages, 5);
}

#[tokio::test]
async fn test_rerun_of_finished_job_copies_nothing() {
    let transport = MemoryTransport::new();
    transport.seed_folder("src", "INBOX", messages(1..=4));
    let (engine, store, _, _) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::Migrate,
            2,
            vec![account_row("src", "dst")],
        ))
        .await
        .unwrap();
    engine.run_job(&job.id).await.unwrap();
    assert_eq!(transport.folder_messages("dst", "INBOX").len(), 4);

    transport.clear_fetch_calls();
    engine.run_job(&job.id).await.unwrap();

    // Discovery is idempotent: the folder was already complete, so the
    // second run never re-fetched or re-appended anything
    assert!(transport.fetch_calls().is_empty());
    assert_eq!(transport.folder_messages("dst", "INBOX").len(), 4);

    let job = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, MigrationStatus::Done);

    // Counters are rebuilt from folder rows, never stacked on top of
    // the previous run's values
    assert_eq!(job.total_messages, 4);
    assert_eq!(job.moved_messages, 4);

    let account = store.get_account(&job.id, 0).await.unwrap().unwrap();
    assert_eq!(
        (account.total_messages, account.moved_messages),
        (4, 4)
    );
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let transport = MemoryTransport::new();
    transport.seed_folder("src", "INBOX", messages(1..=3));
    transport.seed_folder("src", "Archive", messages(1..=2));
    let (engine, store, _, _) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::DryRun,
            2,
            vec![account_row("src", "dst")],
        ))
        .await
        .unwrap();
    engine.run_job(&job.id).await.unwrap();

    let job = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, MigrationStatus::Done);
    assert_eq!(job.total_messages, 5);
    assert_eq!(job.moved_messages, 0);

    let account = store.get_account(&job.id, 0).await.unwrap().unwrap();
    assert_eq!(account.total_messages, 5);
    assert_eq!(account.moved_messages, 0);

    for folder in store.get_folders_by_account(&job.id, 0).await.unwrap() {
        assert_eq!(folder.moved_messages, 0);
        assert!(folder.total_messages > 0);
    }

    // The destination server was never connected to
    assert!(transport.folder_names("dst").is_empty());
    assert!(transport.fetch_calls().is_empty());
}

#[tokio::test]
async fn test_account_failure_does_not_abort_job() {
    let transport = MemoryTransport::new();
    transport.seed_folder("src1", "INBOX", messages(1..=2));
    transport.seed_folder("src2", "INBOX", messages(1..=2));
    transport.seed_folder("src3", "INBOX", messages(1..=2));
    transport.fail_connect("src2");
    let (engine, store, _, _) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::Migrate,
            10,
            vec![
                account_row("src1", "dst1"),
                account_row("src2", "dst2"),
                account_row("src3", "dst3"),
            ],
        ))
        .await
        .unwrap();
    engine.run_job(&job.id).await.unwrap();

    let job = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, MigrationStatus::Done);
    assert_eq!(job.error_count, 1);
    assert_eq!(job.moved_messages, 4);

    let accounts = store.get_accounts_by_job(&job.id).await.unwrap();
    assert_eq!(accounts[0].status, MigrationStatus::Done);
    assert_eq!(accounts[1].status, MigrationStatus::Failed);
    assert!(accounts[1]
        .last_error
        .as_deref()
        .unwrap()
        .contains("connection refused"));
    assert_eq!(accounts[2].status, MigrationStatus::Done);
}

#[tokio::test]
async fn test_missing_credential_is_fatal_for_the_account() {
    let transport = MemoryTransport::new();
    transport.seed_folder("src", "INBOX", messages(1..=2));
    let (engine, store, vault, _) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::Migrate,
            10,
            vec![account_row("src", "dst")],
        ))
        .await
        .unwrap();

    // Secrets gone, e.g. after a process restart
    vault.remove_job(&job.id).await;

    engine.run_job(&job.id).await.unwrap();

    let job = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, MigrationStatus::Done);
    assert_eq!(job.error_count, 1);

    let account = store.get_account(&job.id, 0).await.unwrap().unwrap();
    assert_eq!(account.status, MigrationStatus::Failed);
    assert!(account.last_error.as_deref().unwrap().contains("credential"));
}

#[tokio::test]
async fn test_bodiless_message_is_skipped_not_retried() {
    let transport = MemoryTransport::new();
    let mut inbox = messages(1..=5);
    inbox[2].body = None;
    transport.seed_folder("src", "INBOX", inbox);
    let (engine, store, _, _) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::Migrate,
            2,
            vec![account_row("src", "dst")],
        ))
        .await
        .unwrap();
    engine.run_job(&job.id).await.unwrap();

    // 4 of 5 arrive; the folder still finishes
    assert_eq!(transport.folder_messages("dst", "INBOX").len(), 4);

    let folder = store.get_folder(&job.id, 0, "INBOX").await.unwrap().unwrap();
    assert_eq!(folder.status, MigrationStatus::Done);
    assert_eq!(folder.moved_messages, 4);
    assert_eq!(folder.last_uid, 5);

    let job = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, MigrationStatus::Done);
    assert_eq!(job.error_count, 0);
}

#[tokio::test]
async fn test_flags_are_sanitized_on_copy() {
    let transport = MemoryTransport::new();
    let mut msg = message(1);
    msg.flags = vec![
        "\\Seen".to_string(),
        "custom-1".to_string(),
        "bad flag!".to_string(),
        "\\Invalid#".to_string(),
    ];
    let mut junk = message(2);
    junk.flags = vec!["totally bad!".to_string()];
    transport.seed_folder("src", "INBOX", vec![msg, junk]);
    let (engine, _, _, _) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::Migrate,
            10,
            vec![account_row("src", "dst")],
        ))
        .await
        .unwrap();
    engine.run_job(&job.id).await.unwrap();

    let copied = transport.folder_messages("dst", "INBOX");
    assert_eq!(copied.len(), 2);
    assert_eq!(
        copied[0].flags,
        vec!["\\Seen".to_string(), "custom-1".to_string()]
    );
    // All-invalid input arrives as "no flags", not an empty list
    assert!(copied[1].flags.is_empty());
}

#[tokio::test]
async fn test_source_folders_are_reconciled_against_destination() {
    let transport = MemoryTransport::new();
    transport.seed_folder("src", "Gönderilmiş", messages(1..=1));
    transport.seed_folder("dst", "INBOX", vec![]);
    transport.seed_folder("dst", "Sent", vec![]);
    transport.seed_folder("dst", "Trash", vec![]);
    let (engine, _, _, _) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::Migrate,
            10,
            vec![account_row("src", "dst")],
        ))
        .await
        .unwrap();
    engine.run_job(&job.id).await.unwrap();

    // The localized sent folder lands in the existing "Sent"
    assert_eq!(transport.folder_messages("dst", "Sent").len(), 1);
    assert!(!transport
        .folder_names("dst")
        .contains(&"Gönderilmiş".to_string()));
}

#[tokio::test]
async fn test_gmail_virtual_folders_are_not_migrated() {
    let transport = MemoryTransport::new();
    transport.seed_folder("src", "INBOX", messages(1..=2));
    transport.seed_folder("src", "[Gmail]/All Mail", messages(1..=50));
    let (engine, store, _, _) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::Migrate,
            10,
            vec![account_row("src", "dst")],
        ))
        .await
        .unwrap();
    engine.run_job(&job.id).await.unwrap();

    let job = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.total_messages, 2);
    assert_eq!(job.moved_messages, 2);
    assert!(!transport
        .folder_names("dst")
        .iter()
        .any(|name| name.starts_with("[Gmail]")));
}

#[tokio::test]
async fn test_running_job_cannot_be_started_twice() {
    let transport = MemoryTransport::new();
    transport.seed_folder("src", "INBOX", vec![]);
    let (engine, store, _, _) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::Migrate,
            10,
            vec![account_row("src", "dst")],
        ))
        .await
        .unwrap();

    store
        .update_job_status(&job.id, MigrationStatus::Running)
        .await
        .unwrap();

    let err = engine.run_job(&job.id).await.unwrap_err();
    assert!(matches!(err, MigrateError::JobAlreadyRunning(_)));
}

#[tokio::test]
async fn test_folder_progress_events_are_monotonic() {
    let transport = MemoryTransport::new();
    transport.seed_folder("src", "INBOX", messages(1..=6));
    let (engine, _, _, events) = setup_engine(&transport).await;

    let job = engine
        .create_job(&plan(
            MigrationMode::Migrate,
            2,
            vec![account_row("src", "dst")],
        ))
        .await
        .unwrap();

    let mut rx = events.subscribe(&job.id).await;
    engine.run_job(&job.id).await.unwrap();

    let mut last_moved = -1i64;
    let mut last_uid = -1i64;
    while let Ok(event) = rx.try_recv() {
        if event.kind == migrate_rs::events::EventKind::FolderStatus {
            let moved = event.payload["moved_messages"].as_i64().unwrap();
            let uid = event.payload["last_uid"].as_i64().unwrap();
            assert!(moved >= last_moved, "moved went backwards");
            assert!(uid >= last_uid, "cursor went backwards");
            last_moved = moved;
            last_uid = uid;
        }
    }
    assert_eq!(last_moved, 6);
    assert_eq!(last_uid, 6);
}
