//! Live progress events
//!
//! In-process fan-out of state-change and log notifications to current
//! observers. Delivery is best-effort and non-durable: an observer that
//! connects late sees only the latest durable state via the progress
//! store, not event history.

use crate::store::types::{AccountRecord, FolderRecord, JobRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Capacity of each per-job broadcast channel. Lagging receivers lose
/// the oldest events.
const CHANNEL_CAPACITY: usize = 1024;

/// Kind of a transient migration event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobStatus,
    AccountStatus,
    FolderStatus,
    Log,
}

/// A transient notification broadcast to live observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationEvent {
    pub job_id: String,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl MigrationEvent {
    /// Job status snapshot event
    pub fn job_status(job: &JobRecord) -> Self {
        Self {
            job_id: job.id.clone(),
            kind: EventKind::JobStatus,
            payload: json!({
                "id": job.id,
                "mode": job.mode,
                "status": job.status,
                "total_messages": job.total_messages,
                "moved_messages": job.moved_messages,
                "error_count": job.error_count,
                "current_row_index": job.current_row_index,
            }),
            timestamp: Utc::now(),
        }
    }

    /// Account status snapshot event
    pub fn account_status(account: &AccountRecord) -> Self {
        Self {
            job_id: account.job_id.clone(),
            kind: EventKind::AccountStatus,
            payload: json!({
                "job_id": account.job_id,
                "row_index": account.row_index,
                "status": account.status,
                "last_error": account.last_error,
                "total_messages": account.total_messages,
                "moved_messages": account.moved_messages,
            }),
            timestamp: Utc::now(),
        }
    }

    /// Folder status snapshot event
    pub fn folder_status(folder: &FolderRecord) -> Self {
        Self {
            job_id: folder.job_id.clone(),
            kind: EventKind::FolderStatus,
            payload: json!({
                "job_id": folder.job_id,
                "row_index": folder.row_index,
                "source_path": folder.source_path,
                "status": folder.status,
                "total_messages": folder.total_messages,
                "moved_messages": folder.moved_messages,
                "last_uid": folder.last_uid,
            }),
            timestamp: Utc::now(),
        }
    }

    /// Free-form log line for live observers
    pub fn log(job_id: &str, level: &str, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind: EventKind::Log,
            payload: json!({
                "level": level,
                "message": message,
            }),
            timestamp: Utc::now(),
        }
    }
}

/// Per-job broadcast channels for live observers
#[derive(Clone, Default)]
pub struct EventBus {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<MigrationEvent>>>>,
}

impl EventBus {
    /// Create an empty event bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event to the job's observers. Events published by a
    /// single task are received in publish order.
    pub async fn publish(&self, event: MigrationEvent) {
        let sender = self.sender_for(&event.job_id).await;
        // No receivers is fine; events are best-effort
        let _ = sender.send(event);
    }

    /// Subscribe to a job's event stream
    pub async fn subscribe(&self, job_id: &str) -> broadcast::Receiver<MigrationEvent> {
        self.sender_for(job_id).await.subscribe()
    }

    /// Drop the channel of a deleted job
    pub async fn remove_job(&self, job_id: &str) {
        let mut channels = self.channels.write().await;
        channels.remove(job_id);
    }

    async fn sender_for(&self, job_id: &str) -> broadcast::Sender<MigrationEvent> {
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(job_id) {
                return sender.clone();
            }
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("job-1").await;

        for i in 0..3 {
            bus.publish(MigrationEvent::log("job-1", "info", &format!("line {i}")))
                .await;
        }

        for i in 0..3 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.kind, EventKind::Log);
            assert_eq!(event.payload["message"], format!("line {i}"));
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        // Must not error or block
        bus.publish(MigrationEvent::log("job-1", "info", "nobody listening"))
            .await;

        // A late subscriber sees nothing from before its subscription
        let mut rx = bus.subscribe("job-1").await;
        bus.publish(MigrationEvent::log("job-1", "info", "after"))
            .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload["message"], "after");
    }

    #[tokio::test]
    async fn test_channels_are_per_job() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe("job-a").await;

        bus.publish(MigrationEvent::log("job-b", "info", "other job"))
            .await;
        bus.publish(MigrationEvent::log("job-a", "info", "mine")).await;

        let event = rx_a.recv().await.unwrap();
        assert_eq!(event.payload["message"], "mine");
    }
}
