//! Push channel event and subscription types.

use crate::error::{Result, SyncError};
use crate::types::{Comment, Notification, Post, RecordId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Health of the shared push connection, as shown to the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Offline,
    Connecting,
    Online,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Offline => "offline",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Online => "online",
        };
        f.write_str(name)
    }
}

/// What happened to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushAction {
    Create,
    Update,
    Delete,
}

/// Record snapshot carried by a push event, by collection.
#[derive(Clone, Debug, PartialEq)]
pub enum PushRecord {
    Post(Post),
    Comment(Comment),
    Notification(Notification),
    /// A collection this client does not track. Ignored by every reducer.
    Unknown {
        collection: String,
        record: serde_json::Value,
    },
}

impl PushRecord {
    /// Id of the record, when one can be read.
    pub fn id(&self) -> Option<&RecordId> {
        match self {
            PushRecord::Post(p) => Some(&p.id),
            PushRecord::Comment(c) => Some(&c.id),
            PushRecord::Notification(n) => Some(&n.id),
            PushRecord::Unknown { .. } => None,
        }
    }
}

/// Wire shape of a push message.
#[derive(Deserialize)]
struct RawPushEvent {
    collection: String,
    action: PushAction,
    record: serde_json::Value,
}

/// One inbound change notification.
#[derive(Clone, Debug, PartialEq)]
pub struct PushEvent {
    pub collection: String,
    pub action: PushAction,
    pub record: PushRecord,
}

impl PushEvent {
    pub fn new(action: PushAction, record: PushRecord) -> Self {
        let collection = match &record {
            PushRecord::Post(_) => "posts".to_string(),
            PushRecord::Comment(_) => "comments".to_string(),
            PushRecord::Notification(_) => "notifications".to_string(),
            PushRecord::Unknown { collection, .. } => collection.clone(),
        };
        Self {
            collection,
            action,
            record,
        }
    }

    /// Decode `{"collection", "action", "record"}`.
    ///
    /// Unknown collections decode to [`PushRecord::Unknown`]; a known
    /// collection whose record does not match its schema is an error.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawPushEvent = serde_json::from_str(text)?;

        let record = match raw.collection.as_str() {
            "posts" => PushRecord::Post(decode_record(&raw.collection, raw.record)?),
            "comments" => PushRecord::Comment(decode_record(&raw.collection, raw.record)?),
            "notifications" => {
                PushRecord::Notification(decode_record(&raw.collection, raw.record)?)
            }
            _ => PushRecord::Unknown {
                collection: raw.collection.clone(),
                record: raw.record,
            },
        };

        Ok(Self {
            collection: raw.collection,
            action: raw.action,
            record,
        })
    }
}

fn decode_record<T: serde::de::DeserializeOwned>(
    collection: &str,
    value: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| SyncError::MalformedRecord(format!("{}: {}", collection, e)))
}

/// Callback invoked for every inbound event.
pub type PushHandler = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiving end of a channel-backed subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<PushEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<PushEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<PushEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<PushEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything buffered so far, in arrival order.
    pub fn drain(&self) -> Vec<PushEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Counters for the push channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Physical connections opened.
    pub connects: u64,
    /// Transport errors, closes, failed opens and heartbeat timeouts.
    pub failures: u64,
    /// Reconnects forced by heartbeat or external triggers.
    pub forced_reconnects: u64,
    /// Events handed to subscribers.
    pub delivered: u64,
    /// Messages that could not be decoded.
    pub dropped_messages: u64,
}
