//! Core record types shared by the cache, pagination and sync layers.

use crate::push::PushRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier assigned by the record store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Related-record expansions attached to a record (`{"author": {...}}`).
pub type Expand = serde_json::Map<String, serde_json::Value>;

/// Merge `incoming` into `target` key by key.
///
/// Keys missing from `incoming` are kept, nested objects are merged
/// recursively and everything else is overwritten.
pub fn merge_expand(target: &mut Expand, incoming: Expand) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(serde_json::Value::Object(existing)), serde_json::Value::Object(next)) => {
                merge_expand(existing, next);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Lightweight identity snapshot of someone who contributed an item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub id: RecordId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Contributor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(id),
            name: name.into(),
            avatar: None,
        }
    }

    /// Read a contributor expansion, if present and well formed.
    fn from_expand(expand: &Expand, field: &str) -> Option<Self> {
        expand
            .get(field)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// A blog post.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: RecordId,
    pub author: RecordId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub published: bool,
    pub created: Timestamp,
    #[serde(default)]
    pub updated: Timestamp,
    #[serde(default)]
    pub expand: Expand,
}

/// A comment on a post.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: RecordId,
    pub post: RecordId,
    pub author: RecordId,
    #[serde(default)]
    pub body: String,
    pub created: Timestamp,
    #[serde(default)]
    pub updated: Timestamp,
    #[serde(default)]
    pub expand: Expand,
}

/// A notification addressed to one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: RecordId,
    pub recipient: RecordId,
    #[serde(default)]
    pub actor: Option<RecordId>,
    /// Application-defined kind (e.g. "comment", "like", "follow").
    #[serde(default)]
    pub kind: String,
    /// Record the notification points at.
    #[serde(default)]
    pub target: Option<RecordId>,
    #[serde(default)]
    pub read: bool,
    pub created: Timestamp,
    #[serde(default)]
    pub expand: Expand,
}

/// An item that can live in a paginated, push-synchronized collection.
pub trait Entry: Clone + fmt::Debug + Send + Sync + 'static {
    fn id(&self) -> &RecordId;

    /// Default ordering key (collections are newest-first).
    fn created(&self) -> Timestamp;

    /// Id of whoever contributed this item.
    fn contributor_id(&self) -> Option<&RecordId> {
        None
    }

    /// Identity snapshot of the contributor, when the record carries that expansion.
    fn contributor(&self) -> Option<Contributor> {
        None
    }

    /// Apply a newer snapshot of the same record in place.
    fn merge_update(&mut self, incoming: Self) {
        *self = incoming;
    }

    /// Pick this kind out of a decoded push record.
    fn from_push(record: PushRecord) -> Option<Self>;
}

impl Entry for Post {
    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created(&self) -> Timestamp {
        self.created
    }

    fn contributor_id(&self) -> Option<&RecordId> {
        Some(&self.author)
    }

    fn contributor(&self) -> Option<Contributor> {
        Contributor::from_expand(&self.expand, "author")
    }

    fn merge_update(&mut self, mut incoming: Self) {
        let mut merged = std::mem::take(&mut self.expand);
        merge_expand(&mut merged, std::mem::take(&mut incoming.expand));
        incoming.expand = merged;
        *self = incoming;
    }

    fn from_push(record: PushRecord) -> Option<Self> {
        match record {
            PushRecord::Post(post) => Some(post),
            _ => None,
        }
    }
}

impl Entry for Comment {
    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created(&self) -> Timestamp {
        self.created
    }

    fn contributor_id(&self) -> Option<&RecordId> {
        Some(&self.author)
    }

    fn contributor(&self) -> Option<Contributor> {
        Contributor::from_expand(&self.expand, "author")
    }

    fn merge_update(&mut self, mut incoming: Self) {
        let mut merged = std::mem::take(&mut self.expand);
        merge_expand(&mut merged, std::mem::take(&mut incoming.expand));
        incoming.expand = merged;
        *self = incoming;
    }

    fn from_push(record: PushRecord) -> Option<Self> {
        match record {
            PushRecord::Comment(comment) => Some(comment),
            _ => None,
        }
    }
}

impl Entry for Notification {
    fn id(&self) -> &RecordId {
        &self.id
    }

    fn created(&self) -> Timestamp {
        self.created
    }

    fn contributor_id(&self) -> Option<&RecordId> {
        self.actor.as_ref()
    }

    fn contributor(&self) -> Option<Contributor> {
        Contributor::from_expand(&self.expand, "actor")
    }

    fn merge_update(&mut self, mut incoming: Self) {
        let mut merged = std::mem::take(&mut self.expand);
        merge_expand(&mut merged, std::mem::take(&mut incoming.expand));
        incoming.expand = merged;
        *self = incoming;
    }

    fn from_push(record: PushRecord) -> Option<Self> {
        match record {
            PushRecord::Notification(notification) => Some(notification),
            _ => None,
        }
    }
}

/// One page returned by the record store.
#[derive(Clone, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total size of the collection on the server.
    pub total: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: usize) -> Self {
        Self { items, total }
    }
}

/// A write submitted to the record store.
#[derive(Clone, Debug)]
pub enum Mutation<T> {
    Create(T),
    Update(T),
    Delete(RecordId),
}
