//! # feedsync
//!
//! Client-side real-time synchronization and incremental caching for a
//! blogging app whose records live in an external store.
//!
//! ## Core Concepts
//!
//! - **Push channel**: One shared connection per process, with backoff and heartbeat
//! - **Pagination**: "Load more" with supersession of out-of-order responses
//! - **Cache**: Bounded, time-expiring LRU of collection snapshots
//! - **Sync**: Push events and optimistic edits applied to live collections and their cache entries
//!
//! ## Example
//!
//! ```ignore
//! use feedsync::{SyncConfig, SyncContext};
//!
//! let ctx = SyncContext::create(SyncConfig::default(), transport)?;
//! let lease = ctx.acquire(256)?;
//!
//! let mut comments = ctx.comment_thread("post-1");
//! comments.open(&store)?;
//!
//! // Host loop
//! ctx.poll();
//! comments.apply_all(&lease.drain());
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod pagination;
pub mod participants;
pub mod push;
pub mod source;
pub mod sync;
pub mod types;

// Re-exports
pub use cache::{BoundedTimedCache, CacheKey, CachedPage, SharedCache};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CacheConfig, ConnectionConfig, PaginationConfig, SyncConfig};
pub use context::{SyncContext, SyncLease};
pub use error::{Result, SyncError};
pub use pagination::{LoadOutcome, PageTicket, PaginationState};
pub use participants::ParticipantIndex;
pub use push::{
    ConnectionState, MemoryTransport, PushAction, PushChannelManager, PushEvent, PushRecord,
    SubscriptionHandle, SubscriptionId, Transport, TransportFrame,
};
pub use source::{MutationSink, PageSource};
pub use sync::{
    Applied, CollectionSync, CommentThread, NotificationInbox, OpenOutcome, PostFeed, SyncPolicy,
};
pub use types::{Comment, Contributor, Entry, Mutation, Notification, Page, Post, RecordId, Timestamp};
