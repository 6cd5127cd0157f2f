//! View-scoped live collections.
//!
//! A [`CollectionSync`] owns one view's pagination state and participant
//! index, applies push events and optimistic mutations to it, and re-writes
//! the view's cache entry after every change.

mod policy;
mod reducer;

pub use policy::{CommentThreadPolicy, FeedPolicy, NotificationPolicy, SyncPolicy};
pub use reducer::{
    Applied, CollectionSync, CommentThread, NotificationInbox, OpenOutcome, PostFeed,
};
