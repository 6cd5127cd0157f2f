//! Scope and visibility rules for each collection view.

use crate::error::{Result, SyncError};
use crate::types::{Comment, Notification, Post, RecordId};

/// Decides which records belong in a view.
pub trait SyncPolicy<T>: Send {
    /// Whether the record is addressed to this view at all (e.g. the comment
    /// belongs to this view's post). Out-of-scope records are ignored.
    fn in_scope(&self, record: &T) -> bool;

    /// Whether the viewer may see the record. An error counts as "not visible".
    fn is_visible(&self, record: &T) -> Result<bool>;

    /// Entity whose contributors are tracked in the participant index.
    fn participant_entity(&self) -> Option<&RecordId> {
        None
    }
}

fn require_id(kind: &str, field: &str, id: &RecordId) -> Result<()> {
    if id.is_empty() {
        Err(SyncError::MalformedRecord(format!("{} without {}", kind, field)))
    } else {
        Ok(())
    }
}

/// Comments of a single post.
#[derive(Clone, Debug)]
pub struct CommentThreadPolicy {
    pub post: RecordId,
}

impl SyncPolicy<Comment> for CommentThreadPolicy {
    fn in_scope(&self, record: &Comment) -> bool {
        record.post == self.post
    }

    fn is_visible(&self, record: &Comment) -> Result<bool> {
        require_id("comment", "id", &record.id)?;
        require_id("comment", "author", &record.author)?;
        Ok(true)
    }

    fn participant_entity(&self) -> Option<&RecordId> {
        Some(&self.post)
    }
}

/// Post feed: published posts, plus the viewer's own drafts.
#[derive(Clone, Debug, Default)]
pub struct FeedPolicy {
    /// Signed-in user, if any.
    pub viewer: Option<RecordId>,
    /// Restrict the feed to one author.
    pub author: Option<RecordId>,
}

impl SyncPolicy<Post> for FeedPolicy {
    fn in_scope(&self, record: &Post) -> bool {
        self.author.as_ref().map_or(true, |a| a == &record.author)
    }

    fn is_visible(&self, record: &Post) -> Result<bool> {
        require_id("post", "id", &record.id)?;
        require_id("post", "author", &record.author)?;
        let own = self.viewer.as_ref() == Some(&record.author);
        Ok(record.published || own)
    }
}

/// Notifications addressed to one user.
#[derive(Clone, Debug)]
pub struct NotificationPolicy {
    pub recipient: RecordId,
}

impl SyncPolicy<Notification> for NotificationPolicy {
    fn in_scope(&self, record: &Notification) -> bool {
        record.recipient == self.recipient
    }

    fn is_visible(&self, record: &Notification) -> Result<bool> {
        require_id("notification", "id", &record.id)?;
        Ok(true)
    }
}
