//! Keys identifying one paginated view of a collection.

use crate::types::RecordId;
use std::fmt;

/// Which collection view a cache entry belongs to.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A post feed under some filter ("latest", "author:<id>", ...).
    Feed { filter: String },
    /// Comment thread of one post.
    Comments { post: RecordId },
    /// Notifications addressed to one user.
    Notifications { recipient: RecordId },
}

impl CacheKey {
    pub fn feed(filter: impl Into<String>) -> Self {
        CacheKey::Feed {
            filter: filter.into(),
        }
    }

    pub fn comments(post: impl Into<RecordId>) -> Self {
        CacheKey::Comments { post: post.into() }
    }

    pub fn notifications(recipient: impl Into<RecordId>) -> Self {
        CacheKey::Notifications {
            recipient: recipient.into(),
        }
    }

    /// Collection name used on the wire.
    pub fn collection(&self) -> &'static str {
        match self {
            CacheKey::Feed { .. } => "posts",
            CacheKey::Comments { .. } => "comments",
            CacheKey::Notifications { .. } => "notifications",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Feed { filter } => write!(f, "feed:{}", filter),
            CacheKey::Comments { post } => write!(f, "comments:{}", post),
            CacheKey::Notifications { recipient } => write!(f, "notifications:{}", recipient),
        }
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(CacheKey::feed("latest").to_string(), "feed:latest");
        assert_eq!(CacheKey::comments("p1").to_string(), "comments:p1");
        assert_eq!(CacheKey::notifications("u1").to_string(), "notifications:u1");
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(CacheKey::feed("latest").collection(), "posts");
        assert_eq!(CacheKey::comments("p1").collection(), "comments");
    }
}
