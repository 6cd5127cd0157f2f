//! Process-wide sync context: the push channel and the collection caches.

use crate::cache::{BoundedTimedCache, CacheKey, SharedCache};
use crate::clock::{self, SharedClock};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::push::{
    ConnectionState, PushAction, PushChannelManager, PushEvent, PushRecord, SubscriptionHandle,
    SubscriptionId, Transport,
};
use crate::sync::{
    CollectionSync, CommentThread, CommentThreadPolicy, FeedPolicy, NotificationInbox,
    NotificationPolicy, PostFeed,
};
use crate::types::{Comment, Entry, Notification, Post, RecordId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Owns everything shared between views: one push connection and one cache
/// per collection kind.
///
/// Views take a [`SyncLease`] to receive push events. The connection opens
/// with the first lease and closes a grace window after the last one is
/// released.
pub struct SyncContext {
    config: SyncConfig,
    clock: SharedClock,
    push: PushChannelManager,
    posts: SharedCache<Post>,
    comments: SharedCache<Comment>,
    notifications: SharedCache<Notification>,
    leases: AtomicUsize,
    released: AtomicBool,
}

impl SyncContext {
    /// Create a context on the system clock.
    pub fn create(config: SyncConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        Self::with_clock(config, transport, clock::system())
    }

    /// Create a context driven by the given clock.
    pub fn with_clock(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        clock: SharedClock,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let push = PushChannelManager::new(config.connection.clone(), transport, clock.clone());
        let posts = Self::new_cache(&config, &clock);
        let comments = Self::new_cache(&config, &clock);
        let notifications = Self::new_cache(&config, &clock);

        let reconciler = CacheReconciler {
            posts: posts.clone(),
            comments: comments.clone(),
            notifications: notifications.clone(),
        };
        push.observe(move |event| reconciler.apply(event));

        info!(
            max_entries = config.cache.max_entries,
            topics = ?config.connection.topics,
            "sync context created"
        );

        Ok(Arc::new(Self {
            config,
            clock,
            push,
            posts,
            comments,
            notifications,
            leases: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        }))
    }

    fn new_cache<T: Clone>(config: &SyncConfig, clock: &SharedClock) -> SharedCache<T> {
        Arc::new(Mutex::new(BoundedTimedCache::new(&config.cache, clock.clone())))
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            Err(SyncError::ContextReleased)
        } else {
            Ok(())
        }
    }

    // --- Leases ---

    /// Take a lease that buffers push events in a bounded channel.
    pub fn acquire(self: &Arc<Self>, buffer_size: usize) -> Result<SyncLease> {
        self.ensure_live()?;
        let handle = self.push.subscribe_channel(buffer_size);
        Ok(self.lease(handle.id, Some(handle)))
    }

    /// Take a lease that calls `handler` for every push event.
    pub fn acquire_with<F>(self: &Arc<Self>, handler: F) -> Result<SyncLease>
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let id = self.push.subscribe(handler);
        Ok(self.lease(id, None))
    }

    fn lease(self: &Arc<Self>, id: SubscriptionId, handle: Option<SubscriptionHandle>) -> SyncLease {
        let active = self.leases.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(subscription = id.0, active, "lease acquired");
        SyncLease {
            context: Arc::clone(self),
            id,
            handle,
        }
    }

    /// Give a lease back. Same as dropping it.
    pub fn release(&self, lease: SyncLease) {
        drop(lease);
    }

    fn end_lease(&self, id: SubscriptionId) {
        // After shutdown the subscription is already gone.
        self.push.unsubscribe(id);
        let active = self.leases.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        debug!(subscription = id.0, active, "lease released");
    }

    /// Close the connection now and refuse further leases.
    pub fn shutdown(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            info!("sync context shut down");
            self.push.shutdown();
        }
    }

    // --- Host loop ---

    /// Deliver pending push events, then run timers. Returns the number of
    /// events delivered.
    pub fn poll(&self) -> usize {
        let delivered = self.push.pump();
        self.push.tick();
        delivered
    }

    /// Drop expired entries from every cache. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.posts.lock().purge_expired()
            + self.comments.lock().purge_expired()
            + self.notifications.lock().purge_expired()
    }

    // --- Views ---

    /// Live comments of one post.
    pub fn comment_thread(&self, post: impl Into<RecordId>) -> CommentThread {
        let post = post.into();
        CollectionSync::new(
            CacheKey::comments(post.clone()),
            CommentThreadPolicy { post },
            self.comments.clone(),
            self.clock.clone(),
            &self.config.pagination,
        )
    }

    /// Live post feed as seen by `viewer`, optionally limited to one author.
    pub fn post_feed(&self, author: Option<RecordId>, viewer: Option<RecordId>) -> PostFeed {
        let filter = match &author {
            Some(author) => format!("author:{}", author),
            None => "all".to_string(),
        };
        CollectionSync::new(
            CacheKey::feed(filter),
            FeedPolicy { viewer, author },
            self.posts.clone(),
            self.clock.clone(),
            &self.config.pagination,
        )
    }

    /// Live notifications of one recipient.
    pub fn notification_inbox(&self, recipient: impl Into<RecordId>) -> NotificationInbox {
        let recipient = recipient.into();
        CollectionSync::new(
            CacheKey::notifications(recipient.clone()),
            NotificationPolicy { recipient },
            self.notifications.clone(),
            self.clock.clone(),
            &self.config.pagination,
        )
    }

    // --- Accessors ---

    pub fn connection_state(&self) -> ConnectionState {
        self.push.state()
    }

    pub fn push(&self) -> &PushChannelManager {
        &self.push
    }

    pub fn active_leases(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn posts_cache(&self) -> &SharedCache<Post> {
        &self.posts
    }

    pub fn comments_cache(&self) -> &SharedCache<Comment> {
        &self.comments
    }

    pub fn notifications_cache(&self) -> &SharedCache<Notification> {
        &self.notifications
    }
}

/// Keeps cached collections consistent with push events no open view
/// applies.
///
/// Runs ahead of every view. Deletes are patched out of the entries that
/// hold the record. Creates and updates drop the affected entries, since
/// scope and visibility are decided per view. An open view writes its own
/// state back once it applies the same event.
struct CacheReconciler {
    posts: SharedCache<Post>,
    comments: SharedCache<Comment>,
    notifications: SharedCache<Notification>,
}

impl CacheReconciler {
    fn apply(&self, event: &PushEvent) {
        match &event.record {
            PushRecord::Post(post) => {
                let keys = [
                    CacheKey::feed("all"),
                    CacheKey::feed(format!("author:{}", post.author)),
                ];
                reconcile(&self.posts, &keys, event.action, &post.id);
            }
            PushRecord::Comment(comment) => {
                let keys = [CacheKey::comments(comment.post.clone())];
                reconcile(&self.comments, &keys, event.action, &comment.id);
            }
            PushRecord::Notification(notification) => {
                let keys = [CacheKey::notifications(notification.recipient.clone())];
                reconcile(&self.notifications, &keys, event.action, &notification.id);
            }
            PushRecord::Unknown { .. } => {}
        }
    }
}

fn reconcile<T: Entry>(
    cache: &SharedCache<T>,
    keys: &[CacheKey],
    action: PushAction,
    id: &RecordId,
) {
    let mut cache = cache.lock();
    for key in keys {
        match action {
            PushAction::Delete => {
                let patched = cache
                    .peek(key)
                    .filter(|page| page.items.iter().any(|item| item.id() == id))
                    .map(|page| {
                        let items: Vec<T> =
                            page.items.iter().filter(|item| item.id() != id).cloned().collect();
                        (items, page.total.saturating_sub(1))
                    });
                if let Some((items, total)) = patched {
                    trace!(%key, %id, "patched deleted record out of cached collection");
                    cache.put_preserving_timestamp(key.clone(), items, total);
                }
            }
            PushAction::Create | PushAction::Update => {
                if cache.invalidate(key).is_some() {
                    debug!(%key, %id, "cached collection invalidated by push");
                }
            }
        }
    }
}

/// A view's claim on the push channel. Dropping it unsubscribes.
pub struct SyncLease {
    context: Arc<SyncContext>,
    id: SubscriptionId,
    handle: Option<SubscriptionHandle>,
}

impl SyncLease {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Events buffered since the last drain. Always empty for handler leases.
    pub fn drain(&self) -> Vec<PushEvent> {
        self.handle.as_ref().map(|h| h.drain()).unwrap_or_default()
    }

    pub fn handle(&self) -> Option<&SubscriptionHandle> {
        self.handle.as_ref()
    }
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        self.context.end_lease(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::push::MemoryTransport;
    use crate::types::Page;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn context() -> (Arc<SyncContext>, Arc<MemoryTransport>, Arc<ManualClock>) {
        let transport = MemoryTransport::new();
        let clock = ManualClock::new();
        let ctx = SyncContext::with_clock(SyncConfig::default(), transport.clone(), clock.clone())
            .unwrap();
        (ctx, transport, clock)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SyncConfig::default();
        config.cache.max_entries = 0;
        let result = SyncContext::create(config, MemoryTransport::new());
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_leases_share_one_connection() {
        let (ctx, transport, _clock) = context();
        let a = ctx.acquire(16).unwrap();
        let b = ctx.acquire(16).unwrap();

        assert_eq!(transport.open_count(), 1);
        assert_eq!(ctx.active_leases(), 2);

        ctx.release(a);
        drop(b);
        assert_eq!(ctx.active_leases(), 0);
        assert!(ctx.push().is_teardown_pending());
    }

    #[test]
    fn test_connection_closes_after_grace() {
        let (ctx, transport, clock) = context();
        let lease = ctx.acquire(16).unwrap();
        transport.send(crate::push::TransportFrame::Opened);
        ctx.poll();
        assert_eq!(ctx.connection_state(), ConnectionState::Online);

        drop(lease);
        clock.advance(Duration::from_secs(6));
        ctx.poll();
        assert_eq!(ctx.connection_state(), ConnectionState::Offline);
        assert_eq!(transport.live_count(), 0);
    }

    #[test]
    fn test_shutdown_refuses_leases() {
        let (ctx, _transport, _clock) = context();
        ctx.shutdown();
        assert!(matches!(ctx.acquire(4), Err(SyncError::ContextReleased)));
        assert!(ctx.is_released());
    }

    #[test]
    fn test_events_reach_views_through_lease() {
        let (ctx, transport, _clock) = context();
        let lease = ctx.acquire(16).unwrap();
        let mut thread = ctx.comment_thread("p1");
        thread
            .open(&|_: &CacheKey, _: u32, _: u32| -> Result<Page<Comment>> {
                Ok(Page::new(Vec::new(), 0))
            })
            .unwrap();

        transport.send(crate::push::TransportFrame::Opened);
        transport.send_message(&json!({
            "collection": "comments",
            "action": "create",
            "record": {"id": "c1", "post": "p1", "author": "u1", "created": 1}
        }));
        assert_eq!(ctx.poll(), 1);

        let applied = thread.apply_all(&lease.drain());
        assert_eq!(applied, 1);
        assert_eq!(thread.items().len(), 1);
        assert!(ctx.comments_cache().lock().contains(&CacheKey::comments("p1")));
    }

    #[test]
    fn test_post_delete_patches_both_feeds() {
        let (ctx, transport, _clock) = context();
        let _lease = ctx.acquire(16).unwrap();
        let post = |id: &str, created: i64| Post {
            id: RecordId::new(id),
            author: RecordId::new("u1"),
            title: String::new(),
            body: String::new(),
            published: true,
            created: crate::types::Timestamp(created),
            updated: crate::types::Timestamp(created),
            expand: Default::default(),
        };
        let posts = vec![post("p2", 2), post("p1", 1)];
        {
            let mut cache = ctx.posts_cache().lock();
            cache.put(CacheKey::feed("all"), posts.clone(), 7);
            cache.put(CacheKey::feed("author:u1"), posts, 2);
        }

        transport.send(crate::push::TransportFrame::Opened);
        transport.send_message(&json!({
            "collection": "posts",
            "action": "delete",
            "record": {"id": "p1", "author": "u1", "published": true, "created": 1}
        }));
        ctx.poll();

        let cache = ctx.posts_cache().lock();
        let all = cache.peek(&CacheKey::feed("all")).unwrap();
        assert_eq!(all.items.len(), 1);
        assert_eq!(all.total, 6);
        let mine = cache.peek(&CacheKey::feed("author:u1")).unwrap();
        assert_eq!(mine.items[0].id.as_str(), "p2");
        assert_eq!(mine.total, 1);
    }

    #[test]
    fn test_handler_lease() {
        let (ctx, transport, _clock) = context();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _lease = ctx
            .acquire_with(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        transport.send(crate::push::TransportFrame::Opened);
        transport.send_message(&json!({
            "collection": "tags",
            "action": "create",
            "record": {"id": "t1"}
        }));
        ctx.poll();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
