//! Applies push events and local mutations to a live collection and keeps
//! its cache entry in step.

use super::policy::{CommentThreadPolicy, FeedPolicy, NotificationPolicy, SyncPolicy};
use crate::cache::{CacheKey, SharedCache};
use crate::clock::SharedClock;
use crate::config::PaginationConfig;
use crate::error::Result;
use crate::pagination::{LoadOutcome, PageTicket, PaginationState, SortKey};
use crate::participants::ParticipantIndex;
use crate::push::{PushAction, PushEvent};
use crate::source::{MutationSink, PageSource};
use crate::types::{Comment, Contributor, Entry, Mutation, Notification, Page, Post, RecordId};
use std::collections::HashSet;
use tracing::{debug, warn};

/// What an event did to the live collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    Removed,
    Ignored,
}

/// How a view got its first data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Served from the collection cache without a fetch.
    Cached,
    /// Fetched from the record store.
    Fetched(LoadOutcome),
}

/// One view's live collection, synchronized with the push channel and
/// mirrored into the shared cache.
///
/// Every change to a loaded collection re-writes the cache entry from the
/// live items, so a later cache hit always reflects the latest state.
pub struct CollectionSync<T: Entry, P: SyncPolicy<T>> {
    key: CacheKey,
    policy: P,
    state: PaginationState<T>,
    participants: ParticipantIndex,
    cache: SharedCache<T>,
    clock: SharedClock,
    /// Optimistic creates not yet confirmed by the record store.
    pending: HashSet<RecordId>,
    /// Whether the collection has been loaded (from cache or source).
    seeded: bool,
}

impl<T: Entry, P: SyncPolicy<T>> CollectionSync<T, P> {
    pub fn new(
        key: CacheKey,
        policy: P,
        cache: SharedCache<T>,
        clock: SharedClock,
        config: &PaginationConfig,
    ) -> Self {
        Self {
            key,
            policy,
            state: PaginationState::new(config),
            participants: ParticipantIndex::new(),
            cache,
            clock,
            pending: HashSet::new(),
            seeded: false,
        }
    }

    /// Order the collection by a different key (descending).
    pub fn with_sort_key(mut self, key: SortKey<T>) -> Self {
        self.state = self.state.with_sort_key(key);
        self
    }

    // --- Loading ---

    /// Show cached data if fresh, otherwise fetch the first page.
    pub fn open<S>(&mut self, source: &S) -> Result<OpenOutcome>
    where
        S: PageSource<T> + ?Sized,
    {
        let cached = self.cache.lock().get(&self.key);
        if let Some(page) = cached {
            debug!(key = %self.key, items = page.items.len(), "serving collection from cache");
            self.state.resume(page.items, page.total);
            self.rebuild_participants();
            self.seeded = true;
            return Ok(OpenOutcome::Cached);
        }

        let outcome = self.load_more(source)?;
        Ok(OpenOutcome::Fetched(outcome))
    }

    /// Fetch and merge the next page.
    pub fn load_more<S>(&mut self, source: &S) -> Result<LoadOutcome>
    where
        S: PageSource<T> + ?Sized,
    {
        let outcome = self.state.load_more(source, &self.key, self.clock.as_ref())?;
        self.after_load(&outcome);
        Ok(outcome)
    }

    /// Start a page fetch the caller performs itself.
    pub fn begin_load_more(&mut self) -> Option<PageTicket> {
        self.state.begin_load_more(self.clock.now())
    }

    /// Apply the result of a fetch started with [`begin_load_more`](Self::begin_load_more).
    pub fn finish_load_more(
        &mut self,
        ticket: &PageTicket,
        result: Result<Page<T>>,
    ) -> Result<LoadOutcome> {
        let now = self.clock.now();
        let outcome = self.state.finish_load_more(ticket, result, now)?;
        self.after_load(&outcome);
        Ok(outcome)
    }

    /// Fail an in-flight fetch that has outlived the fetch timeout.
    pub fn check_timeout(&mut self) -> Result<()> {
        self.state.check_timeout(self.clock.now())
    }

    /// Reload the first page, keeping unconfirmed optimistic items.
    pub fn refresh<S>(&mut self, source: &S) -> Result<()>
    where
        S: PageSource<T> + ?Sized,
    {
        let page = source.fetch_page(&self.key, 1, self.state.per_page())?;

        let mut items = page.items;
        let mut total = page.total;
        for item in self.state.items() {
            let pending = self.pending.contains(item.id());
            if pending && !items.iter().any(|i| i.id() == item.id()) {
                items.push(item.clone());
                total += 1;
            }
        }

        self.state.reset_pagination(items, total);
        self.rebuild_participants();
        self.seeded = true;
        self.write_cache(true);
        Ok(())
    }

    fn after_load(&mut self, outcome: &LoadOutcome) {
        if let LoadOutcome::Loaded { added } = outcome {
            debug!(key = %self.key, added, page = self.state.current_page(), "page loaded");
            self.rebuild_participants();
            self.seeded = true;
            self.write_cache(true);
        }
    }

    // --- Push events ---

    /// Apply one push event. Events for other collections are ignored.
    pub fn apply(&mut self, event: &PushEvent) -> Applied {
        match T::from_push(event.record.clone()) {
            Some(record) => self.apply_record(event.action, record),
            None => Applied::Ignored,
        }
    }

    /// Apply events in arrival order.
    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a PushEvent>) -> usize {
        events
            .into_iter()
            .filter(|event| self.apply(event) != Applied::Ignored)
            .count()
    }

    /// Apply a create/update/delete of one record snapshot.
    pub fn apply_record(&mut self, action: PushAction, record: T) -> Applied {
        let id = record.id().clone();
        let position = self.state.position(&id);

        if position.is_none() && !self.policy.in_scope(&record) {
            return Applied::Ignored;
        }
        let admitted = self.admits(&record);

        let applied = match (action, position) {
            (PushAction::Create | PushAction::Update, Some(index)) if admitted => {
                // Also covers our own create echoed back by the server.
                self.pending.remove(&id);
                let previous = self.contributor_at(index);
                self.state.merge_at(index, record);
                self.observe_at(index);
                // The record may have been reassigned to someone else.
                if let Some(previous) = previous {
                    if self.contributor_at(index).as_ref() != Some(&previous) {
                        self.forget_contributor_id(&previous);
                    }
                }
                Applied::Updated
            }
            (PushAction::Create | PushAction::Update, Some(_)) => {
                self.pending.remove(&id);
                self.remove_item(&id);
                Applied::Removed
            }
            (PushAction::Create | PushAction::Update, None) if admitted => {
                self.state.prepend(record);
                self.observe_at(0);
                Applied::Inserted
            }
            (PushAction::Create | PushAction::Update, None) => Applied::Ignored,
            (PushAction::Delete, Some(_)) => {
                self.pending.remove(&id);
                self.remove_item(&id);
                Applied::Removed
            }
            (PushAction::Delete, None) => Applied::Ignored,
        };

        if applied != Applied::Ignored {
            self.write_cache(true);
        }
        applied
    }

    fn admits(&self, record: &T) -> bool {
        if !self.policy.in_scope(record) {
            return false;
        }
        match self.policy.is_visible(record) {
            Ok(visible) => visible,
            Err(e) => {
                debug!(id = %record.id(), error = %e, "visibility check failed, treating record as hidden");
                false
            }
        }
    }

    // --- Optimistic mutations ---

    /// Apply a mutation locally, submit it, and roll back if it is rejected.
    pub fn submit<M>(&mut self, sink: &M, mutation: Mutation<T>) -> Result<Option<T>>
    where
        M: MutationSink<T> + ?Sized,
    {
        match mutation {
            Mutation::Create(item) => self.submit_create(sink, item),
            Mutation::Update(item) => self.submit_update(sink, item),
            Mutation::Delete(id) => self.submit_delete(sink, id),
        }
    }

    fn submit_create<M>(&mut self, sink: &M, item: T) -> Result<Option<T>>
    where
        M: MutationSink<T> + ?Sized,
    {
        let id = item.id().clone();
        let inserted = self.state.position(&id).is_none();
        if inserted {
            self.state.prepend(item.clone());
            self.pending.insert(id.clone());
            self.observe_at(0);
            self.write_cache(false);
        }

        match sink.submit(Mutation::Create(item)) {
            Ok(confirmed) => {
                self.pending.remove(&id);
                if let Some(record) = &confirmed {
                    // The store may assign its own id; drop the placeholder.
                    if inserted && record.id() != &id {
                        self.remove_item(&id);
                    }
                    self.apply_record(PushAction::Create, record.clone());
                }
                Ok(confirmed)
            }
            Err(e) => {
                warn!(%id, error = %e, "create rejected, rolling back");
                if inserted {
                    self.pending.remove(&id);
                    self.remove_item(&id);
                    self.write_cache(false);
                }
                Err(e)
            }
        }
    }

    fn submit_update<M>(&mut self, sink: &M, item: T) -> Result<Option<T>>
    where
        M: MutationSink<T> + ?Sized,
    {
        let id = item.id().clone();
        let previous = self.state.get(&id).cloned();
        if let Some(index) = self.state.position(&id) {
            self.state.merge_at(index, item.clone());
            self.write_cache(false);
        }

        match sink.submit(Mutation::Update(item)) {
            Ok(confirmed) => {
                if let Some(record) = &confirmed {
                    self.apply_record(PushAction::Update, record.clone());
                }
                Ok(confirmed)
            }
            Err(e) => {
                warn!(%id, error = %e, "update rejected, rolling back");
                if let (Some(previous), Some(index)) = (previous, self.state.position(&id)) {
                    self.state.replace_at(index, previous);
                    self.write_cache(false);
                }
                Err(e)
            }
        }
    }

    fn submit_delete<M>(&mut self, sink: &M, id: RecordId) -> Result<Option<T>>
    where
        M: MutationSink<T> + ?Sized,
    {
        let removed = self.state.remove(&id);
        if removed.is_some() {
            self.write_cache(false);
        }

        match sink.submit(Mutation::Delete(id.clone())) {
            Ok(confirmed) => {
                self.pending.remove(&id);
                if let Some((_, item)) = &removed {
                    self.forget_contributor(item);
                    self.write_cache(true);
                }
                Ok(confirmed)
            }
            Err(e) => {
                warn!(%id, error = %e, "delete rejected, restoring");
                if let Some((index, item)) = removed {
                    self.state.restore(index, item);
                    self.write_cache(false);
                }
                Err(e)
            }
        }
    }

    // --- Helpers ---

    fn remove_item(&mut self, id: &RecordId) {
        if let Some((_, item)) = self.state.remove(id) {
            self.forget_contributor(&item);
        }
    }

    fn forget_contributor(&mut self, item: &T) {
        if let Some(contributor) = item.contributor_id() {
            self.forget_contributor_id(contributor);
        }
    }

    fn forget_contributor_id(&mut self, contributor: &RecordId) {
        if let Some(entity) = self.policy.participant_entity() {
            self.participants
                .remove_if_orphaned(entity, contributor, self.state.items());
        }
    }

    fn contributor_at(&self, index: usize) -> Option<RecordId> {
        self.state
            .items()
            .get(index)
            .and_then(|item| item.contributor_id())
            .cloned()
    }

    fn observe_at(&mut self, index: usize) {
        let Some(entity) = self.policy.participant_entity() else {
            return;
        };
        if let Some(item) = self.state.items().get(index) {
            self.participants.observe(entity, item);
        }
    }

    fn rebuild_participants(&mut self) {
        if let Some(entity) = self.policy.participant_entity() {
            self.participants.rebuild(entity, self.state.items());
        }
    }

    /// Re-derive the cache entry from live state. `fresh` is false for
    /// unconfirmed local changes.
    fn write_cache(&self, fresh: bool) {
        if !self.seeded {
            return;
        }
        let items = self.state.items().to_vec();
        let total = self.state.total();
        let mut cache = self.cache.lock();
        if fresh {
            cache.put(self.key.clone(), items, total);
        } else {
            cache.put_preserving_timestamp(self.key.clone(), items, total);
        }
    }

    // --- Accessors ---

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn items(&self) -> &[T] {
        self.state.items()
    }

    pub fn total(&self) -> usize {
        self.state.total()
    }

    pub fn has_more(&self) -> bool {
        self.state.has_more()
    }

    pub fn is_loaded(&self) -> bool {
        self.seeded
    }

    pub fn is_pending(&self, id: &RecordId) -> bool {
        self.pending.contains(id)
    }

    pub fn state(&self) -> &PaginationState<T> {
        &self.state
    }

    /// Contributors of this view's entity, in first-seen order.
    pub fn participants(&self) -> &[Contributor] {
        match self.policy.participant_entity() {
            Some(entity) => self.participants.values(entity),
            None => &[],
        }
    }

    /// Apply a local edit to every item and cache it as unconfirmed.
    pub(crate) fn edit_all(&mut self, f: impl FnMut(&mut T)) {
        self.state.for_each_mut(f);
        self.write_cache(false);
    }
}

/// Comments of one post, with its commenters tracked as participants.
pub type CommentThread = CollectionSync<Comment, CommentThreadPolicy>;

/// Post feed, optionally restricted to one author.
pub type PostFeed = CollectionSync<Post, FeedPolicy>;

/// Notifications of one recipient.
pub type NotificationInbox = CollectionSync<Notification, NotificationPolicy>;

impl NotificationInbox {
    pub fn unread_count(&self) -> usize {
        self.items().iter().filter(|n| !n.read).count()
    }

    /// Mark every loaded notification as read. Returns how many changed.
    pub fn mark_all_read(&mut self) -> usize {
        let changed = self.unread_count();
        if changed > 0 {
            self.edit_all(|n| n.read = true);
        }
        changed
    }
}
