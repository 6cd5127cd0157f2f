//! "Load more" state machine over a paginated collection.

use super::merge::{by_created, merge_items, SortKey};
use crate::cache::CacheKey;
use crate::clock::Clock;
use crate::config::PaginationConfig;
use crate::error::{Result, SyncError};
use crate::source::PageSource;
use crate::types::{Entry, Page, RecordId};
use std::time::{Duration, Instant};
use tracing::debug;

/// Claim on the right to apply one page fetch.
///
/// Only the ticket of the latest generation can mutate the state; older
/// tickets resolve as [`LoadOutcome::Superseded`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageTicket {
    pub generation: u64,
    pub page: u32,
    pub per_page: u32,
    issued_at: Instant,
}

/// Result of resolving a page fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The page was merged; `added` items were new.
    Loaded { added: usize },
    /// A newer request (or a reset) took over, or the fetch was cancelled.
    Superseded,
    /// Nothing left to load.
    Exhausted,
}

/// Live paginated collection owned by one view.
pub struct PaginationState<T> {
    items: Vec<T>,
    current_page: u32,
    total: usize,
    is_loading_more: bool,
    is_first_load: bool,
    in_flight: Option<PageTicket>,
    /// Bumped whenever a request starts or state is reset.
    generation: u64,
    per_page: u32,
    fetch_timeout: Duration,
    sort_key: SortKey<T>,
}

impl<T: Entry> PaginationState<T> {
    pub fn new(config: &PaginationConfig) -> Self {
        Self {
            items: Vec::new(),
            current_page: 1,
            total: 0,
            is_loading_more: false,
            is_first_load: true,
            in_flight: None,
            generation: 0,
            per_page: config.per_page.max(1),
            fetch_timeout: config.fetch_timeout(),
            sort_key: by_created::<T>,
        }
    }

    /// Order items by a different key (descending).
    pub fn with_sort_key(mut self, key: SortKey<T>) -> Self {
        self.sort_key = key;
        self.items.sort_by(|a, b| key(b).cmp(&key(a)));
        self
    }

    // --- Load more ---

    /// Start fetching the next page.
    ///
    /// Returns `None` when there is nothing more to load. Any request still
    /// in flight is superseded: its ticket will no longer apply.
    pub fn begin_load_more(&mut self, now: Instant) -> Option<PageTicket> {
        if !self.has_more() {
            return None;
        }

        if let Some(previous) = self.in_flight.take() {
            debug!(
                generation = previous.generation,
                page = previous.page,
                "superseding in-flight page request"
            );
        }

        self.generation += 1;
        let page = if self.is_first_load {
            1
        } else {
            self.current_page + 1
        };

        let ticket = PageTicket {
            generation: self.generation,
            page,
            per_page: self.per_page,
            issued_at: now,
        };
        self.in_flight = Some(ticket.clone());
        self.is_loading_more = true;
        Some(ticket)
    }

    /// Resolve a fetch started by [`begin_load_more`](Self::begin_load_more).
    pub fn finish_load_more(
        &mut self,
        ticket: &PageTicket,
        result: Result<Page<T>>,
        now: Instant,
    ) -> Result<LoadOutcome> {
        if !self.is_current(ticket) {
            debug!(generation = ticket.generation, "discarding superseded page");
            return Ok(LoadOutcome::Superseded);
        }

        self.in_flight = None;
        self.is_loading_more = false;

        if now.saturating_duration_since(ticket.issued_at) > self.fetch_timeout {
            return Err(SyncError::FetchTimeout(self.fetch_timeout));
        }

        match result {
            Ok(page) => {
                let before = self.items.len();
                let short = page.items.len() < ticket.per_page as usize;
                merge_items(&mut self.items, page.items, self.sort_key);
                self.total = page.total.max(self.items.len());
                if short && self.total > self.items.len() {
                    // Server-side deletes shifted the pages; a short page is the end.
                    debug!(
                        total = self.total,
                        loaded = self.items.len(),
                        "short page, clamping total"
                    );
                    self.total = self.items.len();
                }
                self.current_page = ticket.page;
                self.is_first_load = false;
                Ok(LoadOutcome::Loaded {
                    added: self.items.len() - before,
                })
            }
            Err(e) if e.is_cancellation() => Ok(LoadOutcome::Superseded),
            Err(e) => Err(e),
        }
    }

    /// Fetch and apply the next page in one step. The clock is read again
    /// once the fetch returns, so a slow source still hits the timeout.
    pub fn load_more<S>(
        &mut self,
        source: &S,
        key: &CacheKey,
        clock: &dyn Clock,
    ) -> Result<LoadOutcome>
    where
        S: PageSource<T> + ?Sized,
    {
        let Some(ticket) = self.begin_load_more(clock.now()) else {
            return Ok(LoadOutcome::Exhausted);
        };
        let result = source.fetch_page(key, ticket.page, ticket.per_page);
        self.finish_load_more(&ticket, result, clock.now())
    }

    /// Give up on an in-flight request that has outlived the fetch timeout.
    pub fn check_timeout(&mut self, now: Instant) -> Result<()> {
        let timed_out = self
            .in_flight
            .as_ref()
            .is_some_and(|t| now.saturating_duration_since(t.issued_at) > self.fetch_timeout);

        if timed_out {
            self.cancel_in_flight();
            return Err(SyncError::FetchTimeout(self.fetch_timeout));
        }
        Ok(())
    }

    /// Invalidate any in-flight request without touching the items.
    pub fn cancel_in_flight(&mut self) {
        if self.in_flight.take().is_some() {
            self.generation += 1;
        }
        self.is_loading_more = false;
    }

    /// Replace the collection wholesale (initial load, cache hit or refresh).
    pub fn reset_pagination(&mut self, items: Vec<T>, total: usize) {
        self.cancel_in_flight();
        self.generation += 1;
        self.items.clear();
        merge_items(&mut self.items, items, self.sort_key);
        self.total = total.max(self.items.len());
        self.current_page = 1;
        self.is_first_load = false;
    }

    /// Restore a cached collection and continue from the last full page it
    /// covers. A partial trailing page is fetched again and deduplicated.
    pub fn resume(&mut self, items: Vec<T>, total: usize) {
        self.reset_pagination(items, total);
        let pages = self.items.len() / self.per_page as usize;
        self.current_page = (pages as u32).max(1);
    }

    pub fn is_current(&self, ticket: &PageTicket) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|t| t.generation == ticket.generation)
    }

    // --- Accessors ---

    pub fn has_more(&self) -> bool {
        self.is_first_load || self.items.len() < self.total
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn is_loading_more(&self) -> bool {
        self.is_loading_more
    }

    pub fn is_first_load(&self) -> bool {
        self.is_first_load
    }

    pub fn in_flight(&self) -> Option<&PageTicket> {
        self.in_flight.as_ref()
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    // --- In-place edits used by the sync reducers ---

    pub fn position(&self, id: &RecordId) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    pub fn get(&self, id: &RecordId) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Insert a new item at the head and count it.
    pub fn prepend(&mut self, item: T) {
        self.items.insert(0, item);
        self.total += 1;
    }

    /// Merge a newer snapshot into the item at `index`, keeping its position.
    pub fn merge_at(&mut self, index: usize, incoming: T) {
        if let Some(item) = self.items.get_mut(index) {
            item.merge_update(incoming);
        }
    }

    /// Swap in a full replacement for the item at `index`.
    pub fn replace_at(&mut self, index: usize, item: T) {
        if let Some(slot) = self.items.get_mut(index) {
            *slot = item;
        }
    }

    /// Remove an item and uncount it. Total is floored at zero.
    pub fn remove(&mut self, id: &RecordId) -> Option<(usize, T)> {
        let index = self.position(id)?;
        let item = self.items.remove(index);
        self.total = self.total.saturating_sub(1);
        Some((index, item))
    }

    /// Put a removed item back where it was.
    pub fn restore(&mut self, index: usize, item: T) {
        let index = index.min(self.items.len());
        self.items.insert(index, item);
        self.total += 1;
    }

    /// Apply a closure to every item (local bulk edits such as mark-as-read).
    pub fn for_each_mut(&mut self, f: impl FnMut(&mut T)) {
        self.items.iter_mut().for_each(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Post, Timestamp};

    fn post(id: &str, created: i64) -> Post {
        Post {
            id: RecordId::new(id),
            author: RecordId::new("u1"),
            title: String::new(),
            body: String::new(),
            published: true,
            created: Timestamp(created),
            updated: Timestamp(created),
            expand: Default::default(),
        }
    }

    fn state() -> PaginationState<Post> {
        PaginationState::new(&PaginationConfig {
            per_page: 2,
            fetch_timeout_ms: 1_000,
        })
    }

    fn ids(state: &PaginationState<Post>) -> Vec<&str> {
        state.items().iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_first_load_requests_page_one() {
        let mut state = state();
        assert!(state.has_more());

        let now = Instant::now();
        let ticket = state.begin_load_more(now).unwrap();
        assert_eq!(ticket.page, 1);
        assert!(state.is_loading_more());

        let outcome = state
            .finish_load_more(&ticket, Ok(Page::new(vec![post("a", 2), post("b", 1)], 3)), now)
            .unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { added: 2 });
        assert_eq!(state.current_page(), 1);
        assert!(!state.is_first_load());
        assert!(state.has_more());

        let ticket = state.begin_load_more(now).unwrap();
        assert_eq!(ticket.page, 2);
    }

    #[test]
    fn test_superseded_request_is_discarded() {
        let mut state = state();
        state.reset_pagination(vec![post("a", 10)], 5);
        let now = Instant::now();

        let first = state.begin_load_more(now).unwrap();
        let second = state.begin_load_more(now).unwrap();
        assert_eq!(first.page, second.page);

        let outcome = state
            .finish_load_more(&second, Ok(Page::new(vec![post("b", 9), post("c", 8)], 5)), now)
            .unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { added: 2 });

        // The first fetch resolves late and must not touch anything.
        let late = state
            .finish_load_more(&first, Ok(Page::new(vec![post("z", 1)], 99)), now)
            .unwrap();
        assert_eq!(late, LoadOutcome::Superseded);
        assert_eq!(ids(&state), vec!["a", "b", "c"]);
        assert_eq!(state.total(), 5);
    }

    #[test]
    fn test_cancellation_is_silent() {
        let mut state = state();
        let now = Instant::now();
        let ticket = state.begin_load_more(now).unwrap();

        let outcome = state
            .finish_load_more(&ticket, Err(SyncError::Cancelled), now)
            .unwrap();
        assert_eq!(outcome, LoadOutcome::Superseded);
        assert!(!state.is_loading_more());
        assert!(state.is_first_load());
    }

    #[test]
    fn test_fetch_error_propagates() {
        let mut state = state();
        let now = Instant::now();
        let ticket = state.begin_load_more(now).unwrap();

        let result = state.finish_load_more(&ticket, Err(SyncError::Fetch("503".into())), now);
        assert!(matches!(result, Err(SyncError::Fetch(_))));
        assert!(!state.is_loading_more());
    }

    #[test]
    fn test_no_more_pages() {
        let mut state = state();
        state.reset_pagination(vec![post("a", 2), post("b", 1)], 2);

        assert!(!state.has_more());
        assert!(state.begin_load_more(Instant::now()).is_none());
    }

    #[test]
    fn test_reset_supersedes_in_flight() {
        let mut state = state();
        let now = Instant::now();
        let ticket = state.begin_load_more(now).unwrap();

        state.reset_pagination(vec![post("x", 1)], 4);
        let outcome = state
            .finish_load_more(&ticket, Ok(Page::new(vec![post("y", 2)], 4)), now)
            .unwrap();

        assert_eq!(outcome, LoadOutcome::Superseded);
        assert_eq!(ids(&state), vec!["x"]);
        assert_eq!(state.current_page(), 1);
    }

    #[test]
    fn test_late_resolution_times_out() {
        let mut state = state();
        let start = Instant::now();
        let ticket = state.begin_load_more(start).unwrap();

        let result = state.finish_load_more(
            &ticket,
            Ok(Page::new(vec![post("a", 1)], 1)),
            start + Duration::from_secs(2),
        );
        assert!(matches!(result, Err(SyncError::FetchTimeout(_))));
        assert!(state.items().is_empty());
    }

    #[test]
    fn test_check_timeout_drops_request() {
        let mut state = state();
        let start = Instant::now();
        let ticket = state.begin_load_more(start).unwrap();

        state.check_timeout(start + Duration::from_millis(500)).unwrap();
        let result = state.check_timeout(start + Duration::from_secs(2));
        assert!(matches!(result, Err(SyncError::FetchTimeout(_))));
        assert!(!state.is_current(&ticket));
    }

    #[test]
    fn test_resume_refetches_partial_page() {
        let mut state = state();
        state.resume(vec![post("a", 3), post("b", 2), post("c", 1)], 10);

        assert_eq!(state.current_page(), 1);
        let ticket = state.begin_load_more(Instant::now()).unwrap();
        assert_eq!(ticket.page, 2);
    }

    #[test]
    fn test_resume_after_full_pages() {
        let mut state = state();
        state.resume(
            vec![post("a", 4), post("b", 3), post("c", 2), post("d", 1)],
            10,
        );

        let ticket = state.begin_load_more(Instant::now()).unwrap();
        assert_eq!(ticket.page, 3);
    }

    #[test]
    fn test_short_page_ends_collection() {
        let mut state = state();
        state.reset_pagination(vec![post("a", 4), post("b", 3)], 5);
        let now = Instant::now();

        let ticket = state.begin_load_more(now).unwrap();
        let outcome = state
            .finish_load_more(&ticket, Ok(Page::new(vec![post("c", 2)], 5)), now)
            .unwrap();

        assert_eq!(outcome, LoadOutcome::Loaded { added: 1 });
        assert_eq!(state.total(), 3);
        assert!(!state.has_more());
    }

    #[test]
    fn test_load_more_times_out_on_slow_source() {
        use crate::clock::ManualClock;

        let mut state = state();
        let clock = ManualClock::new();
        let slow = |_: &CacheKey, _: u32, _: u32| -> Result<Page<Post>> {
            clock.advance(Duration::from_secs(5));
            Ok(Page::new(vec![post("a", 1)], 1))
        };

        let result = state.load_more(&slow, &CacheKey::feed("all"), clock.as_ref());
        assert!(matches!(result, Err(SyncError::FetchTimeout(_))));
        assert!(state.items().is_empty());
        assert!(!state.is_loading_more());
    }

    #[test]
    fn test_remove_floors_total() {
        let mut state = state();
        state.reset_pagination(vec![post("a", 1)], 0);
        assert_eq!(state.total(), 1);

        state.remove(&RecordId::new("a")).unwrap();
        assert_eq!(state.total(), 0);
        assert!(state.remove(&RecordId::new("a")).is_none());
        assert_eq!(state.total(), 0);
    }
}
