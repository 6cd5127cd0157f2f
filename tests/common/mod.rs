//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use feedsync::{
    CacheKey, Comment, ManualClock, MemoryTransport, Page, Post, RecordId, Result, SyncConfig,
    SyncContext, Timestamp,
};
use serde_json::json;
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

/// Route `tracing` output through the test harness so it shows up for
/// failing tests.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub struct Harness {
    pub ctx: Arc<SyncContext>,
    pub transport: Arc<MemoryTransport>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

pub fn harness_with(config: SyncConfig) -> Harness {
    init_tracing();
    let transport = MemoryTransport::new();
    let clock = ManualClock::new();
    let ctx = SyncContext::with_clock(config, transport.clone(), clock.clone()).unwrap();
    Harness {
        ctx,
        transport,
        clock,
    }
}

pub fn comment(id: &str, post: &str, author: &str, created: i64) -> Comment {
    Comment {
        id: RecordId::new(id),
        post: RecordId::new(post),
        author: RecordId::new(author),
        body: format!("comment {}", id),
        created: Timestamp(created),
        updated: Timestamp(created),
        expand: json!({"author": {"id": author, "name": author}})
            .as_object()
            .cloned()
            .unwrap(),
    }
}

pub fn post(id: &str, author: &str, published: bool, created: i64) -> Post {
    Post {
        id: RecordId::new(id),
        author: RecordId::new(author),
        title: format!("post {}", id),
        body: String::new(),
        published,
        created: Timestamp(created),
        updated: Timestamp(created),
        expand: Default::default(),
    }
}

/// A record store holding one fixed, newest-first collection.
pub struct FixedStore<T> {
    pub items: Vec<T>,
}

impl<T: Clone> feedsync::PageSource<T> for FixedStore<T> {
    fn fetch_page(&self, _key: &CacheKey, page: u32, per_page: u32) -> Result<Page<T>> {
        let start = ((page.max(1) - 1) * per_page) as usize;
        let items = self
            .items
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, self.items.len()))
    }
}

pub fn ids<T: feedsync::Entry>(items: &[T]) -> Vec<String> {
    items.iter().map(|i| i.id().to_string()).collect()
}
