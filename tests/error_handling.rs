//! Error handling and edge case tests.

mod common;

use common::{comment, harness, FixedStore};
use feedsync::{
    Applied, CacheKey, Comment, Mutation, MutationSink, PushAction, PushEvent, RecordId, Result,
    SyncConfig, SyncError,
};
use serde_json::json;

struct RejectingSink;

impl MutationSink<Comment> for RejectingSink {
    fn submit(&self, _mutation: Mutation<Comment>) -> Result<Option<Comment>> {
        Err(SyncError::Mutation("permission denied".into()))
    }
}

// --- Config Errors ---

#[test]
fn test_config_from_partial_json() {
    let config = SyncConfig::from_json(r#"{"cache": {"max_entries": 3}}"#).unwrap();
    assert_eq!(config.cache.max_entries, 3);
    assert_eq!(config.pagination.per_page, 20);
}

#[test]
fn test_config_rejects_zero_page_size() {
    let result = SyncConfig::from_json(r#"{"pagination": {"per_page": 0}}"#);
    assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
}

#[test]
fn test_config_rejects_heartbeat_timeout_below_interval() {
    let result = SyncConfig::from_json(
        r#"{"connection": {"heartbeat_interval_ms": 30000, "heartbeat_timeout_ms": 10000}}"#,
    );
    assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
}

#[test]
fn test_config_rejects_garbage() {
    assert!(matches!(
        SyncConfig::from_json("not json"),
        Err(SyncError::InvalidConfig(_))
    ));
}

// --- Push Payload Errors ---

#[test]
fn test_known_collection_with_bad_record() {
    let text = json!({
        "collection": "posts",
        "action": "update",
        "record": {"id": "p1", "published": "yes"}
    })
    .to_string();
    assert!(matches!(PushEvent::parse(&text), Err(SyncError::MalformedRecord(_))));
}

#[test]
fn test_unknown_action_is_rejected() {
    let text = r#"{"collection": "posts", "action": "upsert", "record": {}}"#;
    assert!(matches!(PushEvent::parse(text), Err(SyncError::Deserialization(_))));
}

#[test]
fn test_unknown_collection_is_ignored_by_views() {
    let h = harness();
    let mut thread = h.ctx.comment_thread("p1");
    thread.open(&FixedStore::<Comment> { items: Vec::new() }).unwrap();

    let text = r#"{"collection": "likes", "action": "create", "record": {"id": "l1"}}"#;
    let event = PushEvent::parse(text).unwrap();
    assert_eq!(thread.apply(&event), Applied::Ignored);
}

// --- Reducer Edge Cases ---

#[test]
fn test_delete_of_absent_record() {
    let h = harness();
    let mut thread = h.ctx.comment_thread("p1");
    thread.open(&FixedStore::<Comment> { items: Vec::new() }).unwrap();

    let applied = thread.apply_record(PushAction::Delete, comment("ghost", "p1", "u1", 1));
    assert_eq!(applied, Applied::Ignored);
    assert_eq!(thread.total(), 0);
}

#[test]
fn test_malformed_comment_is_not_shown() {
    let h = harness();
    let mut thread = h.ctx.comment_thread("p1");
    thread.open(&FixedStore::<Comment> { items: Vec::new() }).unwrap();

    let mut anonymous = comment("c1", "p1", "u1", 1);
    anonymous.author = RecordId::new("");
    assert_eq!(thread.apply_record(PushAction::Create, anonymous), Applied::Ignored);
    assert!(thread.items().is_empty());
}

#[test]
fn test_rejected_mutation_restores_cache() {
    let h = harness();
    let store = FixedStore {
        items: vec![comment("c1", "p1", "u1", 1)],
    };
    let mut thread = h.ctx.comment_thread("p1");
    thread.open(&store).unwrap();

    let result = thread.submit(&RejectingSink, Mutation::Delete(RecordId::new("c1")));
    assert!(matches!(result, Err(SyncError::Mutation(_))));

    let mut cache = h.ctx.comments_cache().lock();
    let entry = cache.get(&CacheKey::comments("p1")).unwrap();
    assert_eq!(entry.items.len(), 1);
    assert_eq!(entry.total, 1);
}

#[test]
fn test_lease_after_shutdown() {
    let h = harness();
    let lease = h.ctx.acquire(4).unwrap();
    h.ctx.shutdown();

    assert!(matches!(h.ctx.acquire(4), Err(SyncError::ContextReleased)));
    drop(lease);
    assert_eq!(h.ctx.active_leases(), 0);
}
