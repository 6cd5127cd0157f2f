//! Contributor snapshots per top-level entity (e.g. commenters of a post).

use crate::types::{Contributor, Entry, RecordId};
use std::collections::HashMap;

/// Per-entity map of contributor id to identity snapshot.
///
/// Contributors keep their first-seen order. A contributor is only dropped
/// once a scan of the live collection finds nothing that still references it.
#[derive(Clone, Debug, Default)]
pub struct ParticipantIndex {
    entities: HashMap<RecordId, Vec<Contributor>>,
}

impl ParticipantIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a contributor, or refresh its snapshot. Returns true if it was new.
    pub fn upsert(&mut self, entity: &RecordId, contributor: Contributor) -> bool {
        let list = self.entities.entry(entity.clone()).or_default();
        match list.iter_mut().find(|c| c.id == contributor.id) {
            Some(existing) => {
                *existing = contributor;
                false
            }
            None => {
                list.push(contributor);
                true
            }
        }
    }

    /// Record the contributor of `item`, if it carries one.
    pub fn observe<T: Entry>(&mut self, entity: &RecordId, item: &T) {
        if let Some(contributor) = item.contributor() {
            self.upsert(entity, contributor);
        }
    }

    /// Remove `contributor` from `entity` unless an item in `live` still
    /// references it. Returns true if it was removed.
    pub fn remove_if_orphaned<T: Entry>(
        &mut self,
        entity: &RecordId,
        contributor: &RecordId,
        live: &[T],
    ) -> bool {
        if live.iter().any(|item| item.contributor_id() == Some(contributor)) {
            return false;
        }

        let Some(list) = self.entities.get_mut(entity) else {
            return false;
        };
        let before = list.len();
        list.retain(|c| &c.id != contributor);
        let removed = list.len() != before;

        if list.is_empty() {
            self.entities.remove(entity);
        }
        removed
    }

    /// Replace the contributors of `entity` with those found in `live`.
    pub fn rebuild<T: Entry>(&mut self, entity: &RecordId, live: &[T]) {
        self.entities.remove(entity);
        for item in live {
            self.observe(entity, item);
        }
    }

    pub fn values(&self, entity: &RecordId) -> &[Contributor] {
        self.entities.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, entity: &RecordId, contributor: &RecordId) -> Option<&Contributor> {
        self.values(entity).iter().find(|c| &c.id == contributor)
    }

    pub fn contains(&self, entity: &RecordId, contributor: &RecordId) -> bool {
        self.get(entity, contributor).is_some()
    }
}
