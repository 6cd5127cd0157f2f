//! Merging fetched pages into an ordered collection.

use crate::types::{Entry, RecordId, Timestamp};
use std::collections::HashMap;

/// Ordering key for a collection. Items are kept sorted by it, descending.
pub type SortKey<T> = fn(&T) -> Timestamp;

/// Default ordering: creation time.
pub fn by_created<T: Entry>(item: &T) -> Timestamp {
    item.created()
}

/// Union `incoming` into `existing` by id, then sort newest-first.
///
/// On id collision the incoming item replaces the existing one. The sort is
/// stable, so equal keys keep their relative order and merging the same
/// page twice gives the same result as merging it once.
pub fn merge_items<T: Entry>(existing: &mut Vec<T>, incoming: Vec<T>, key: SortKey<T>) {
    let mut positions: HashMap<RecordId, usize> = existing
        .iter()
        .enumerate()
        .map(|(i, item)| (item.id().clone(), i))
        .collect();

    for item in incoming {
        match positions.get(item.id()) {
            Some(&i) => existing[i] = item,
            None => {
                positions.insert(item.id().clone(), existing.len());
                existing.push(item);
            }
        }
    }

    existing.sort_by(|a, b| key(b).cmp(&key(a)));
}
