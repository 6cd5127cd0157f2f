//! Interfaces to the external record store.

use crate::cache::CacheKey;
use crate::error::Result;
use crate::types::{Mutation, Page};

/// Paginated reads. Pages are 1-based and newest-first.
pub trait PageSource<T> {
    fn fetch_page(&self, key: &CacheKey, page: u32, per_page: u32) -> Result<Page<T>>;
}

/// Writes. Confirmed records are expected to be echoed on the push channel.
pub trait MutationSink<T> {
    /// Returns the stored record for creates and updates, `None` for deletes.
    fn submit(&self, mutation: Mutation<T>) -> Result<Option<T>>;
}

impl<T, F> PageSource<T> for F
where
    F: Fn(&CacheKey, u32, u32) -> Result<Page<T>>,
{
    fn fetch_page(&self, key: &CacheKey, page: u32, per_page: u32) -> Result<Page<T>> {
        self(key, page, per_page)
    }
}
