//! Collection caches.
//!
//! Each collection kind gets one [`BoundedTimedCache`] keyed by [`CacheKey`],
//! shared by every view of that kind through a [`SharedCache`] handle.

mod keys;
mod timed;

pub use keys::CacheKey;
pub use timed::{BoundedTimedCache, CachedPage};

use parking_lot::Mutex;
use std::sync::Arc;

/// Process-wide cache for one collection kind.
pub type SharedCache<T> = Arc<Mutex<BoundedTimedCache<CacheKey, T>>>;
