//! Paginated collections with "load more" semantics.
//!
//! A [`PaginationState`] owns the live items of one view. Page fetches are
//! split into [`begin_load_more`](PaginationState::begin_load_more), which
//! hands out a generation-stamped [`PageTicket`], and
//! [`finish_load_more`](PaginationState::finish_load_more), which applies the
//! result only if that ticket is still the current one.
//!
//! # Example
//!
//! ```ignore
//! let mut state = PaginationState::<Post>::new(&PaginationConfig::default());
//! let ticket = state.begin_load_more(clock.now()).unwrap();
//! let page = source.fetch_page(&key, ticket.page, ticket.per_page);
//! state.finish_load_more(&ticket, page, clock.now())?;
//! ```

mod merge;
mod state;

pub use merge::{by_created, merge_items, SortKey};
pub use state::{LoadOutcome, PageTicket, PaginationState};
