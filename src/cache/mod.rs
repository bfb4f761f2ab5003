//! Local cache store for query results.
//!
//! This module provides the in-memory store that every screen reads from:
//! - Entries are keyed by a structured `QueryIdentity` (hashed for storage)
//! - Values are held as JSON and read back through serde, so one store holds
//!   every entity class
//! - Optimistic writes, rollbacks and refetches all go through the same
//!   write API, with snapshots for exact rollback
//! - Invalidation marks entries stale and notifies subscribers, which refetch
//!   in the background (stale-while-revalidate)

mod key;
mod paged;
mod result;
mod store;

pub use key::{IdentityScope, QueryIdentity, QueryKey};
pub use paged::{Page, PagedList};
pub use result::{CacheResult, CacheSource};
pub use store::{CacheEntry, CacheEvent, CacheStore, FetchTicket, Snapshot};
