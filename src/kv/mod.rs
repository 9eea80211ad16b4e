//! Record store: an ordered key-value map with atomic multi-key commits.
//!
//! Each successful commit is assigned a [`Stamp`](crate::types::Stamp) that
//! strictly increases for the lifetime of the store, including across
//! restarts of an on-disk store.

mod journal;
mod store;
mod transaction;

pub use journal::{FileJournal, Journal, JournalEntry, MemoryJournal, SnapshotEntry};
pub use store::{Entry, KvStore, Scan};
pub use transaction::{Check, Commit, Mutation, Transaction};
