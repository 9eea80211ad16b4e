//! # Live Records
//!
//! A live data layer: a transactional record store with secondary indexes,
//! plus push-based subscriptions that stream the full current collection to
//! each subscriber whenever it changes.
//!
//! ## Core Concepts
//!
//! - **Record store**: ordered keys, atomic multi-key transactions, one
//!   monotonically increasing stamp per commit
//! - **Repositories**: a primary record and its by-parent index entry,
//!   always written together
//! - **Notifier**: per-topic fan-out of freshly read collections
//! - **Sessions**: an initial read, then live snapshots strictly newer than
//!   the last one delivered
//! - **Streams**: server-sent event framing of a session
//!
//! ## Example
//!
//! ```ignore
//! use live_records::{Store, StoreConfig, User, WriteSink};
//!
//! let store = Store::open_or_create(StoreConfig::at("./my-store"))?;
//! store.identity().sign_in(&User::new("u1"), "session-token")?;
//!
//! let list = store.create_list("session-token", "Groceries")?.record;
//! store.create_item("session-token", &list.id, "Milk")?;
//!
//! // Stream the caller's lists until the peer goes away
//! let subscription = store.subscribe_lists("session-token")?;
//! let outcome = store.stream(subscription).run(&mut WriteSink(socket));
//! ```

pub mod error;
pub mod identity;
pub mod kv;
pub mod model;
pub mod notify;
pub mod repo;
pub mod session;
pub mod store;
pub mod stream;
pub mod types;

// Re-exports
pub use error::{Result, StoreError};
pub use identity::Identity;
pub use kv::{Check, Commit, Entry, FileJournal, Journal, JournalEntry, KvStore, Transaction};
pub use model::{Item, List, Note, User};
pub use notify::{Notification, NotificationBridge, Notifier, NotifierConfig};
pub use repo::{Committed, EntityKind, Repository};
pub use session::{CancelToken, SessionState, Snapshot, StalenessFilter, Subscription};
pub use store::{ItemPatch, Store, StoreConfig};
pub use stream::{
    ChannelSink, CloseReason, EventStream, FrameReceiver, FrameSink, StreamConfig, StreamHandle,
    StreamOutcome, WriteSink,
};
pub use types::*;
