//! Subscription sessions: an initial read followed by live, stamp-ordered
//! snapshots for one topic.

mod cancel;
mod filter;
mod subscription;

pub use cancel::CancelToken;
pub use filter::StalenessFilter;
pub(crate) use subscription::Next;
pub use subscription::{SessionState, Snapshot, Subscription};
