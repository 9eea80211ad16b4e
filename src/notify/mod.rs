//! Change notifier: publish/subscribe keyed by topic.
//!
//! Writers publish the full, freshly re-read collection for a topic together
//! with the stamp of their commit. Nothing is buffered for absent
//! subscribers; a subscriber performs its own read when it attaches.
//!
//! # Example
//!
//! ```ignore
//! let notifier = Notifier::new();
//! let attachment = notifier.attach(Topic::new("lists_by_userId", "u1"));
//!
//! notifier.publish(&attachment.topic, stamp, json!([list]));
//!
//! let notification = attachment.receiver.recv()?;
//! notifier.detach(&attachment.topic, attachment.id);
//! ```

mod notifier;
mod types;

pub use notifier::Notifier;
pub use types::{Attachment, Notification, NotificationBridge, NotifierConfig, SubscriptionId};
