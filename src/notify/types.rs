//! Types exchanged over the change notifier.

use crate::types::{Stamp, Topic};
use crossbeam_channel::Receiver;
use std::sync::Arc;

/// Configuration for a notifier.
#[derive(Clone, Debug)]
pub struct NotifierConfig {
    /// Max queued notifications per subscriber before it is dropped.
    /// Default: 64
    pub buffer_size: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { buffer_size: 64 }
    }
}

/// Unique identifier for an attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A full collection snapshot published after a commit.
#[derive(Clone, Debug)]
pub struct Notification {
    pub topic: Topic,
    /// Stamp of the commit that triggered the publish.
    pub stamp: Stamp,
    /// JSON array holding every record under the topic's parent.
    pub records: Arc<serde_json::Value>,
}

/// A subscriber's attachment to one topic.
///
/// Dropping the attachment without detaching is tolerated: the notifier
/// prunes the dead queue on its next publish to the topic.
pub struct Attachment {
    pub id: SubscriptionId,
    pub topic: Topic,
    /// Channel to receive notifications.
    pub receiver: Receiver<Notification>,
}

/// Hook receiving every locally published notification.
///
/// This is the seam for relaying notifications to other processes sharing
/// the same backend; the far side hands them to
/// [`Notifier::deliver`](super::Notifier::deliver).
pub trait NotificationBridge: Send + Sync {
    fn forward(&self, notification: &Notification);
}
