//! Per-topic fan-out of collection snapshots.

use crate::types::{Stamp, Topic};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{
    Attachment, Notification, NotificationBridge, NotifierConfig, SubscriptionId,
};

/// Subscribers of one topic.
#[derive(Default)]
struct Channel {
    subscribers: HashMap<SubscriptionId, Sender<Notification>>,
}

/// In-process relay from writers to subscribers, keyed by topic.
///
/// A topic's channel exists only while it has subscribers; publishing to a
/// topic nobody listens on stores nothing. Delivery is a non-blocking push
/// into each subscriber's bounded queue, so a slow subscriber never holds
/// up the writer. A subscriber whose queue is full or gone is detached.
pub struct Notifier {
    /// Channels by topic.
    channels: RwLock<HashMap<Topic, Channel>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    config: NotifierConfig,
    bridge: RwLock<Option<Arc<dyn NotificationBridge>>>,
}

impl Notifier {
    /// Create a new notifier.
    pub fn new() -> Self {
        Self::with_config(NotifierConfig::default())
    }

    pub fn with_config(config: NotifierConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
            bridge: RwLock::new(None),
        }
    }

    /// Install a bridge that sees every local publish.
    pub fn set_bridge(&self, bridge: Arc<dyn NotificationBridge>) {
        *self.bridge.write() = Some(bridge);
    }

    /// Attach a new subscriber to `topic`, creating its channel if needed.
    pub fn attach(&self, topic: Topic) -> Attachment {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.config.buffer_size.max(1));

        self.channels
            .write()
            .entry(topic.clone())
            .or_default()
            .subscribers
            .insert(id, sender);

        debug!(%topic, id = id.0, "subscriber attached");
        Attachment {
            id,
            topic,
            receiver,
        }
    }

    /// Detach a subscriber. Returns false if it was already gone.
    pub fn detach(&self, topic: &Topic, id: SubscriptionId) -> bool {
        let mut channels = self.channels.write();
        let Some(channel) = channels.get_mut(topic) else {
            return false;
        };

        let removed = channel.subscribers.remove(&id).is_some();
        if channel.subscribers.is_empty() {
            channels.remove(topic);
        }
        if removed {
            debug!(%topic, id = id.0, "subscriber detached");
        }
        removed
    }

    /// Publish a snapshot to every current subscriber of `topic`.
    ///
    /// Never fails; returns how many subscribers accepted the notification.
    pub fn publish(&self, topic: &Topic, stamp: Stamp, records: serde_json::Value) -> usize {
        let notification = Notification {
            topic: topic.clone(),
            stamp,
            records: Arc::new(records),
        };

        if let Some(bridge) = self.bridge.read().as_ref() {
            bridge.forward(&notification);
        }

        self.deliver(notification)
    }

    /// Fan a notification out to local subscribers only.
    pub fn deliver(&self, notification: Notification) -> usize {
        let topic = notification.topic.clone();
        let mut delivered = 0;
        let mut dropped = Vec::new();

        {
            let channels = self.channels.read();
            let Some(channel) = channels.get(&topic) else {
                return 0;
            };

            for (id, sender) in channel.subscribers.iter() {
                match sender.try_send(notification.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(%topic, id = id.0, "subscriber queue full, dropping subscriber");
                        dropped.push(*id);
                    }
                    Err(TrySendError::Disconnected(_)) => dropped.push(*id),
                }
            }
        }

        for id in dropped {
            self.detach(&topic, id);
        }

        debug!(%topic, stamp = %notification.stamp, delivered, "snapshot published");
        delivered
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Number of subscribers attached to `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.channels
            .read()
            .get(topic)
            .map_or(0, |c| c.subscribers.len())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    fn topic(parent: &str) -> Topic {
        Topic::new("lists_by_userId", parent)
    }

    #[test]
    fn test_attach_detach() {
        let notifier = Notifier::new();

        let attachment = notifier.attach(topic("u1"));
        assert_eq!(notifier.subscriber_count(&topic("u1")), 1);
        assert_eq!(notifier.topic_count(), 1);

        assert!(notifier.detach(&attachment.topic, attachment.id));
        assert_eq!(notifier.topic_count(), 0);
        assert!(!notifier.detach(&attachment.topic, attachment.id));
    }

    #[test]
    fn test_publish_reaches_topic_subscribers_only() {
        let notifier = Notifier::new();
        let mine = notifier.attach(topic("u1"));
        let other = notifier.attach(topic("u2"));

        let delivered = notifier.publish(&topic("u1"), Stamp(7), json!([{"name": "Groceries"}]));
        assert_eq!(delivered, 1);

        let got = mine.receiver.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(got.stamp, Stamp(7));
        assert_eq!(got.records[0]["name"], "Groceries");

        assert!(other.receiver.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_publish_without_subscribers_keeps_no_state() {
        let notifier = Notifier::new();
        assert_eq!(notifier.publish(&topic("nobody"), Stamp(1), json!([])), 0);
        assert_eq!(notifier.topic_count(), 0);
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let notifier = Notifier::with_config(NotifierConfig { buffer_size: 2 });
        let slow = notifier.attach(topic("u1"));
        let fast = notifier.attach(topic("u1"));

        for i in 1..=5 {
            notifier.publish(&topic("u1"), Stamp(i), json!([]));
            // Keep the fast one drained.
            fast.receiver.recv_timeout(Duration::from_millis(100)).unwrap();
        }

        assert_eq!(notifier.subscriber_count(&topic("u1")), 1);
        // The slow one still holds what it buffered before being dropped.
        assert_eq!(slow.receiver.try_iter().count(), 2);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let notifier = Notifier::new();
        let attachment = notifier.attach(topic("u1"));
        drop(attachment);

        assert_eq!(notifier.publish(&topic("u1"), Stamp(1), json!([])), 0);
        assert_eq!(notifier.topic_count(), 0);
    }

    struct Recorder(Mutex<Vec<Stamp>>);

    impl NotificationBridge for Recorder {
        fn forward(&self, notification: &Notification) {
            self.0.lock().push(notification.stamp);
        }
    }

    #[test]
    fn test_bridge_sees_publish_but_not_deliver() {
        let notifier = Notifier::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        notifier.set_bridge(recorder.clone());

        notifier.publish(&topic("u1"), Stamp(1), json!([]));
        notifier.deliver(Notification {
            topic: topic("u1"),
            stamp: Stamp(2),
            records: Arc::new(json!([])),
        });

        assert_eq!(*recorder.0.lock(), vec![Stamp(1)]);
    }

    #[test]
    fn test_concurrent_attach_detach_publish() {
        let notifier = Arc::new(Notifier::new());
        let mut handles = Vec::new();

        for t in 0..4 {
            let notifier = Arc::clone(&notifier);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let a = notifier.attach(topic(&format!("u{}", i % 3)));
                    notifier.publish(&a.topic, Stamp(t * 1000 + i), json!([]));
                    assert!(notifier.detach(&a.topic, a.id));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(notifier.topic_count(), 0);
    }
}
