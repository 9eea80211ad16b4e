//! Per-subscriber session over one topic.

use crate::error::Result;
use crate::notify::{Attachment, Notification, Notifier};
use crate::session::cancel::CancelToken;
use crate::session::filter::StalenessFilter;
use crate::types::{Stamp, Topic};
use crossbeam_channel::{never, select, Receiver};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Initial snapshot read but not yet handed out.
    Init,
    /// Forwarding live notifications.
    Live,
    /// Detached; yields nothing further.
    Closed,
}

/// The full collection under a topic at some point in commit order.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<T> {
    pub topic: Topic,
    /// Stamp this snapshot is known to reflect (None before any commit).
    pub stamp: Option<Stamp>,
    pub records: Vec<T>,
}

/// Result of waiting on a session alongside a peer's close signal.
pub(crate) enum Next<T> {
    Snapshot(Snapshot<T>),
    TimedOut,
    Closed,
    PeerGone,
}

impl<T> Next<T> {
    fn into_snapshot(self) -> Option<Snapshot<T>> {
        match self {
            Next::Snapshot(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

enum Wake {
    Notified(Notification),
    Disconnected,
    Cancelled,
    PeerGone,
    TimedOut,
}

/// A live view of one topic.
///
/// Opening a session attaches to the notifier first and then reads the
/// collection, so no commit can slip between the read and the attachment.
/// The read becomes the first snapshot; afterwards only notifications with a
/// stamp strictly newer than the last snapshot handed out are forwarded.
///
/// ```ignore
/// let mut sub = store.lists().subscribe("u1", CancelToken::new())?;
/// while let Some(snapshot) = sub.recv() {
///     render(&snapshot.records);
/// }
/// ```
pub struct Subscription<T> {
    topic: Topic,
    notifier: Arc<Notifier>,
    attachment: Option<Attachment>,
    initial: Option<Snapshot<T>>,
    filter: StalenessFilter,
    cancel: CancelToken,
    state: SessionState,
}

impl<T: DeserializeOwned> Subscription<T> {
    /// Attach to `topic` and take the initial snapshot via `read`.
    pub fn open<F>(
        topic: Topic,
        notifier: Arc<Notifier>,
        read: F,
        cancel: CancelToken,
    ) -> Result<Self>
    where
        F: FnOnce() -> Result<(Vec<T>, Option<Stamp>)>,
    {
        let attachment = notifier.attach(topic.clone());

        let (records, stamp) = match read() {
            Ok(initial) => initial,
            Err(e) => {
                notifier.detach(&attachment.topic, attachment.id);
                return Err(e);
            }
        };

        debug!(%topic, stamp = ?stamp, records = records.len(), "subscription opened");
        Ok(Self {
            topic: topic.clone(),
            notifier,
            attachment: Some(attachment),
            initial: Some(Snapshot {
                topic,
                stamp,
                records,
            }),
            filter: StalenessFilter::starting_at(stamp),
            cancel,
            state: SessionState::Init,
        })
    }

    /// Block until the next snapshot. None once closed or cancelled.
    pub fn recv(&mut self) -> Option<Snapshot<T>> {
        self.next_snapshot(None, &never()).into_snapshot()
    }

    /// Wait up to `timeout` for the next snapshot.
    ///
    /// None on timeout as well as on close; check [`Self::is_closed`] to tell
    /// them apart.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Snapshot<T>> {
        self.next_snapshot(Some(Instant::now() + timeout), &never())
            .into_snapshot()
    }

    /// Next snapshot if one is ready right now.
    pub fn try_recv(&mut self) -> Option<Snapshot<T>> {
        self.next_snapshot(Some(Instant::now()), &never())
            .into_snapshot()
    }

    /// Like [`Self::recv_timeout`], but also returns early once `peer`
    /// disconnects. The session itself stays open.
    pub(crate) fn recv_or_peer_gone(
        &mut self,
        timeout: Option<Duration>,
        peer: &Receiver<()>,
    ) -> Next<T> {
        self.next_snapshot(timeout.map(|t| Instant::now() + t), peer)
    }

    fn next_snapshot(&mut self, deadline: Option<Instant>, peer: &Receiver<()>) -> Next<T> {
        if self.state == SessionState::Closed {
            return Next::Closed;
        }
        if self.cancel.is_cancelled() {
            self.close();
            return Next::Closed;
        }
        if let Some(initial) = self.initial.take() {
            self.state = SessionState::Live;
            return Next::Snapshot(initial);
        }
        self.drain(deadline, peer)
    }

    fn drain(&mut self, deadline: Option<Instant>, peer: &Receiver<()>) -> Next<T> {
        loop {
            match self.wait(deadline, peer) {
                Wake::Notified(_) if self.cancel.is_cancelled() => {
                    self.close();
                    return Next::Closed;
                }
                Wake::Notified(notification) => {
                    if let Some(snapshot) = self.forward(notification) {
                        return Next::Snapshot(snapshot);
                    }
                }
                Wake::TimedOut => return Next::TimedOut,
                Wake::PeerGone => return Next::PeerGone,
                Wake::Cancelled => {
                    self.close();
                    return Next::Closed;
                }
                Wake::Disconnected => {
                    // The notifier dropped us as a slow subscriber.
                    warn!(topic = %self.topic, "subscription dropped by notifier");
                    self.close();
                    return Next::Closed;
                }
            }
        }
    }

    fn wait(&self, deadline: Option<Instant>, peer: &Receiver<()>) -> Wake {
        let Some(attachment) = self.attachment.as_ref() else {
            return Wake::Disconnected;
        };
        let receiver = &attachment.receiver;
        let signal = self.cancel.signal();

        match deadline {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                select! {
                    recv(receiver) -> msg => msg.map_or(Wake::Disconnected, Wake::Notified),
                    recv(signal) -> _ => Wake::Cancelled,
                    recv(peer) -> _ => Wake::PeerGone,
                    default(timeout) => Wake::TimedOut,
                }
            }
            None => select! {
                recv(receiver) -> msg => msg.map_or(Wake::Disconnected, Wake::Notified),
                recv(signal) -> _ => Wake::Cancelled,
                recv(peer) -> _ => Wake::PeerGone,
            },
        }
    }

    fn forward(&mut self, notification: Notification) -> Option<Snapshot<T>> {
        if !self.filter.is_newer(notification.stamp) {
            debug!(
                topic = %self.topic,
                stamp = %notification.stamp,
                last = ?self.filter.last(),
                "discarding stale snapshot"
            );
            return None;
        }

        match Vec::<T>::deserialize(notification.records.as_ref()) {
            Ok(records) => {
                self.filter.accept(notification.stamp);
                Some(Snapshot {
                    topic: self.topic.clone(),
                    stamp: Some(notification.stamp),
                    records,
                })
            }
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "undecodable snapshot skipped");
                None
            }
        }
    }
}

impl<T> Subscription<T> {
    /// Detach from the notifier. No further snapshots are produced.
    pub fn close(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            self.notifier.detach(&attachment.topic, attachment.id);
            debug!(topic = %self.topic, last = ?self.filter.last(), "subscription closed");
        }
        self.initial = None;
        self.state = SessionState::Closed;
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Stamp of the last snapshot handed out (or of the initial read).
    pub fn last_stamp(&self) -> Option<Stamp> {
        self.filter.last()
    }

    /// Token that closes this session when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: DeserializeOwned> Iterator for Subscription<T> {
    type Item = Snapshot<T>;

    fn next(&mut self) -> Option<Snapshot<T>> {
        self.recv()
    }
}
