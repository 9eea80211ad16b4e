//! Drives a subscription into an outbound event stream.

use crate::error::Result;
use crate::session::{CancelToken, Next, Subscription};
use crate::stream::sse;
use crossbeam_channel::{bounded, never, unbounded, Receiver, Sender};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Write};
use std::ops::Deref;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stream settings.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Reconnect delay advertised to the peer once at open.
    pub retry: Duration,
    /// Emit a comment frame after this much idle time. Off by default.
    pub keep_alive: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            retry: Duration::from_millis(1000),
            keep_alive: None,
        }
    }
}

impl StreamConfig {
    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }
}

// --- Sinks ---

/// Where frames go. An error means the peer is gone.
pub trait FrameSink {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// A receiver that disconnects when the peer goes away, for sinks that
    /// can tell without writing. The stream stops as soon as it fires.
    fn close_signal(&self) -> Option<Receiver<()>> {
        None
    }
}

/// Writes frames to any byte stream, flushing after each one.
pub struct WriteSink<W: Write>(pub W);

impl<W: Write> WriteSink<W> {
    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W: Write> FrameSink for WriteSink<W> {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.0.write_all(frame)?;
        self.0.flush()
    }
}

/// Hands frames to another thread. Dropping the receiving half counts as a
/// peer disconnect.
pub struct ChannelSink {
    tx: Sender<Vec<u8>>,
    closed: Option<Receiver<()>>,
}

impl ChannelSink {
    /// A sink over a caller-made channel. A dropped receiver is noticed on
    /// the next write.
    pub fn new(tx: Sender<Vec<u8>>) -> Self {
        Self { tx, closed: None }
    }

    /// A sink and the receiver its frames arrive on. Dropping the
    /// [`FrameReceiver`] ends the stream even if nothing is being written.
    pub fn pair() -> (Self, FrameReceiver) {
        let (tx, frames) = unbounded();
        let (alive, closed) = bounded(0);
        let sink = Self {
            tx,
            closed: Some(closed),
        };
        (sink, FrameReceiver { frames, _alive: alive })
    }
}

impl FrameSink for ChannelSink {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.tx
            .send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "frame receiver dropped"))
    }

    fn close_signal(&self) -> Option<Receiver<()>> {
        self.closed.clone()
    }
}

/// Receiving half of [`ChannelSink::pair`].
pub struct FrameReceiver {
    frames: Receiver<Vec<u8>>,
    // Never sent on; dropping it disconnects the sink's close signal.
    _alive: Sender<()>,
}

impl Deref for FrameReceiver {
    type Target = Receiver<Vec<u8>>;

    fn deref(&self) -> &Receiver<Vec<u8>> {
        &self.frames
    }
}

// --- Stream ---

/// Why a stream ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// A frame write failed or the sink reported the peer gone.
    PeerDisconnected,
    /// The cancel token fired.
    Cancelled,
    /// The notifier evicted the session for falling behind.
    SubscriptionDropped,
}

/// Summary of a finished stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Data frames written, the initial snapshot included.
    pub snapshots_sent: usize,
    pub reason: CloseReason,
}

/// One subscriber's outbound stream: a retry hint, then one data frame per
/// snapshot in session order, without batching.
pub struct EventStream<T> {
    subscription: Subscription<T>,
    config: StreamConfig,
}

impl<T> EventStream<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(subscription: Subscription<T>, config: StreamConfig) -> Self {
        Self {
            subscription,
            config,
        }
    }

    /// Token that tears the stream down. The transport cancels it when the
    /// peer goes away.
    pub fn cancel_token(&self) -> CancelToken {
        self.subscription.cancel_token()
    }

    /// Pump snapshots into `sink` until the peer leaves or the stream is
    /// cancelled. The subscription is closed before this returns.
    pub fn run<S: FrameSink + ?Sized>(mut self, sink: &mut S) -> StreamOutcome {
        let topic = self.subscription.topic().clone();
        info!(%topic, "event stream opened");

        let mut sent = 0;
        let reason = self.pump(sink, &mut sent);
        self.subscription.close();

        info!(%topic, snapshots = sent, reason = ?reason, "event stream closed");
        StreamOutcome {
            snapshots_sent: sent,
            reason,
        }
    }

    fn pump<S: FrameSink + ?Sized>(&mut self, sink: &mut S, sent: &mut usize) -> CloseReason {
        if sink.send_frame(&sse::retry_frame(self.config.retry)).is_err() {
            return CloseReason::PeerDisconnected;
        }

        let peer = sink.close_signal().unwrap_or_else(never);
        loop {
            let next = self
                .subscription
                .recv_or_peer_gone(self.config.keep_alive, &peer);

            let (frame, is_data) = match next {
                Next::Snapshot(snapshot) => match serde_json::to_string(&snapshot.records) {
                    Ok(payload) => {
                        debug!(topic = %snapshot.topic, stamp = ?snapshot.stamp, "sending snapshot");
                        (sse::data_frame(&payload), true)
                    }
                    Err(e) => {
                        warn!(topic = %snapshot.topic, error = %e, "snapshot not serializable");
                        continue;
                    }
                },
                Next::Closed => {
                    return if self.subscription.cancel_token().is_cancelled() {
                        CloseReason::Cancelled
                    } else {
                        CloseReason::SubscriptionDropped
                    };
                }
                Next::PeerGone => {
                    debug!(topic = %self.subscription.topic(), "peer closed without a write");
                    return CloseReason::PeerDisconnected;
                }
                Next::TimedOut => (sse::keep_alive_frame().to_vec(), false),
            };

            if sink.send_frame(&frame).is_err() {
                return CloseReason::PeerDisconnected;
            }
            if is_data {
                *sent += 1;
            }
        }
    }
}

impl<T> EventStream<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Run on a dedicated thread.
    pub fn spawn<S>(self, mut sink: S) -> Result<StreamHandle>
    where
        S: FrameSink + Send + 'static,
    {
        let cancel = self.cancel_token();
        let name = format!("live-stream-{}", self.subscription.topic());
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || self.run(&mut sink))?;
        Ok(StreamHandle { cancel, join })
    }
}

/// A stream running on its own thread.
pub struct StreamHandle {
    cancel: CancelToken,
    join: JoinHandle<StreamOutcome>,
}

impl StreamHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the stream to end. Err if the stream thread panicked.
    pub fn join(self) -> thread::Result<StreamOutcome> {
        self.join.join()
    }
}
