//! Physical push connections.
//!
//! The manager never blocks on the network: a [`PushConnection`] is polled
//! for frames that some transport task has already received.

use crate::error::{Result, SyncError};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Something observed on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportFrame {
    /// The server acknowledged the subscription.
    Opened,
    /// A data message (JSON push event).
    Message(String),
    /// Comment/ping line. Counts as activity only.
    Keepalive,
    /// The transport reported an error. The connection is unusable.
    Error(String),
    /// The server or the network closed the stream.
    Closed,
}

/// One open stream.
pub trait PushConnection: Send {
    /// Next frame already received, if any.
    fn try_next(&mut self) -> Option<TransportFrame>;

    /// Close the stream. Must be idempotent.
    fn close(&mut self);
}

/// Opens physical connections.
pub trait Transport: Send + Sync {
    fn open(&self, topics: &[String]) -> Result<Box<dyn PushConnection>>;
}

/// Connection fed through a channel by a transport task.
pub struct ChannelConnection {
    frames: Receiver<TransportFrame>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
    closed: bool,
}

impl ChannelConnection {
    pub fn new(frames: Receiver<TransportFrame>) -> Self {
        Self {
            frames,
            on_close: None,
            closed: false,
        }
    }

    /// Create a connection and the sender a transport task writes into.
    pub fn pair() -> (Sender<TransportFrame>, Self) {
        let (tx, rx) = unbounded();
        (tx, Self::new(rx))
    }

    /// Run `f` once when the connection is closed (e.g. abort the reader task).
    pub fn with_on_close(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }
}

impl PushConnection for ChannelConnection {
    fn try_next(&mut self) -> Option<TransportFrame> {
        if self.closed {
            return None;
        }
        match self.frames.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(TransportFrame::Closed),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(f) = self.on_close.take() {
            f();
        }
    }
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Default)]
struct MemoryInner {
    fail_next: u32,
    senders: Vec<Sender<TransportFrame>>,
    opened_topics: Vec<Vec<String>>,
}

/// In-process transport. Each `open` creates a [`ChannelConnection`] whose
/// sender is kept so frames can be injected; opens can be made to fail.
#[derive(Default)]
pub struct MemoryTransport {
    inner: Mutex<MemoryInner>,
    closes: Arc<AtomicUsize>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` opens fail.
    pub fn fail_next(&self, n: u32) {
        self.inner.lock().fail_next = n;
    }

    /// Successful opens so far.
    pub fn open_count(&self) -> usize {
        self.inner.lock().senders.len()
    }

    /// Connections closed so far.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed.
    pub fn live_count(&self) -> usize {
        self.open_count() - self.close_count()
    }

    /// Topics passed to each successful open.
    pub fn opened_topics(&self) -> Vec<Vec<String>> {
        self.inner.lock().opened_topics.clone()
    }

    /// Deliver a frame on the most recent connection.
    pub fn send(&self, frame: TransportFrame) -> bool {
        self.inner
            .lock()
            .senders
            .last()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Deliver a JSON message on the most recent connection.
    pub fn send_message(&self, json: &serde_json::Value) -> bool {
        self.send(TransportFrame::Message(json.to_string()))
    }
}

impl Transport for MemoryTransport {
    fn open(&self, topics: &[String]) -> Result<Box<dyn PushConnection>> {
        let mut inner = self.inner.lock();
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(SyncError::Transport("connection refused".into()));
        }

        let (tx, conn) = ChannelConnection::pair();
        let closes = Arc::clone(&self.closes);
        inner.senders.push(tx);
        inner.opened_topics.push(topics.to_vec());

        Ok(Box::new(conn.with_on_close(move || {
            closes.fetch_add(1, Ordering::SeqCst);
        })))
    }
}
