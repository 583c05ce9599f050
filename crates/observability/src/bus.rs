//! Publish/subscribe over standard channels.
//!
//! Each subscription gets its own copy of every message published after it
//! subscribed (broadcast semantics). Subscriptions are plain `mpsc` receivers,
//! so they can be drained from OS threads (`recv_timeout`) as well as polled
//! from async code (`try_recv`).
//!
//! Delivery is best-effort: subscribers that dropped their receiver are pruned
//! on the next publish, and nothing is buffered for subscribers that join late.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use parking_lot::Mutex;

/// A subscription to a bus.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// In-memory fan-out bus.
#[derive(Debug)]
pub struct EventBus<M> {
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> Default for EventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M: Clone + Send + 'static> EventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` to every live subscriber; returns how many got it.
    pub fn publish(&self, message: M) -> usize {
        let mut subs = self.subscribers.lock();

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(message.clone()).is_ok());
        subs.len()
    }

    pub fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        Subscription::new(rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
