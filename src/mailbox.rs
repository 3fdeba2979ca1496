//! Per-session outbound message queue
//!
//! A mailbox is a bounded FIFO of text lines waiting for the session's writer
//! loop. Producers never wait: when the queue is at capacity the message is
//! rejected with `DeliveryError::Full` and it is up to the caller to drop it
//! (broadcast) or report it (unicast). Once closed, nothing more is accepted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Why a message could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Queue is at capacity
    Full,
    /// Mailbox was closed
    Closed,
}

/// Create a mailbox with a fixed capacity
///
/// Returns the sending side (cloneable, stored in the user record) and the
/// receiving side for the writer loop.
pub fn mailbox(capacity: usize) -> (Mailbox, Inbox) {
    let (tx, rx) = mpsc::channel(capacity);
    let closed = Arc::new(AtomicBool::new(false));
    (
        Mailbox {
            tx,
            closed: closed.clone(),
        },
        Inbox { rx, closed },
    )
}

/// Sending side of a session mailbox
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::Sender<String>,
    closed: Arc<AtomicBool>,
}

impl Mailbox {
    /// Queue a line without waiting
    pub fn try_deliver(&self, text: impl Into<String>) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.tx.try_send(text.into()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Stop accepting messages. Returns true only for the call that closed it.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

/// Receiving side of a session mailbox, owned by the writer loop
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<String>,
    closed: Arc<AtomicBool>,
}

impl Inbox {
    /// Wait for the next queued line
    ///
    /// Returns `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Take a queued line without waiting
    pub fn try_recv(&mut self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Close the mailbox from the receiving side
    ///
    /// Lines queued before the close can still be taken with `try_recv`.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.rx.close();
    }
}
