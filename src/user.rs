//! User struct definition
//!
//! Represents one chat session: its identity, activity timestamps, outbound
//! mailbox and the cancellation signal shared by the session's tasks.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::RegistryError;
use crate::mailbox::{DeliveryError, Mailbox};
use crate::types::UserId;

/// Connected user information
///
/// The registry owns the canonical record; clones handed out by the registry
/// are snapshots of the name and timestamps but share the mailbox and the
/// cancellation token with the original.
#[derive(Debug, Clone)]
pub struct User {
    /// Unique identifier for this session
    pub id: UserId,
    /// Display name
    pub name: String,
    /// When the session was registered
    pub joined_at: Instant,
    /// Last successful read from the client
    pub last_seen: Instant,
    /// Server → client message queue
    pub mailbox: Mailbox,
    /// Raised once when the session ends
    pub cancel: CancellationToken,
}

impl User {
    /// Create a new user with the given ID, name and mailbox
    pub fn new(id: UserId, name: String, mailbox: Mailbox) -> Self {
        let now = Instant::now();
        Self {
            id,
            name,
            joined_at: now,
            last_seen: now,
            mailbox,
            cancel: CancellationToken::new(),
        }
    }

    /// Queue a message for this user without waiting
    pub fn send(&self, text: impl Into<String>) -> Result<(), RegistryError> {
        self.mailbox.try_deliver(text).map_err(|e| match e {
            DeliveryError::Full => RegistryError::MailboxFull,
            DeliveryError::Closed => RegistryError::MailboxClosed,
        })
    }

    /// Whether the session has not been cancelled yet
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Refresh the last-activity timestamp
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Time since the last successful read
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// Time since the session joined
    pub fn online_for(&self) -> Duration {
        self.joined_at.elapsed()
    }
}
