//! Shared table of active sessions
//!
//! `UserRegistry` owns every registered `User` behind a single readers-writer
//! lock. Each mutating operation is one write-lock critical section, so
//! capacity, identifier and name checks can never be split from the change
//! they guard. Delivery (broadcast/unicast) only needs the read lock: the
//! mailboxes synchronize themselves and never block the caller.
//!
//! The lock is never held across an `.await`.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::DEFAULT_MAILBOX_CAPACITY;
use crate::error::RegistryError;
use crate::mailbox::{mailbox, Inbox};
use crate::types::UserId;
use crate::user::User;

/// Registry of active chat sessions
#[derive(Debug)]
pub struct UserRegistry {
    users: RwLock<HashMap<UserId, User>>,
    max_users: usize,
    mailbox_capacity: usize,
}

impl UserRegistry {
    /// Create an empty registry
    pub fn new(max_users: usize, mailbox_capacity: usize) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            max_users,
            mailbox_capacity,
        }
    }

    /// Create an empty registry with the default mailbox capacity
    pub fn with_max_users(max_users: usize) -> Self {
        Self::new(max_users, DEFAULT_MAILBOX_CAPACITY)
    }

    /// Admit a new session
    ///
    /// Rejects with `Full` at capacity and `DuplicateId` if the identifier is
    /// already registered. On success returns a snapshot of the new record and
    /// the receiving end of its mailbox.
    pub fn register(&self, id: UserId, name: String) -> Result<(User, Inbox), RegistryError> {
        let mut users = self.users.write();

        if users.len() >= self.max_users {
            return Err(RegistryError::Full);
        }
        if users.contains_key(&id) {
            return Err(RegistryError::DuplicateId);
        }

        let (mailbox, inbox) = mailbox(self.mailbox_capacity);
        let user = User::new(id, name, mailbox);
        users.insert(id, user.clone());
        debug!("Registered {} ({}/{})", id, users.len(), self.max_users);

        Ok((user, inbox))
    }

    /// Remove a session
    ///
    /// Closes the removed record's mailbox and raises its cancellation
    /// signal. Returns `None` if the id was not registered, so a second call
    /// is a no-op.
    pub fn unregister(&self, id: UserId) -> Option<User> {
        let removed = self.users.write().remove(&id);
        if let Some(user) = &removed {
            user.mailbox.close();
            user.cancel.cancel();
            debug!("Unregistered {} ({})", id, user.name);
        }
        removed
    }

    /// Change a session's display name
    ///
    /// Fails with `NameTaken` if any other active session uses `new_name`.
    /// Returns the previous name on success.
    pub fn rename(&self, id: UserId, new_name: &str) -> Result<String, RegistryError> {
        let mut users = self.users.write();

        if !users.contains_key(&id) {
            return Err(RegistryError::NotFound);
        }
        if users
            .values()
            .any(|u| u.id != id && u.name == new_name)
        {
            return Err(RegistryError::NameTaken(new_name.to_string()));
        }

        let user = users.get_mut(&id).ok_or(RegistryError::NotFound)?;
        Ok(std::mem::replace(&mut user.name, new_name.to_string()))
    }

    /// Refresh a session's last-activity time; no-op if absent
    pub fn touch(&self, id: UserId) {
        if let Some(user) = self.users.write().get_mut(&id) {
            user.touch();
        }
    }

    /// Snapshot of one record
    pub fn get(&self, id: UserId) -> Option<User> {
        self.users.read().get(&id).cloned()
    }

    /// First active session with this display name
    pub fn find_by_name(&self, name: &str) -> Option<User> {
        self.users.read().values().find(|u| u.name == name).cloned()
    }

    /// Time since the session's last successful read
    pub fn idle_for(&self, id: UserId) -> Option<Duration> {
        self.users.read().get(&id).map(User::idle_for)
    }

    /// Point-in-time copy of sessions not yet cancelled, oldest first
    pub fn list_active(&self) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .read()
            .values()
            .filter(|u| u.is_active())
            .cloned()
            .collect();
        users.sort_by_key(|u| u.joined_at);
        users
    }

    pub fn count(&self) -> usize {
        self.users.read().len()
    }

    pub fn max_users(&self) -> usize {
        self.max_users
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.max_users
    }

    /// Queue a message for one session without waiting
    pub fn unicast(&self, id: UserId, text: impl Into<String>) -> Result<(), RegistryError> {
        let users = self.users.read();
        let user = users.get(&id).ok_or(RegistryError::NotFound)?;
        user.send(text)
    }

    /// Queue a message for every session except `exclude`
    ///
    /// Best effort: a full or closed mailbox simply misses the message.
    pub fn broadcast(&self, text: &str, exclude: Option<UserId>) {
        let users = self.users.read();
        let mut dropped = 0usize;
        for user in users.values().filter(|u| Some(u.id) != exclude) {
            if user.send(text).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("Broadcast dropped for {} of {} recipients", dropped, users.len());
        }
    }

    /// Raise the cancellation signal of every session
    pub fn cancel_all(&self) {
        for user in self.users.read().values() {
            user.cancel.cancel();
        }
    }
}
