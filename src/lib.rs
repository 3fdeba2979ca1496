//! Line-based TCP Chat Room Server Library
//!
//! Clients connect over TCP and exchange newline-terminated lines: plain text
//! is chat for everyone, lines starting with `\` are commands.
//!
//! # Features
//! - Capacity-limited admission
//! - Public chat broadcast
//! - Private whispers
//! - Renaming with unique names
//! - Online user listing, server time and statistics
//! - Idle timeout disconnection
//!
//! # Architecture
//! - `UserRegistry` is the single shared table of sessions, guarded by one
//!   readers-writer lock
//! - Each connection gets a `SessionSupervisor` running reader, writer and
//!   idle-watcher tasks tied together by a cancellation token
//! - Every session has a bounded mailbox; broadcasts never wait on a slow
//!   client and drop messages for it instead
//!
//! # Example
//! ```ignore
//! use chatroom::{ChatServer, Config};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ChatServer::new(Config::default());
//!     server.run().await.unwrap();
//! }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;
pub mod user;

// Re-export main types for convenience
pub use command::Command;
pub use config::Config;
pub use error::{AppError, ConfigError, ParseError, RegistryError};
pub use mailbox::{Inbox, Mailbox};
pub use registry::UserRegistry;
pub use server::{ChatServer, ServerStats};
pub use session::{CloseReason, SessionSettings, SessionState, SessionSupervisor};
pub use types::UserId;
pub use user::User;
