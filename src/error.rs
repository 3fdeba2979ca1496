//! Error types for the chat server
//!
//! Defines registry, command parsing, configuration and session-level errors.
//! Uses thiserror for ergonomic error definitions. The `Display` text of the
//! registry and parse errors is what the originating client sees after
//! `Error: `, so it is written for humans.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Errors returned by `UserRegistry` operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Admission rejected: the registry already holds `max_users` sessions
    #[error("chat room is full")]
    Full,

    /// A session with this identifier is already registered
    #[error("user ID already exists")]
    DuplicateId,

    /// No active session with the given identifier
    #[error("user not found")]
    NotFound,

    /// Another active session already uses this display name
    #[error("name '{0}' is already taken")]
    NameTaken(String),

    /// The target mailbox is at capacity; the message was not queued
    #[error("message queue is full")]
    MailboxFull,

    /// The target mailbox was closed by its session
    #[error("message queue is closed")]
    MailboxClosed,
}

/// Errors produced while parsing a command line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A bare command prefix with no command word
    #[error("empty command, type \\help for a list of commands")]
    EmptyCommand,

    /// The command word is not recognised
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The command is missing a required argument
    #[error("usage: {usage}")]
    MissingArgument { usage: &'static str },
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("port must be between 1 and 65535")]
    InvalidPort,

    #[error("max users must be at least 1")]
    InvalidMaxUsers,

    #[error("timeout must be at least 1 second")]
    InvalidTimeout,

    #[error("timeout must be at most one week")]
    TimeoutTooLong,

    #[error("buffer size must be at least 1 byte")]
    InvalidBufferSize,
}

/// Application-level errors
///
/// Covers both fatal errors (session termination) and
/// business errors (send an error line to the client).
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (fatal at startup)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Registry rejected an operation
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// Malformed command
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// Whisper target is not an active session
    #[error("user {0} is not online")]
    UserOffline(String),

    /// Reading from the client failed (fatal for the session)
    #[error("read failed: {0}")]
    Read(LinesCodecError),

    /// No line arrived within the idle timeout (fatal for the session)
    #[error("read timed out")]
    ReadTimeout,

    /// Writing to the client failed (fatal for the session)
    #[error("write failed: {0}")]
    Write(LinesCodecError),

    /// A write did not complete within the write deadline (fatal for the session)
    #[error("write timed out")]
    WriteTimeout,
}

impl AppError {
    /// Whether this error ends the session rather than being reported to the client
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Io(_)
                | AppError::Config(_)
                | AppError::Read(_)
                | AppError::ReadTimeout
                | AppError::Write(_)
                | AppError::WriteTimeout
        )
    }
}
