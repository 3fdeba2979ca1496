//! Server configuration
//!
//! Parsed from command line flags with `CHATROOM_*` environment variable
//! fallbacks, then validated before the server starts.

use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::error::ConfigError;

/// Default mailbox capacity per session
pub const DEFAULT_MAILBOX_CAPACITY: usize = 100;

/// Deadline for writing a single line to a client
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest accepted idle timeout (one week)
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Chat room server configuration
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "chatroom")]
#[command(about = "Line-based TCP chat room server", long_about = None)]
pub struct Config {
    /// Host address to bind the server to
    #[arg(long, env = "CHATROOM_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "CHATROOM_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Maximum number of simultaneously connected users
    #[arg(long, env = "CHATROOM_MAX_USERS", default_value_t = 100)]
    pub max_users: usize,

    /// Idle timeout in seconds
    #[arg(long, env = "CHATROOM_TIMEOUT", default_value_t = 40)]
    pub timeout: u64,

    /// Maximum accepted line length in bytes
    #[arg(long, env = "CHATROOM_BUFFER_SIZE", default_value_t = 1024)]
    pub buffer_size: usize,

    /// Default log level when RUST_LOG is not set
    #[arg(long, env = "CHATROOM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable or disable logging entirely
    #[arg(long, env = "CHATROOM_LOGS", default_value_t = true, action = ArgAction::Set)]
    pub logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_users: 100,
            timeout: 40,
            buffer_size: 1024,
            log_level: "info".to_string(),
            logs: true,
        }
    }
}

impl Config {
    /// `host:port` string to bind
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Idle timeout as a `Duration`
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.max_users < 1 {
            return Err(ConfigError::InvalidMaxUsers);
        }
        if self.timeout < 1 {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.timeout > MAX_TIMEOUT_SECS {
            return Err(ConfigError::TimeoutTooLong);
        }
        if self.buffer_size < 1 {
            return Err(ConfigError::InvalidBufferSize);
        }
        Ok(())
    }
}
