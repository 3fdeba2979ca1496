//! Chat server: connection accept loop
//!
//! Owns the `UserRegistry` and accepts TCP connections. Each connection is
//! checked against capacity before anything else happens: over capacity it
//! gets a rejection line and is closed, otherwise a `SessionSupervisor` is
//! spawned for it and the loop goes straight back to accepting.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::message;
use crate::registry::UserRegistry;
use crate::session::{reject, CloseReason, SessionSettings, SessionSupervisor};

/// Point-in-time server statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub current_users: usize,
    pub max_users: usize,
    pub address: String,
    pub timeout_secs: u64,
}

/// The chat room server
pub struct ChatServer {
    config: Config,
    registry: Arc<UserRegistry>,
    settings: SessionSettings,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl ChatServer {
    /// Create a server with an empty registry sized from the config
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(UserRegistry::with_max_users(config.max_users));
        let settings = SessionSettings::from(&config);
        Self {
            config,
            registry,
            settings,
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Override per-session timing (tests use short timeouts)
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> Arc<UserRegistry> {
        self.registry.clone()
    }

    /// Token that stops the accept loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            current_users: self.registry.count(),
            max_users: self.registry.max_users(),
            address: self.config.address(),
            timeout_secs: self.config.timeout,
        }
    }

    /// Validate the config, bind the configured address and serve
    pub async fn run(&self) -> Result<(), AppError> {
        self.config.validate()?;
        let listener = TcpListener::bind(self.config.address()).await?;
        self.serve(listener).await
    }

    /// Accept connections until the shutdown token is cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<(), AppError> {
        info!("Chat server listening on {}", listener.local_addr()?);
        info!(
            "Max users: {}, idle timeout: {:?}",
            self.registry.max_users(),
            self.settings.idle_timeout
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.admit(stream, addr),
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }

        self.stop();
        Ok(())
    }

    /// Send a system announcement to every user
    pub fn announce(&self, text: &str) {
        self.registry.broadcast(&message::system(text), None);
        info!("System announcement: {}", text);
    }

    /// Stop accepting and end every session; later calls do nothing
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Stopping server...");
        self.announce(message::SHUTDOWN_NOTICE);
        self.shutdown.cancel();
        self.registry.cancel_all();
        info!("Server stopped");
    }

    fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        if self.registry.is_full() {
            warn!("Chat room is full, rejecting {}", addr);
            let deadline = self.settings.write_timeout;
            tokio::spawn(reject(stream, message::ROOM_FULL.to_string(), deadline));
            return;
        }

        debug!("New connection from {}", addr);
        let supervisor = SessionSupervisor::new(self.registry.clone(), self.settings);
        tokio::spawn(async move {
            match supervisor.run(stream, addr.to_string()).await {
                Ok(CloseReason::WriteFailed) => warn!("Session for {} ended on write failure", addr),
                Ok(reason) => debug!("Session for {} ended: {:?}", addr, reason),
                Err(e) if e.is_fatal() => error!("Connection handler error: {}", e),
                Err(e) => debug!("Connection from {} not admitted: {}", addr, e),
            }
        });
    }
}
