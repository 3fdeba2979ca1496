//! Per-connection session supervisor
//!
//! Registers the connection with the `UserRegistry`, then runs three tasks
//! over the shared session record until the session ends:
//!
//! - reader: one line at a time under the idle deadline, parsed and dispatched
//! - writer: drains the session mailbox to the socket under a write deadline
//! - idle watcher: ends the session when `last_seen` is older than the timeout
//!
//! Whichever task notices the end first runs the cleanup (deregister, "left"
//! notice, cancellation); the others find it already done.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{self, Command};
use crate::config::{Config, MAX_TIMEOUT_SECS, WRITE_TIMEOUT};
use crate::error::{AppError, RegistryError};
use crate::mailbox::Inbox;
use crate::message;
use crate::registry::UserRegistry;
use crate::types::UserId;

/// Timing and framing limits for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Read deadline and idle-watcher period
    pub idle_timeout: Duration,
    /// Deadline for each line written to the client
    pub write_timeout: Duration,
    /// Longest accepted input line in bytes
    pub max_line_length: usize,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            write_timeout: WRITE_TIMEOUT,
            max_line_length: config.buffer_size,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Admission pending
    Connecting,
    /// Registered; reader, writer and watcher running
    Active,
    /// Cleanup done, tasks winding down
    Draining,
    /// All tasks finished
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent `\quit`
    Quit,
    /// Client closed the connection
    Disconnected,
    /// Reading failed (I/O, invalid UTF-8 or over-long line)
    ReadFailed,
    /// No line within the read deadline
    ReadTimeout,
    /// Writing to the client failed or timed out
    WriteFailed,
    /// Idle watcher found no activity within the timeout
    IdleTimeout,
    /// Cancelled from outside, e.g. server shutdown
    Cancelled,
}

enum Flow {
    Continue,
    Quit,
}

/// Owns one client connection for its whole lifetime
pub struct SessionSupervisor {
    registry: Arc<UserRegistry>,
    settings: SessionSettings,
}

impl SessionSupervisor {
    pub fn new(registry: Arc<UserRegistry>, settings: SessionSettings) -> Self {
        Self { registry, settings }
    }

    /// Drive the connection until the session is closed
    ///
    /// Returns the reason the session ended, or the registry error if the
    /// connection was never admitted (the client has been told and the
    /// stream closed).
    pub async fn run<S>(self, stream: S, peer: String) -> Result<CloseReason, AppError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = UserId::new();
        debug!("Connection from {} is {:?}", peer, SessionState::Connecting);
        let (user, inbox) = match self.registry.register(id, id.default_name()) {
            Ok(registered) => registered,
            Err(e) => {
                warn!("Rejecting {}: {}", peer, e);
                let text = if e == RegistryError::Full {
                    message::ROOM_FULL.to_string()
                } else {
                    message::error_line(&AppError::Registry(e.clone()))
                };
                reject(stream, text, self.settings.write_timeout).await;
                return Err(e.into());
            }
        };

        info!("User {} ({}) joined from {}", user.name, id, peer);

        let session = Arc::new(Session {
            id,
            registry: self.registry,
            settings: self.settings,
            cancel: user.cancel.clone(),
            closed: OnceLock::new(),
            finished: AtomicBool::new(false),
        });

        session.reply(message::welcome());
        session
            .registry
            .broadcast(&message::user_joined(&user.name), Some(id));

        let (read_half, write_half) = tokio::io::split(stream);
        let lines = FramedRead::new(
            read_half,
            LinesCodec::new_with_max_length(session.settings.max_line_length),
        );
        let sink = FramedWrite::new(write_half, LinesCodec::new());

        let reader = tokio::spawn(session.clone().read_loop(lines));
        let writer = tokio::spawn(session.clone().write_loop(sink, inbox));
        let watcher = tokio::spawn(session.clone().watch_idle());

        let (r, w, t) = tokio::join!(reader, writer, watcher);
        for result in [r, w, t] {
            if let Err(e) = result {
                error!("Session task for {} failed: {}", id, e);
                session.shutdown(CloseReason::Cancelled);
            }
        }

        session.finished.store(true, Ordering::Release);
        let reason = session.close_reason().unwrap_or(CloseReason::Cancelled);
        debug!("Session {} is {:?}", id, session.state());
        info!("Session {} closed: {:?}", id, reason);

        Ok(reason)
    }
}

/// Write a single line to a connection that is not admitted, then close it
pub async fn reject<S>(stream: S, text: String, deadline: Duration)
where
    S: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(stream, LinesCodec::new());
    if let Err(e) = write_line(&mut sink, text, deadline).await {
        debug!("Failed to send rejection: {}", e);
    }
    let _ = timeout(deadline, SinkExt::<String>::close(&mut sink)).await;
}

async fn write_line<W>(
    sink: &mut FramedWrite<W, LinesCodec>,
    line: String,
    deadline: Duration,
) -> Result<(), AppError>
where
    W: AsyncWrite + Unpin,
{
    match timeout(deadline, sink.send(line)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AppError::Write(e)),
        Err(_) => Err(AppError::WriteTimeout),
    }
}

/// State shared by the three tasks of one session
struct Session {
    id: UserId,
    registry: Arc<UserRegistry>,
    settings: SessionSettings,
    cancel: CancellationToken,
    closed: OnceLock<CloseReason>,
    finished: AtomicBool,
}

impl Session {
    fn state(&self) -> SessionState {
        if self.finished.load(Ordering::Acquire) {
            SessionState::Closed
        } else if self.closed.get().is_some() {
            SessionState::Draining
        } else {
            SessionState::Active
        }
    }

    fn close_reason(&self) -> Option<CloseReason> {
        self.closed.get().copied()
    }

    /// Begin draining; only the first call does any work
    ///
    /// Returns true for the call that performed the cleanup.
    fn shutdown(&self, reason: CloseReason) -> bool {
        if self.closed.set(reason).is_err() {
            return false;
        }

        debug!("Session {} draining: {:?}", self.id, reason);
        if let Some(user) = self.registry.unregister(self.id) {
            self.registry.broadcast(&message::user_left(&user.name), None);
            info!("User {} left the chat room ({:?})", user.name, reason);
        }
        self.cancel.cancel();
        true
    }

    /// Queue a line for this session's own client
    fn reply(&self, text: impl Into<String>) {
        if let Err(e) = self.registry.unicast(self.id, text) {
            debug!("Reply to {} dropped: {}", self.id, e);
        }
    }

    async fn read_loop<S>(self: Arc<Self>, mut lines: FramedRead<ReadHalf<S>, LinesCodec>)
    where
        S: AsyncRead,
    {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.shutdown(CloseReason::Cancelled);
                    break;
                }
                next = timeout(self.settings.idle_timeout, lines.next()) => next,
            };

            let line = match next {
                Ok(Some(Ok(line))) => line,
                Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    warn!("Line from {} exceeds {} bytes", self.id, self.settings.max_line_length);
                    self.reply("Error: line too long");
                    self.shutdown(CloseReason::ReadFailed);
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!("Read from {} failed: {}", self.id, AppError::Read(e));
                    self.shutdown(CloseReason::ReadFailed);
                    break;
                }
                Ok(None) => {
                    debug!("{} closed the connection", self.id);
                    self.shutdown(CloseReason::Disconnected);
                    break;
                }
                Err(_) => {
                    info!("{} timed out: {}", self.id, AppError::ReadTimeout);
                    self.shutdown(CloseReason::ReadTimeout);
                    break;
                }
            };

            self.registry.touch(self.id);

            let input = command::sanitize(&line);
            if input.is_empty() {
                continue;
            }

            match self.dispatch(&input) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => {
                    self.shutdown(CloseReason::Quit);
                    break;
                }
                Err(e) => {
                    debug!("Command from {} rejected: {}", self.id, e);
                    self.reply(message::error_line(&e));
                }
            }
        }
        debug!("Read task ended for {}", self.id);
    }

    async fn write_loop<S>(
        self: Arc<Self>,
        mut sink: FramedWrite<WriteHalf<S>, LinesCodec>,
        mut inbox: Inbox,
    ) where
        S: AsyncWrite,
    {
        loop {
            tokio::select! {
                biased;
                next = inbox.recv() => {
                    let Some(line) = next else { break };
                    if let Err(e) = write_line(&mut sink, line, self.settings.write_timeout).await {
                        warn!("Write to {} failed: {}", self.id, e);
                        self.shutdown(CloseReason::WriteFailed);
                        return;
                    }
                }
                _ = self.cancel.cancelled() => {
                    self.shutdown(CloseReason::Cancelled);
                    break;
                }
            }
        }

        // Lines queued before the session closed (e.g. the \quit farewell)
        inbox.close();
        while let Some(line) = inbox.try_recv() {
            if write_line(&mut sink, line, self.settings.write_timeout)
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = timeout(
            self.settings.write_timeout,
            SinkExt::<String>::close(&mut sink),
        )
        .await;
        debug!("Write task ended for {}", self.id);
    }

    async fn watch_idle(self: Arc<Self>) {
        let limit = self.settings.idle_timeout;
        // Tick at least weekly so the first deadline never overflows `Instant`
        let period = limit.min(Duration::from_secs(MAX_TIMEOUT_SECS));
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.shutdown(CloseReason::Cancelled);
                    break;
                }
                _ = ticker.tick() => match self.registry.idle_for(self.id) {
                    Some(idle) if idle > limit => {
                        info!("{} idle for {:?}, disconnecting", self.id, idle);
                        self.shutdown(CloseReason::IdleTimeout);
                        break;
                    }
                    Some(_) => {}
                    None => {
                        self.shutdown(CloseReason::Cancelled);
                        break;
                    }
                },
            }
        }
    }

    fn dispatch(&self, input: &str) -> Result<Flow, AppError> {
        let command = command::parse(input)?;
        let name = self
            .registry
            .get(self.id)
            .map(|u| u.name)
            .ok_or(RegistryError::NotFound)?;

        match command {
            Command::Chat(text) => {
                self.registry.broadcast(&message::chat(&name, &text), None);
                debug!("{} says: {}", name, text);
            }
            Command::Who => {
                self.reply(message::who(&self.registry.list_active()));
            }
            Command::Rename(new_name) => {
                let old = self.registry.rename(self.id, &new_name)?;
                if old != new_name {
                    self.registry
                        .broadcast(&message::user_renamed(&old, &new_name), Some(self.id));
                    info!("User {} renamed to {}", old, new_name);
                }
                self.reply(message::renamed_to(&new_name));
            }
            Command::Help => self.reply(message::help()),
            Command::Time => self.reply(message::time_now()),
            Command::Stats => self.reply(message::stats(
                self.registry.count(),
                self.registry.max_users(),
            )),
            Command::Whisper { target, body } => self.whisper(&name, &target, &body)?,
            Command::Quit => {
                self.reply(message::FAREWELL);
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    fn whisper(&self, from: &str, target: &str, body: &str) -> Result<(), AppError> {
        let recipient = self
            .registry
            .list_active()
            .into_iter()
            .find(|u| u.name == target)
            .ok_or_else(|| AppError::UserOffline(target.to_string()))?;

        self.registry
            .unicast(recipient.id, message::whisper(from, &recipient.name, body))?;
        self.reply(message::whisper_sent(&recipient.name, body));
        debug!("{} whispered to {}", from, recipient.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    use super::*;

    struct TestClient {
        lines: FramedRead<ReadHalf<DuplexStream>, LinesCodec>,
        sink: FramedWrite<WriteHalf<DuplexStream>, LinesCodec>,
    }

    impl TestClient {
        async fn send(&mut self, line: &str) {
            self.sink.send(line).await.unwrap();
        }

        async fn next_line(&mut self) -> Option<String> {
            self.lines.next().await.map(|r| r.unwrap())
        }

        /// Read until a line contains `needle`
        async fn expect(&mut self, needle: &str) -> String {
            loop {
                match self.next_line().await {
                    Some(line) if line.contains(needle) => return line,
                    Some(_) => continue,
                    None => panic!("connection closed before {:?}", needle),
                }
            }
        }

        /// Read everything until the server closes the connection
        async fn drain(&mut self) -> Vec<String> {
            let mut seen = Vec::new();
            while let Some(line) = self.next_line().await {
                seen.push(line);
            }
            seen
        }
    }

    fn settings(idle_secs: u64) -> SessionSettings {
        SessionSettings {
            idle_timeout: Duration::from_secs(idle_secs),
            ..SessionSettings::default()
        }
    }

    fn connect(
        registry: &Arc<UserRegistry>,
        settings: SessionSettings,
    ) -> (TestClient, JoinHandle<Result<CloseReason, AppError>>) {
        connect_with_buffer(registry, settings, 64 * 1024)
    }

    fn connect_with_buffer(
        registry: &Arc<UserRegistry>,
        settings: SessionSettings,
        buffer: usize,
    ) -> (TestClient, JoinHandle<Result<CloseReason, AppError>>) {
        let (client, server) = tokio::io::duplex(buffer);
        let supervisor = SessionSupervisor::new(registry.clone(), settings);
        let handle = tokio::spawn(supervisor.run(server, "test-peer".to_string()));

        let (read_half, write_half) = tokio::io::split(client);
        let client = TestClient {
            lines: FramedRead::new(read_half, LinesCodec::new()),
            sink: FramedWrite::new(write_half, LinesCodec::new()),
        };
        (client, handle)
    }

    fn drain_inbox(inbox: &mut Inbox) -> Vec<String> {
        std::iter::from_fn(|| inbox.try_recv()).collect()
    }

    #[tokio::test]
    async fn test_welcome_then_chat_echo() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (mut client, _handle) = connect(&registry, settings(40));

        client.expect("Welcome to the chat room").await;
        client.send("hello everyone").await;
        let line = client.expect("hello everyone").await;

        let name = registry.list_active()[0].name.clone();
        assert_eq!(line, format!("[{}] hello everyone", name));
    }

    #[tokio::test]
    async fn test_admission_rejected_when_full() {
        let registry = Arc::new(UserRegistry::with_max_users(1));
        let (_occupant, _inbox) = registry.register(UserId::new(), "x".to_string()).unwrap();

        let (mut client, handle) = connect(&registry, settings(40));

        assert_eq!(client.drain().await, vec![message::ROOM_FULL.to_string()]);
        assert!(matches!(
            handle.await.unwrap(),
            Err(AppError::Registry(RegistryError::Full))
        ));
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_quit_sends_farewell_and_single_left_notice() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (_bob, mut bob_inbox) = registry.register(UserId::new(), "bob".to_string()).unwrap();
        let (mut client, handle) = connect(&registry, settings(40));

        client.expect("Welcome").await;
        client.send("\\quit").await;
        let rest = client.drain().await;

        assert!(rest.iter().any(|l| l == message::FAREWELL));
        assert_eq!(handle.await.unwrap().unwrap(), CloseReason::Quit);
        assert_eq!(registry.count(), 1);

        let seen = drain_inbox(&mut bob_inbox);
        assert_eq!(seen.iter().filter(|l| l.contains("joined")).count(), 1);
        assert_eq!(seen.iter().filter(|l| l.contains("left")).count(), 1);
    }

    #[tokio::test]
    async fn test_rename_notifies_others() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (_bob, mut bob_inbox) = registry.register(UserId::new(), "bob".to_string()).unwrap();
        let (mut client, _handle) = connect(&registry, settings(40));

        client.expect("Welcome").await;
        let old_name = registry
            .list_active()
            .into_iter()
            .find(|u| u.name != "bob")
            .unwrap()
            .name;

        client.send("\\rename Bob").await;
        client.expect("Your name is now Bob").await;

        let seen = drain_inbox(&mut bob_inbox);
        assert!(seen
            .iter()
            .any(|l| l.contains(&old_name) && l.contains("[Bob]")));
    }

    #[tokio::test]
    async fn test_rename_conflict_reports_error() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (_bob, _inbox) = registry.register(UserId::new(), "bob".to_string()).unwrap();
        let (mut client, _handle) = connect(&registry, settings(40));

        client.expect("Welcome").await;
        client.send("\\rename bob").await;
        client.expect("Error: name 'bob' is already taken").await;

        // Session keeps working after the error
        client.send("\\stats").await;
        client.expect("2/4 users online").await;
    }

    #[tokio::test]
    async fn test_rename_accepts_any_free_name() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (mut client, _handle) = connect(&registry, settings(40));

        client.expect("Welcome").await;
        client.send("\\rename 小明").await;
        client.expect("Your name is now 小明").await;

        let long_name = "abcdefghijklmnopqrstuvwxyz";
        client.send(&format!("\\rename {long_name}")).await;
        client.expect(&format!("Your name is now {long_name}")).await;

        let names: Vec<_> = registry.list_active().into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec![long_name.to_string()]);
    }

    #[tokio::test]
    async fn test_whisper_delivery_and_offline_target() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (_carol, mut carol_inbox) =
            registry.register(UserId::new(), "Carol".to_string()).unwrap();
        let (mut client, _handle) = connect(&registry, settings(40));

        client.expect("Welcome").await;
        client.send("\\rename A").await;
        client.expect("Your name is now A").await;

        client.send("\\whisper Dave hi").await;
        client.expect("Error: user Dave is not online").await;

        client.send("\\whisper Carol hello").await;
        client.expect("[whisper] -> Carol: hello").await;

        let seen = drain_inbox(&mut carol_inbox);
        assert!(seen.iter().any(|l| l == "[whisper] A -> Carol: hello"));
    }

    #[tokio::test]
    async fn test_whisper_to_full_mailbox_reports_error() {
        let registry = Arc::new(UserRegistry::new(4, 1));
        let (mut client, _handle) = connect(&registry, settings(40));
        client.expect("Welcome").await;

        let (carol, mut carol_inbox) =
            registry.register(UserId::new(), "Carol".to_string()).unwrap();
        registry.unicast(carol.id, "pending").unwrap();

        client.send("\\whisper Carol hello").await;
        client.expect("Error: message queue is full").await;

        assert_eq!(drain_inbox(&mut carol_inbox), vec!["pending".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_command_is_not_broadcast() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (_bob, mut bob_inbox) = registry.register(UserId::new(), "bob".to_string()).unwrap();
        let (mut client, _handle) = connect(&registry, settings(40));

        client.expect("Welcome").await;
        client.send("\\dance").await;
        client.expect("Error: unknown command: \\dance").await;

        let seen = drain_inbox(&mut bob_inbox);
        assert!(seen.iter().all(|l| !l.contains("dance")));
    }

    #[tokio::test]
    async fn test_who_lists_active_users() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (_bob, _inbox) = registry.register(UserId::new(), "bob".to_string()).unwrap();
        let (mut client, _handle) = connect(&registry, settings(40));

        client.expect("Welcome").await;
        client.send("\\who").await;
        client.expect("Online users (2):").await;
        client.expect("- bob (ID: ").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_times_out() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (_bob, mut bob_inbox) = registry.register(UserId::new(), "bob".to_string()).unwrap();
        let (mut client, handle) = connect(&registry, settings(5));

        client.expect("Welcome").await;
        client.drain().await;

        let reason = handle.await.unwrap().unwrap();
        assert!(matches!(
            reason,
            CloseReason::ReadTimeout | CloseReason::IdleTimeout
        ));
        assert_eq!(registry.count(), 1);
        assert!(registry.find_by_name("bob").is_some());

        let seen = drain_inbox(&mut bob_inbox);
        assert_eq!(seen.iter().filter(|l| l.contains("left")).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_session_does_not_time_out() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (mut client, handle) = connect(&registry, settings(5));

        client.expect("Welcome").await;
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(3)).await;
            client.send("\\stats").await;
            client.expect("1/4 users online").await;
        }

        assert_eq!(registry.count(), 1);
        assert!(!handle.is_finished());

        client.send("\\exit").await;
        client.drain().await;
        assert_eq!(handle.await.unwrap().unwrap(), CloseReason::Quit);
    }

    #[tokio::test]
    async fn test_over_long_line_ends_session() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let settings = SessionSettings {
            max_line_length: 16,
            ..SessionSettings::default()
        };
        let (mut client, handle) = connect(&registry, settings);

        client.expect("Welcome").await;
        client.send(&"x".repeat(64)).await;

        let rest = client.drain().await;
        assert!(rest.iter().any(|l| l == "Error: line too long"));
        assert_eq!(handle.await.unwrap().unwrap(), CloseReason::ReadFailed);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_writer_ends_session() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (_bob, mut bob_inbox) = registry.register(UserId::new(), "bob".to_string()).unwrap();
        let settings = SessionSettings {
            write_timeout: Duration::from_secs(1),
            ..settings(40)
        };
        // Client never reads, so the welcome banner cannot fit
        let (_client, handle) = connect_with_buffer(&registry, settings, 16);

        assert_eq!(handle.await.unwrap().unwrap(), CloseReason::WriteFailed);
        assert_eq!(registry.count(), 1);

        let seen = drain_inbox(&mut bob_inbox);
        assert_eq!(seen.iter().filter(|l| l.contains("left")).count(), 1);
    }

    #[tokio::test]
    async fn test_idle_watcher_survives_huge_timeout() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (user, _inbox) = registry.register(UserId::new(), "alice".to_string()).unwrap();
        let session = Arc::new(Session {
            id: user.id,
            registry: registry.clone(),
            settings: SessionSettings {
                idle_timeout: Duration::from_secs(u64::MAX),
                ..SessionSettings::default()
            },
            cancel: user.cancel.clone(),
            closed: OnceLock::new(),
            finished: AtomicBool::new(false),
        });

        let watcher = tokio::spawn(session.clone().watch_idle());
        tokio::task::yield_now().await;
        assert!(!watcher.is_finished());

        user.cancel.cancel();
        watcher.await.unwrap();
        assert_eq!(session.close_reason(), Some(CloseReason::Cancelled));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_client_disconnect_cleans_up() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (mut client, handle) = connect(&registry, settings(40));

        client.expect("Welcome").await;
        drop(client);

        assert_eq!(handle.await.unwrap().unwrap(), CloseReason::Disconnected);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_external_cancel_closes_once() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (_bob, mut bob_inbox) = registry.register(UserId::new(), "bob".to_string()).unwrap();
        let (mut client, handle) = connect(&registry, settings(40));

        client.expect("Welcome").await;
        let user = registry
            .list_active()
            .into_iter()
            .find(|u| u.name != "bob")
            .unwrap();
        user.cancel.cancel();
        user.cancel.cancel();

        client.drain().await;
        assert_eq!(handle.await.unwrap().unwrap(), CloseReason::Cancelled);
        assert!(registry.get(user.id).is_none());

        let seen = drain_inbox(&mut bob_inbox);
        assert_eq!(seen.iter().filter(|l| l.contains("left")).count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_single_fire() {
        let registry = Arc::new(UserRegistry::with_max_users(4));
        let (user, _inbox) = registry.register(UserId::new(), "alice".to_string()).unwrap();
        let (_bob, mut bob_inbox) = registry.register(UserId::new(), "bob".to_string()).unwrap();

        let session = Session {
            id: user.id,
            registry: registry.clone(),
            settings: SessionSettings::default(),
            cancel: user.cancel.clone(),
            closed: OnceLock::new(),
            finished: AtomicBool::new(false),
        };
        assert_eq!(session.state(), SessionState::Active);

        assert!(session.shutdown(CloseReason::IdleTimeout));
        assert!(!session.shutdown(CloseReason::WriteFailed));
        assert!(!session.shutdown(CloseReason::Quit));

        assert_eq!(session.state(), SessionState::Draining);
        assert_eq!(session.close_reason(), Some(CloseReason::IdleTimeout));
        assert!(user.cancel.is_cancelled());
        assert_eq!(drain_inbox(&mut bob_inbox), vec![message::user_left("alice")]);
    }
}
