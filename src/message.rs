//! Message text definitions
//!
//! Every line the server sends to clients is built here. Lines carry no
//! trailing newline; the line codec appends one when the writer sends them.

use std::fmt::Write;
use std::time::Duration;

use crate::error::AppError;
use crate::user::User;

/// Sent to a connection that arrives while the room is at capacity
pub const ROOM_FULL: &str = "Chat room is full, please try again later";

/// Sent in reply to `\quit`
pub const FAREWELL: &str = "Goodbye! Leaving the chat room...";

/// Announced to everyone when the server stops
pub const SHUTDOWN_NOTICE: &str = "Server is shutting down";

const WELCOME: &str = concat!(
    "Welcome to the chat room!\n",
    "Type \\help to see the available commands.\n",
    "Start typing to chat with everyone.",
);

const HELP: &str = concat!(
    "Available commands:\n",
    "  \\who                   - list online users\n",
    "  \\rename <name>         - change your name\n",
    "  \\whisper <user> <msg>  - send a private message (alias \\w)\n",
    "  \\time                  - show the server time\n",
    "  \\stats                 - show chat room statistics\n",
    "  \\help                  - show this help\n",
    "  \\quit                  - leave the chat room (alias \\exit)",
);

pub fn welcome() -> &'static str {
    WELCOME
}

pub fn help() -> &'static str {
    HELP
}

/// Public chat line: `[name] text`
pub fn chat(from: &str, text: &str) -> String {
    format!("[{}] {}", from, text)
}

/// Whisper as seen by the recipient
pub fn whisper(from: &str, to: &str, text: &str) -> String {
    format!("[whisper] {} -> {}: {}", from, to, text)
}

/// Whisper delivery confirmation for the sender
pub fn whisper_sent(to: &str, text: &str) -> String {
    format!("[whisper] -> {}: {}", to, text)
}

/// Server announcement
pub fn system(text: &str) -> String {
    format!("[system] {}", text)
}

pub fn user_joined(name: &str) -> String {
    format!("User [{}] joined the chat room", name)
}

pub fn user_left(name: &str) -> String {
    format!("User [{}] left the chat room", name)
}

pub fn user_renamed(old: &str, new: &str) -> String {
    format!("User [{}] is now known as [{}]", old, new)
}

/// Rename confirmation for the user who renamed
pub fn renamed_to(name: &str) -> String {
    format!("Your name is now {}", name)
}

pub fn time_now() -> String {
    format!(
        "Current time: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn stats(current: usize, max: usize) -> String {
    format!("Chat room stats: {}/{} users online", current, max)
}

/// Error reply for the originating client
pub fn error_line(err: &AppError) -> String {
    format!("Error: {}", err)
}

/// Listing for `\who`
pub fn who(users: &[User]) -> String {
    if users.is_empty() {
        return "No users online".to_string();
    }

    let mut out = format!("Online users ({}):", users.len());
    for user in users {
        let _ = write!(
            out,
            "\n- {} (ID: {}, online: {})",
            user.name,
            user.id,
            format_duration(user.online_for())
        );
    }
    out
}

/// Human readable duration: `42s`, `3m 5s`, `2h 10m`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
