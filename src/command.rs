//! Command parsing
//!
//! Turns one sanitized input line into a typed `Command`. Lines that do not
//! start with the command prefix are chat text. Pure and stateless.

use crate::error::ParseError;

/// Leading character that marks a command
pub const COMMAND_PREFIX: char = '\\';

const RENAME_USAGE: &str = "\\rename <new name>";
const WHISPER_USAGE: &str = "\\whisper <user> <message>";

/// A parsed client line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain chat text for everyone
    Chat(String),
    /// List online users
    Who,
    /// Change display name
    Rename(String),
    /// Show help text
    Help,
    /// Show server time
    Time,
    /// Show user counts
    Stats,
    /// Private message to one user
    Whisper { target: String, body: String },
    /// Leave the chat room
    Quit,
}

/// Remove control characters and surrounding whitespace
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c >= ' ' && *c != '\u{7f}')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Parse a trimmed line
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();

    let Some(rest) = line.strip_prefix(COMMAND_PREFIX) else {
        return Ok(Command::Chat(line.to_string()));
    };

    let (word, args) = split_word(rest);
    if word.is_empty() {
        return Err(ParseError::EmptyCommand);
    }

    match word.to_lowercase().as_str() {
        "who" => Ok(Command::Who),
        "help" => Ok(Command::Help),
        "time" => Ok(Command::Time),
        "stats" => Ok(Command::Stats),
        "quit" | "exit" => Ok(Command::Quit),
        "rename" => {
            let (name, _) = split_word(args);
            if name.is_empty() {
                return Err(ParseError::MissingArgument {
                    usage: RENAME_USAGE,
                });
            }
            Ok(Command::Rename(name.to_string()))
        }
        "whisper" | "w" => {
            let (target, body) = split_word(args);
            if target.is_empty() || body.is_empty() {
                return Err(ParseError::MissingArgument {
                    usage: WHISPER_USAGE,
                });
            }
            Ok(Command::Whisper {
                target: target.to_string(),
                body: body.to_string(),
            })
        }
        _ => Err(ParseError::UnknownCommand(format!("{COMMAND_PREFIX}{word}"))),
    }
}

/// Split off the first whitespace-delimited word; the remainder keeps its
/// internal spacing but loses the leading whitespace run.
fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(idx) => (&input[..idx], input[idx..].trim_start()),
        None => (input, ""),
    }
}
