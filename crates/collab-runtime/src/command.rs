//! Line-oriented user commands.
//!
//! A line that starts with `/` is a command; anything else is a chat line.
//!
//! | Input          | Command                   |
//! |----------------|---------------------------|
//! | `hello`        | chat `hello`              |
//! | `/code <text>` | replace the code buffer   |
//! | `/join`        | join the configured room  |
//! | `/leave`       | leave the room            |
//! | `/quit`        | disconnect and exit       |
//! | `//text`       | chat `/text`              |

use crate::error::UnknownCommand;

/// Something the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Send a chat line.
    Chat(String),
    /// Replace the shared code buffer.
    Code(String),
    /// Join the configured room.
    Join,
    /// Leave the room.
    Leave,
    /// Disconnect and exit.
    Quit,
}

impl UserCommand {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, UnknownCommand> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(None);
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Chat(line.to_string())));
        };
        if rest.starts_with('/') {
            return Ok(Some(Self::Chat(rest.to_string())));
        }

        let (name, argument) = rest.split_once(' ').unwrap_or((rest, ""));
        match name {
            "code" => Ok(Some(Self::Code(argument.to_string()))),
            "join" => Ok(Some(Self::Join)),
            "leave" => Ok(Some(Self::Leave)),
            "quit" | "exit" => Ok(Some(Self::Quit)),
            _ => Err(UnknownCommand { name: name.to_string() }),
        }
    }
}
