//! Operator commands and where they come from.

use crate::error::CommandError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

/// One operator instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Replay every connected device's dataset
    Replay,
    /// Publish one key/value pair from every connected device
    Publish {
        channel: Option<String>,
        key: String,
        value: String,
    },
    /// Disconnect every device and stop
    Disconnect,
    /// Stop without disconnecting
    Exit,
}

impl Command {
    /// Parse one script line.
    ///
    /// Returns `Ok(None)` for blank lines and `#` comments.
    pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut parts = line.split_whitespace();
        let command = match parts.next() {
            Some("s") => Command::Replay,
            Some("d") => Command::Disconnect,
            Some("x") => Command::Exit,
            Some("c") => {
                let key = parts.next().ok_or("c needs a key and a value")?;
                let value = parts.next().ok_or("c needs a value")?;
                let channel = parts.next().map(str::to_string);
                Command::Publish {
                    channel,
                    key: key.to_string(),
                    value: value.to_string(),
                }
            }
            Some(other) => return Err(format!("unknown command '{}'", other)),
            None => return Ok(None),
        };

        match parts.next() {
            Some(extra) => Err(format!("unexpected argument '{}'", extra)),
            None => Ok(Some(command)),
        }
    }
}

/// Supplies commands to the dispatcher
#[async_trait]
pub trait CommandSource: Send {
    /// Next command, or `None` once the source is exhausted
    async fn next_command(&mut self) -> Option<Command>;
}

/// Commands read from a file or a prepared list
#[derive(Debug, Default)]
pub struct ScriptSource {
    commands: VecDeque<Command>,
}

impl ScriptSource {
    pub fn from_commands(commands: impl IntoIterator<Item = Command>) -> Self {
        Self {
            commands: commands.into_iter().collect(),
        }
    }

    /// Parse a script: one command per line (`s`, `c <key> <value> [channel]`, `d`, `x`)
    pub fn parse(script: &str) -> Result<Self, CommandError> {
        let mut commands = VecDeque::new();
        for (number, line) in script.lines().enumerate() {
            match Command::parse_line(line) {
                Ok(Some(command)) => commands.push_back(command),
                Ok(None) => {}
                Err(reason) => {
                    return Err(CommandError::Invalid {
                        line: number + 1,
                        reason,
                    })
                }
            }
        }
        Ok(Self { commands })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CommandError> {
        let script = std::fs::read_to_string(path)?;
        Self::parse(&script)
    }

    pub fn remaining(&self) -> usize {
        self.commands.len()
    }
}

#[async_trait]
impl CommandSource for ScriptSource {
    async fn next_command(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }
}

/// Interactive prompts on a line-oriented reader, normally stdin.
///
/// `s` replays, `c` prompts for channel, key and value, `d` disconnects and
/// any other input exits. Choices ignore case.
pub struct ConsoleSource<R> {
    lines: Lines<R>,
    default_channel: String,
}

impl ConsoleSource<BufReader<Stdin>> {
    pub fn stdin(default_channel: impl Into<String>) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), default_channel)
    }
}

impl<R: AsyncBufRead + Unpin + Send> ConsoleSource<R> {
    pub fn new(reader: R, default_channel: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            default_channel: default_channel.into(),
        }
    }

    async fn prompt(&mut self, text: &str) -> Option<String> {
        print!("{}", text);
        let _ = std::io::stdout().flush();
        match self.lines.next_line().await {
            Ok(Some(line)) => Some(line.trim_end_matches('\r').to_string()),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read operator input");
                None
            }
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> CommandSource for ConsoleSource<R> {
    async fn next_command(&mut self) -> Option<Command> {
        let choice = self
            .prompt("Press 's' to send data, 'c' to send a custom message, 'd' to disconnect, any other key to exit: ")
            .await?;

        match choice.trim().to_ascii_lowercase().as_str() {
            "s" => Some(Command::Replay),
            "d" => Some(Command::Disconnect),
            "c" => {
                let text = format!("Channel (default {}): ", self.default_channel);
                let channel = self.prompt(&text).await?.trim().to_string();
                let key = self.prompt("Key: ").await?.trim().to_string();
                let value = self.prompt("Value: ").await?;
                Some(Command::Publish {
                    channel: (!channel.is_empty()).then_some(channel),
                    key,
                    value,
                })
            }
            _ => Some(Command::Exit),
        }
    }
}
