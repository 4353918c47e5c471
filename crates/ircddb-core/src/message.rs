//! Message: one decoded line of the IRC wire protocol.
//!
//! A message has an optional prefix (the sender identity, `nick!name@host`),
//! a command token and up to [`MAX_PARAMS`] parameters. Messages are built
//! once and never mutated after they are queued.

use std::fmt::{self, Display, Formatter};

/// Maximum number of parameters kept per message. Extra parameters are dropped.
pub const MAX_PARAMS: usize = 15;

/// Commands whose final parameter is always written in trailing form.
const TRAILING_COMMANDS: &[&str] = &["PRIVMSG", "NOTICE", "QUIT", "TOPIC", "USER", "PART"];

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Raw sender identity without the leading `:`
    pub prefix: Option<String>,
    /// Command token (e.g. "PRIVMSG", "433")
    pub command: String,
    /// Ordered parameters, at most [`MAX_PARAMS`]
    pub params: Vec<String>,
}

impl Message {
    /// Create a message without prefix.
    ///
    /// Parameters beyond [`MAX_PARAMS`] are silently dropped. Only the last
    /// parameter may be empty, contain a space or start with `:`. Middle
    /// parameters are written as-is, so such a value does not survive a
    /// trip over the wire.
    pub fn new<I, S>(command: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().take(MAX_PARAMS).map(Into::into).collect(),
        }
    }

    /// Attach a sender prefix.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    /// `PRIVMSG <target> :<text>`
    pub fn privmsg(target: &str, text: impl Into<String>) -> Self {
        Self::new("PRIVMSG", [target.to_string(), text.into()])
    }

    /// `QUIT :<reason>`
    pub fn quit(reason: impl Into<String>) -> Self {
        Self::new("QUIT", [reason.into()])
    }

    /// Get parameter `i` if present.
    pub fn param(&self, i: usize) -> Option<&str> {
        self.params.get(i).map(String::as_str)
    }

    /// Nick part of the prefix (everything before `!` or `@`).
    pub fn prefix_nick(&self) -> &str {
        let prefix = self.prefix.as_deref().unwrap_or("");
        let end = prefix.find(['!', '@']).unwrap_or(prefix.len());
        &prefix[..end]
    }

    /// User name part of the prefix (between `!` and `@`), empty if absent.
    pub fn prefix_name(&self) -> &str {
        let prefix = self.prefix.as_deref().unwrap_or("");
        match prefix.find('!') {
            Some(start) => {
                let rest = &prefix[start + 1..];
                let end = rest.find('@').unwrap_or(rest.len());
                &rest[..end]
            }
            None => "",
        }
    }

    /// Host part of the prefix (after `@`), empty if absent.
    pub fn prefix_host(&self) -> &str {
        let prefix = self.prefix.as_deref().unwrap_or("");
        match prefix.find('@') {
            Some(start) => &prefix[start + 1..],
            None => "",
        }
    }

    /// Serialize to wire bytes, terminated by CRLF.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut line = self.to_string();
        line.push_str("\r\n");
        line.into_bytes()
    }

    /// `[prefix] [command] [p1] ...` for raw traffic logs.
    pub fn bracketed(&self) -> String {
        let mut out = format!(
            "[{}] [{}]",
            self.prefix.as_deref().unwrap_or(""),
            self.command
        );
        for p in &self.params {
            out.push_str(&format!(" [{}]", p));
        }
        out
    }

    fn needs_trailing(&self, last: &str) -> bool {
        last.is_empty()
            || last.contains(' ')
            || last.starts_with(':')
            || TRAILING_COMMANDS.contains(&self.command.as_str())
    }
}

impl Display for Message {
    /// Wire form without the line terminator.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        f.write_str(&self.command)?;

        if let Some((last, middle)) = self.params.split_last() {
            for p in middle {
                write!(f, " {}", p)?;
            }
            if self.needs_trailing(last) {
                write!(f, " :{}", last)?;
            } else {
                write!(f, " {}", last)?;
            }
        }
        Ok(())
    }
}
