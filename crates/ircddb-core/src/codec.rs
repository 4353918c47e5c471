//! Byte-level line decoder.
//!
//! Turns a raw socket byte stream into [`Message`]s, one byte at a time:
//!
//! ```text
//! start ──':'──▶ prefix ──' '──▶ command ──' '──▶ params ──':'──▶ trailing
//!   └──other──────────────────────▲                   └──15 params──▶ overflow
//! ```
//!
//! `\r` and NUL bytes are ignored everywhere, `\n` emits the message and
//! resets the decoder. Decoding never fails: an overlong line just loses its
//! extra parameters.

use crate::message::{Message, MAX_PARAMS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Start,
    Prefix,
    Command,
    Params,
    Trailing,
    Overflow,
}

/// Incremental decoder holding the partial line between reads.
#[derive(Debug)]
pub struct LineDecoder {
    state: DecodeState,
    prefix: Vec<u8>,
    has_prefix: bool,
    command: Vec<u8>,
    params: Vec<Vec<u8>>,
    param_open: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Start,
            prefix: Vec::new(),
            has_prefix: false,
            command: Vec::new(),
            params: Vec::new(),
            param_open: false,
        }
    }

    /// Feed a chunk of bytes, returning every message completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Message> {
        let mut out = Vec::new();
        for &b in bytes {
            if let Some(m) = self.push(b) {
                out.push(m);
            }
        }
        out
    }

    /// Feed one byte. Returns a message when `b` terminates a non-empty line.
    pub fn push(&mut self, b: u8) -> Option<Message> {
        match b {
            0 | b'\r' => None,
            b'\n' => self.finish(),
            _ => {
                self.step(b);
                None
            }
        }
    }

    fn step(&mut self, b: u8) {
        match self.state {
            DecodeState::Start => {
                if b == b':' {
                    self.has_prefix = true;
                    self.state = DecodeState::Prefix;
                } else if b != b' ' {
                    self.command.push(b);
                    self.state = DecodeState::Command;
                }
            }
            DecodeState::Prefix => {
                if b == b' ' {
                    self.state = DecodeState::Command;
                } else {
                    self.prefix.push(b);
                }
            }
            DecodeState::Command => {
                if b == b' ' {
                    if !self.command.is_empty() {
                        self.state = DecodeState::Params;
                    }
                } else {
                    self.command.push(b);
                }
            }
            DecodeState::Params => self.step_param(b),
            DecodeState::Trailing => {
                if let Some(last) = self.params.last_mut() {
                    last.push(b);
                }
            }
            DecodeState::Overflow => {}
        }
    }

    fn step_param(&mut self, b: u8) {
        if b == b' ' {
            // runs of spaces collapse into one separator
            self.param_open = false;
            return;
        }

        if !self.param_open {
            if self.params.len() >= MAX_PARAMS {
                self.state = DecodeState::Overflow;
                return;
            }
            self.params.push(Vec::new());
            self.param_open = true;
            if b == b':' {
                self.state = DecodeState::Trailing;
                return;
            }
        }

        if let Some(last) = self.params.last_mut() {
            last.push(b);
        }
    }

    fn finish(&mut self) -> Option<Message> {
        let decoder = std::mem::take(self);
        if decoder.command.is_empty() {
            return None;
        }

        Some(Message {
            prefix: decoder
                .has_prefix
                .then(|| String::from_utf8_lossy(&decoder.prefix).into_owned()),
            command: String::from_utf8_lossy(&decoder.command).into_owned(),
            params: decoder
                .params
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(line: &[u8]) -> Message {
        let mut decoder = LineDecoder::new();
        let mut msgs = decoder.feed(line);
        assert_eq!(msgs.len(), 1, "expected exactly one message");
        msgs.remove(0)
    }

    #[test]
    fn test_parse_prefix_command_params() {
        let m = decode_one(b":s-alpha!alpha@host PRIVMSG #chat :2024-01-01 00:00:00 KEY00001 VALUE001\r\n");
        assert_eq!(m.prefix.as_deref(), Some("s-alpha!alpha@host"));
        assert_eq!(m.command, "PRIVMSG");
        assert_eq!(m.params, vec!["#chat", "2024-01-01 00:00:00 KEY00001 VALUE001"]);
    }

    #[test]
    fn test_parse_without_prefix() {
        let m = decode_one(b"PING :irc.example.net\r\n");
        assert!(m.prefix.is_none());
        assert_eq!(m.command, "PING");
        assert_eq!(m.params, vec!["irc.example.net"]);
    }

    #[test]
    fn test_parse_numeric_reply() {
        let m = decode_one(b":server 352 rptr-1 #chat alpha 10.0.0.1 server s-alpha H@ :0 Alpha\n");
        assert_eq!(m.command, "352");
        assert_eq!(m.params.len(), 8);
        assert_eq!(m.param(5), Some("s-alpha"));
        assert_eq!(m.param(6), Some("H@"));
        assert_eq!(m.param(7), Some("0 Alpha"));
    }

    #[test]
    fn test_carriage_return_and_nul_ignored() {
        let m = decode_one(b"NI\0CK r\rptr-1\r\n");
        assert_eq!(m.command, "NICK");
        assert_eq!(m.params, vec!["rptr-1"]);
    }

    #[test]
    fn test_trailing_keeps_colons_and_spaces() {
        let m = decode_one(b"PRIVMSG x :a :b  c\n");
        assert_eq!(m.params, vec!["x", "a :b  c"]);
    }

    #[test]
    fn test_empty_trailing_param() {
        let m = decode_one(b"PASS :\n");
        assert_eq!(m.params, vec![""]);
    }

    #[test]
    fn test_repeated_spaces_collapse() {
        let m = decode_one(b"MODE   #chat   +o   s-beta\n");
        assert_eq!(m.params, vec!["#chat", "+o", "s-beta"]);
    }

    #[test]
    fn test_empty_lines_dropped() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(b"\r\n\r\n   \n").is_empty());
    }

    #[test]
    fn test_split_across_reads() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(b":srv 00").is_empty());
        assert!(decoder.feed(b"4 rptr-1 srv").is_empty());
        let msgs = decoder.feed(b" v1\r\nPING x\r\n");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].command, "004");
        assert_eq!(msgs[0].params, vec!["rptr-1", "srv", "v1"]);
        assert_eq!(msgs[1].command, "PING");
    }

    // ==================== Overflow ====================

    #[test]
    fn test_overflow_keeps_max_params() {
        let line: String = (0..20).map(|i| format!(" p{}", i)).collect();
        let m = decode_one(format!("CMD{}\r\n", line).as_bytes());
        assert_eq!(m.params.len(), MAX_PARAMS);
        assert_eq!(m.params[0], "p0");
        assert_eq!(m.params[MAX_PARAMS - 1], "p14");
    }

    #[test]
    fn test_overflow_discards_trailing() {
        let line: String = (0..MAX_PARAMS).map(|i| format!(" p{}", i)).collect();
        let m = decode_one(format!("CMD{} :rest of line\n", line).as_bytes());
        assert_eq!(m.params.len(), MAX_PARAMS);
        assert_eq!(m.params.last().map(String::as_str), Some("p14"));
    }

    #[test]
    fn test_decoder_resets_after_overflow() {
        let line: String = (0..20).map(|i| format!(" p{}", i)).collect();
        let mut decoder = LineDecoder::new();
        let msgs = decoder.feed(format!("CMD{}\nPONG x\n", line).as_bytes());
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].command, "PONG");
        assert_eq!(msgs[1].params, vec!["x"]);
    }

    // ==================== Framing round-trip ====================

    #[test]
    fn test_serialize_then_parse_is_identity() {
        let samples = vec![
            Message::new("WHO", ["#chat", "*"]),
            Message::privmsg("#chat", "2024-01-01 00:41:00 KEY0001 VALUE001"),
            Message::new("MODE", ["#chat", "+o", "s-beta"]).with_prefix("s-alpha!a@h"),
            Message::new("USER", ["rptr", "0", "*", "ircddb:0.1.0"]),
            Message::new("PASS", [""]),
            Message::new("PING", Vec::<String>::new()),
            Message::new("X", (0..MAX_PARAMS).map(|i| format!("p{}", i))),
        ];

        for original in samples {
            let parsed = decode_one(&original.to_wire());
            assert_eq!(parsed, original, "round trip of {}", original);
        }
    }
}
