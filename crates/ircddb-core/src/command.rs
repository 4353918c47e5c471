//! Tokenizer for the application sub-protocol carried in `PRIVMSG` bodies.
//!
//! Bodies are split on whitespace. A table id is an optional single digit
//! directly after the command word (direct messages) or at the very start
//! (channel messages); absent means table 0.

use crate::tables::{is_date, parse_table_digit};

/// Heartbeat / announcement marker.
pub const ANNOUNCE_PREFIX: &str = "IRCDDB ";

/// A direct message decoded into a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// `UPDATE [t] <date> <time> <key> <value> ...`
    Update { table: usize, fields: Vec<String> },
    /// `SENDLIST [t] <date> <time>`
    SendList { table: usize, fields: Vec<String> },
    ListEnd,
    ListMore,
    OpBeg,
    QuitNow,
    ShowProperties,
    /// `IRCDDB ...` sent directly to us
    Announce,
    /// Any other command word
    Unknown(String),
}

/// Why a body could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Empty,
    TableOutOfRange(usize),
}

/// Decode a direct-message body.
///
/// `num_tables` bounds the optional table digit.
pub fn parse_query(body: &str, num_tables: usize) -> Result<AppCommand, CommandError> {
    let mut tokens = body.split_whitespace();
    let word = tokens.next().ok_or(CommandError::Empty)?;
    let mut rest: Vec<&str> = tokens.collect();

    let table = take_table(&mut rest, num_tables)?;
    let fields = || rest.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    Ok(match word {
        "UPDATE" => AppCommand::Update {
            table,
            fields: fields(),
        },
        "SENDLIST" => AppCommand::SendList {
            table,
            fields: fields(),
        },
        "LIST_END" => AppCommand::ListEnd,
        "LIST_MORE" => AppCommand::ListMore,
        "OP_BEG" => AppCommand::OpBeg,
        "QUIT_NOW" => AppCommand::QuitNow,
        "SHOW_PROPERTIES" => AppCommand::ShowProperties,
        "IRCDDB" => AppCommand::Announce,
        other => AppCommand::Unknown(other.to_string()),
    })
}

/// A channel message body from a sync source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelBody {
    /// `[t] <date> <time> <key> <value> ...`
    Row { table: usize, fields: Vec<String> },
    /// `IRCDDB ...`
    Heartbeat,
    /// Anything else, passed on to the collaborator
    Other,
}

pub fn parse_channel(body: &str, num_tables: usize) -> Result<ChannelBody, CommandError> {
    let mut tokens: Vec<&str> = body.split_whitespace().collect();
    let table = take_table(&mut tokens, num_tables)?;

    if tokens.first().is_some_and(|t| is_date(t)) {
        return Ok(ChannelBody::Row {
            table,
            fields: tokens.iter().map(|s| s.to_string()).collect(),
        });
    }
    if body.starts_with(ANNOUNCE_PREFIX) {
        Ok(ChannelBody::Heartbeat)
    } else {
        Ok(ChannelBody::Other)
    }
}

fn take_table(tokens: &mut Vec<&str>, num_tables: usize) -> Result<usize, CommandError> {
    match tokens.first().and_then(|t| parse_table_digit(t)) {
        Some(table) if table >= num_tables => Err(CommandError::TableOutOfRange(table)),
        Some(table) => {
            tokens.remove(0);
            Ok(table)
        }
        None => Ok(0),
    }
}

/// Table id as it appears in outgoing text.
///
/// Table 0 is implicit. `leading_space` selects ` t` (after a command word)
/// over `t ` (before a timestamp).
pub fn table_tag(table: usize, leading_space: bool) -> String {
    match (table, leading_space) {
        (0, _) => String::new(),
        (t, true) => format!(" {}", t),
        (t, false) => format!("{} ", t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_default_table() {
        let cmd = parse_query("UPDATE 2024-01-01 00:00:00 KEY00001 VALUE001", 2).unwrap();
        assert_eq!(
            cmd,
            AppCommand::Update {
                table: 0,
                fields: vec![
                    "2024-01-01".into(),
                    "00:00:00".into(),
                    "KEY00001".into(),
                    "VALUE001".into()
                ],
            }
        );
    }

    #[test]
    fn test_update_explicit_table() {
        let cmd = parse_query("UPDATE 1 2024-01-01 00:00:00 K V", 2).unwrap();
        assert!(matches!(cmd, AppCommand::Update { table: 1, ref fields } if fields.len() == 4));
    }

    #[test]
    fn test_table_out_of_range() {
        assert_eq!(
            parse_query("SENDLIST 5 2024-01-01 00:00:00", 2),
            Err(CommandError::TableOutOfRange(5))
        );
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_query("LIST_END", 2), Ok(AppCommand::ListEnd));
        assert_eq!(parse_query("LIST_MORE", 2), Ok(AppCommand::ListMore));
        assert_eq!(parse_query("OP_BEG", 2), Ok(AppCommand::OpBeg));
        assert_eq!(parse_query("QUIT_NOW", 2), Ok(AppCommand::QuitNow));
        assert_eq!(parse_query("SHOW_PROPERTIES", 2), Ok(AppCommand::ShowProperties));
        assert_eq!(parse_query("IRCDDB hello", 2), Ok(AppCommand::Announce));
        assert_eq!(
            parse_query("FIND x", 2),
            Ok(AppCommand::Unknown("FIND".into()))
        );
        assert_eq!(parse_query("   ", 2), Err(CommandError::Empty));
    }

    // ==================== Channel bodies ====================

    #[test]
    fn test_channel_row() {
        let body = parse_channel("1 2024-01-01 00:00:00 K V  (from: s-alpha)", 2).unwrap();
        match body {
            ChannelBody::Row { table, fields } => {
                assert_eq!(table, 1);
                assert_eq!(fields[0], "2024-01-01");
                assert_eq!(fields.last().map(String::as_str), Some("s-alpha)"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_channel_heartbeat_and_other() {
        assert_eq!(
            parse_channel("IRCDDB 2024-01-01 00:00:00 startup", 2),
            Ok(ChannelBody::Heartbeat)
        );
        assert_eq!(parse_channel("hello world", 2), Ok(ChannelBody::Other));
        assert_eq!(
            parse_channel("9 2024-01-01 00:00:00 K V", 2),
            Err(CommandError::TableOutOfRange(9))
        );
    }

    #[test]
    fn test_table_tag() {
        assert_eq!(table_tag(0, true), "");
        assert_eq!(table_tag(1, true), " 1");
        assert_eq!(table_tag(2, false), "2 ");
    }
}
