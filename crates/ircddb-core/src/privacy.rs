//! Inline privacy toggles carried in table 0 updates.
//!
//! Layout after the row fields: an optional single hex character, then an
//! 8-char `rpt2` field, then an 8-char `urcall` field. A `urcall` starting
//! with `PRIV` or `VIS` is a command.

use crate::tables::{is_default_field, is_hex_char};

/// Value stored in the metadata table for a hidden row.
pub const FLAG_HIDDEN: &str = "P_______";

/// Value stored in the metadata table for a visible row.
pub const FLAG_VISIBLE: &str = "X_______";

/// Table holding privacy flags.
pub const PRIVACY_TABLE: usize = 2;

/// Find the privacy command in the tokens following `<date> <time> <key> <value>`.
pub fn find_command<'a>(trailing: &[&'a str]) -> Option<&'a str> {
    let mut rest = trailing;
    if rest.first().is_some_and(|t| is_hex_char(t)) {
        rest = &rest[1..];
    }

    let [rpt2, urcall, ..] = rest else {
        return None;
    };
    if !is_default_field(rpt2) || !is_default_field(urcall) {
        return None;
    }

    (urcall.starts_with("PRIV") || urcall.starts_with("VIS")).then_some(*urcall)
}

/// Flag to persist for `command` given the row's current hidden state.
///
/// `None` when the command would not change anything.
pub fn flag_for(command: &str, currently_hidden: bool) -> Option<&'static str> {
    match command {
        "PRIV_ON_" | "PRIV__ON" | "VIS_OFF_" | "VIS__OFF" if !currently_hidden => Some(FLAG_HIDDEN),
        "PRIV_OFF" | "VIS_ON__" | "VIS__ON_" | "VIS___ON" if currently_hidden => Some(FLAG_VISIBLE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_command_with_hex_char() {
        assert_eq!(find_command(&["A", "DB0ABC G", "PRIV_ON_"]), None);
        assert_eq!(find_command(&["A", "DB0ABC_G", "PRIV_ON_"]), Some("PRIV_ON_"));
    }

    #[test]
    fn test_find_command_without_hex_char() {
        assert_eq!(find_command(&["DB0ABC_G", "VIS__OFF"]), Some("VIS__OFF"));
        assert_eq!(find_command(&["DB0ABC_G", "CQCQCQ__"]), None);
        assert_eq!(find_command(&["DB0ABC_G"]), None);
        assert_eq!(find_command(&[]), None);
    }

    #[test]
    fn test_unknown_priv_command_maps_to_nothing() {
        let cmd = find_command(&["DB0ABC_G", "PRIVXXXX"]).unwrap();
        assert_eq!(flag_for(cmd, false), None);
        assert_eq!(flag_for(cmd, true), None);
        assert_eq!(find_command(&["DB0ABC_G", "//______"]), None);
    }

    #[test]
    fn test_flag_mapping() {
        assert_eq!(flag_for("PRIV_ON_", false), Some(FLAG_HIDDEN));
        assert_eq!(flag_for("PRIV_ON_", true), None);
        assert_eq!(flag_for("PRIV_OFF", true), Some(FLAG_VISIBLE));
        assert_eq!(flag_for("PRIV_OFF", false), None);
        assert_eq!(flag_for("VIS_OFF_", false), Some(FLAG_HIDDEN));
        assert_eq!(flag_for("VIS___ON", true), Some(FLAG_VISIBLE));
        assert_eq!(flag_for("VIS__ON_", false), None);
    }
}
