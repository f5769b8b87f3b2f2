//! Lookups in the INI file SXM is running with
//!
//! SXM only reports the file's path (request item `IniFileName`); entries
//! are read from disk.

use crate::error::SxmError;
use ini::{Ini, ParseOption};
use std::path::Path;

/// Request item answering with the active INI file's path
pub const INI_FILE_ITEM: &str = "IniFileName";

/// Path from an `IniFileName` reply, without line breaks or NUL padding
pub fn path_from_reply(payload: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(payload);
    let path = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!path.is_empty()).then(|| path.to_string())
}

/// Value of `item` in `[section]`, or `None` if either is missing.
///
/// Section names match exactly, item names case-insensitively.
pub fn read_entry(path: &Path, section: &str, item: &str) -> Result<Option<String>, SxmError> {
    let bytes = std::fs::read(path).map_err(|source| SxmError::Io {
        source,
        context: format!("reading INI file {}", path.display()),
    })?;
    // Written in the ANSI code page; only ASCII keys matter here
    let text = String::from_utf8_lossy(&bytes);
    let ini = parse(&text).map_err(|e| {
        SxmError::Protocol(format!("unreadable INI file {}: {e}", path.display()))
    })?;
    Ok(entry(&ini, section, item))
}

fn parse(text: &str) -> Result<Ini, ini::ParseError> {
    // Values hold Windows paths; backslashes are literal
    Ini::load_from_str_opt(
        text,
        ParseOption {
            enabled_escape: false,
            enabled_quote: false,
            ..ParseOption::default()
        },
    )
}

fn entry(ini: &Ini, section: &str, item: &str) -> Option<String> {
    ini.section(Some(section))?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(item))
        .map(|(_, value)| value.to_string())
}
