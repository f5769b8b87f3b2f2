//! Serialization into the SXM scripting language
//!
//! SXM executes Pascal-like programs received over DDE. Every command is a
//! single statement wrapped in a `begin ... end.` block and sent as
//! UTF-16LE without a byte-order mark.

use crate::error::SxmError;
use crate::types::DecimalSeparator;
use std::fmt;

/// A statement understood by the SXM script interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    ScanPara { edit_code: String, value: f64 },
    DncPara { index: i32, value: f64 },
    FeedPara { name: String, value: i32 },
    SetChannel { index: i32, value: f64 },
    /// `a:=GetChannel(i); writeln(a);`
    GetChannel { index: i32 },
    /// `a:=GetScanPara('item'); writeln(a);`
    GetScanPara { item: String },
    /// `a:=GetFeedPara('item'); writeln(a);`
    GetFeedPara { item: String },
}

impl Statement {
    pub fn scan_para(edit_code: &str, value: f64) -> Result<Self, SxmError> {
        validate_edit_code(edit_code)?;
        validate_finite(edit_code, value)?;
        Ok(Statement::ScanPara {
            edit_code: edit_code.to_string(),
            value,
        })
    }

    pub fn dnc_para(index: i32, value: f64) -> Result<Self, SxmError> {
        if index < 0 {
            return Err(SxmError::InvalidArgument(format!(
                "DNC index must be non-negative, got {index}"
            )));
        }
        validate_finite(&format!("DNC {index}"), value)?;
        Ok(Statement::DncPara { index, value })
    }

    pub fn feed_para(name: &str, value: i32) -> Result<Self, SxmError> {
        validate_literal("feedback parameter", name)?;
        Ok(Statement::FeedPara {
            name: name.to_string(),
            value,
        })
    }

    pub fn set_channel(index: i32, value: f64) -> Result<Self, SxmError> {
        validate_finite(&format!("channel {index}"), value)?;
        Ok(Statement::SetChannel { index, value })
    }

    pub fn get_scan_para(item: &str) -> Result<Self, SxmError> {
        validate_literal("scan parameter", item)?;
        Ok(Statement::GetScanPara {
            item: item.to_string(),
        })
    }

    pub fn get_feed_para(item: &str) -> Result<Self, SxmError> {
        validate_literal("feedback parameter", item)?;
        Ok(Statement::GetFeedPara {
            item: item.to_string(),
        })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::ScanPara { edit_code, value } => {
                write!(f, "ScanPara('{edit_code}', {value});")
            }
            Statement::DncPara { index, value } => write!(f, "DNCPara({index}, {value});"),
            Statement::FeedPara { name, value } => write!(f, "FeedPara('{name}', {value});"),
            Statement::SetChannel { index, value } => write!(f, "SetChannel({index}, {value});"),
            Statement::GetChannel { index } => {
                write!(f, "a:=GetChannel({index});\r\n  writeln(a);")
            }
            Statement::GetScanPara { item } => {
                write!(f, "a:=GetScanPara('{item}');\r\n  writeln(a);")
            }
            Statement::GetFeedPara { item } => {
                write!(f, "a:=GetFeedPara('{item}');\r\n  writeln(a);")
            }
        }
    }
}

/// `Edit` followed by one or more ASCII digits
pub fn validate_edit_code(edit_code: &str) -> Result<(), SxmError> {
    match edit_code.strip_prefix("Edit") {
        Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => Ok(()),
        _ => Err(SxmError::InvalidArgument(format!(
            "edit code must look like 'EditNN' (e.g. 'Edit23'), got '{edit_code}'"
        ))),
    }
}

fn validate_finite(what: &str, value: f64) -> Result<(), SxmError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SxmError::InvalidArgument(format!(
            "value for {what} must be finite, got {value}"
        )))
    }
}

/// Text placed inside a quoted script literal
fn validate_literal(what: &str, text: &str) -> Result<(), SxmError> {
    if text.is_empty() || text.contains(['\'', '\r', '\n']) {
        return Err(SxmError::InvalidArgument(format!(
            "{what} name must be non-empty without quotes or line breaks, got {text:?}"
        )));
    }
    Ok(())
}

/// Wrap a statement body in the program envelope SXM expects
pub fn envelope(body: &str) -> String {
    format!("begin\r\n  {body}\r\nend.\r\n")
}

/// Encode a program for the execute transaction: UTF-16LE, no byte-order
/// mark, terminated by a UTF-16 NUL.
pub fn encode_program(program: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = program
        .trim_start_matches('\u{feff}')
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

/// Decode advisory payload bytes into text, dropping the C string terminator
pub fn decode_payload(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

/// Parse a `writeln` reply: the numeric result is on the second line.
///
/// Returns `None` when fewer than two lines arrived or the line is not a
/// number.
pub fn parse_numeric_reply(payload: &[u8], separator: DecimalSeparator) -> Option<f64> {
    let text = decode_payload(payload);
    let line = text.split('\n').nth(1)?.trim();
    if line.is_empty() {
        return None;
    }
    match separator {
        DecimalSeparator::Comma => line.replace(',', ".").parse().ok(),
        DecimalSeparator::Point => line.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_text() {
        assert_eq!(
            Statement::scan_para("Edit23", 0.08).unwrap().to_string(),
            "ScanPara('Edit23', 0.08);"
        );
        assert_eq!(
            Statement::dnc_para(3, 32768.5).unwrap().to_string(),
            "DNCPara(3, 32768.5);"
        );
        assert_eq!(
            Statement::feed_para("enable", 0).unwrap().to_string(),
            "FeedPara('enable', 0);"
        );
        assert_eq!(
            Statement::set_channel(-1, -0.25).unwrap().to_string(),
            "SetChannel(-1, -0.25);"
        );
        assert_eq!(
            Statement::GetChannel { index: 0 }.to_string(),
            "a:=GetChannel(0);\r\n  writeln(a);"
        );
        assert_eq!(
            Statement::get_scan_para("Range").unwrap().to_string(),
            "a:=GetScanPara('Range');\r\n  writeln(a);"
        );
    }

    #[test]
    fn test_edit_code_validation() {
        assert!(validate_edit_code("Edit23").is_ok());
        assert!(validate_edit_code("Edit7").is_ok());
        for bad in ["Edit", "X23", "edit23", "Edit2a", "Edit 23", "Edit23'); Halt;"] {
            assert!(
                matches!(validate_edit_code(bad), Err(SxmError::InvalidArgument(_))),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn test_rejects_unsafe_arguments() {
        assert!(Statement::dnc_para(-1, 1.0).is_err());
        assert!(Statement::scan_para("Edit23", f64::INFINITY).is_err());
        assert!(Statement::set_channel(0, f64::NAN).is_err());
        assert!(Statement::feed_para("en'able", 1).is_err());
        assert!(Statement::feed_para("", 1).is_err());
        assert!(Statement::get_feed_para("Ki\r\n").is_err());
    }

    #[test]
    fn test_envelope_and_encoding() {
        let program = envelope("ScanPara('Edit23', 0.08);");
        assert_eq!(program, "begin\r\n  ScanPara('Edit23', 0.08);\r\nend.\r\n");

        let bytes = encode_program(&program);
        assert_eq!(&bytes[..4], &[b'b', 0, b'e', 0]);
        assert_ne!(&bytes[..2], &[0xFF, 0xFE]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0, 0]);
        assert_eq!(bytes.len(), (program.len() + 1) * 2);

        let with_bom = encode_program("\u{feff}x");
        assert_eq!(with_bom, vec![b'x', 0, 0, 0]);
    }

    #[test]
    fn test_reply_parsing() {
        assert_eq!(
            parse_numeric_reply(b"ok\r\n12,5\r\n", DecimalSeparator::Comma),
            Some(12.5)
        );
        assert_eq!(
            parse_numeric_reply(b"ok\r\n-3.25E-9\r\n\0garbage", DecimalSeparator::Comma),
            Some(-3.25e-9)
        );
        assert_eq!(
            parse_numeric_reply(b"ok\r\n12.5\r\n", DecimalSeparator::Point),
            Some(12.5)
        );
        assert_eq!(parse_numeric_reply(b"ok\r\n12,5\r\n", DecimalSeparator::Point), None);
        assert_eq!(parse_numeric_reply(b"12,5", DecimalSeparator::Comma), None);
        assert_eq!(parse_numeric_reply(b"", DecimalSeparator::Comma), None);
        assert_eq!(parse_numeric_reply(b"ok\r\nnope\r\n", DecimalSeparator::Comma), None);
    }
}
