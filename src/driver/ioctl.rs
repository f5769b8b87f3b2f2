//! Driver control codes and request framing
//!
//! Control codes follow the Windows `CTL_CODE` bit layout:
//! `[device type:16][access:2][function:12][method:2]`.

use byteorder::{ByteOrder, LittleEndian};

pub const FILE_DEVICE_UNKNOWN: u32 = 0x0000_0022;
pub const METHOD_BUFFERED: u32 = 0x0;
pub const FILE_ANY_ACCESS: u32 = 0x0;

/// Function number of the SXM driver's "get channel" operation
pub const FUNCTION_GET_CHANNEL: u32 = 0xF0D;
/// Function number of the SXM driver's "set channel" operation
pub const FUNCTION_SET_CHANNEL: u32 = 0xF18;

pub const IOCTL_GET_CHANNEL: u32 = ctl_code(
    FILE_DEVICE_UNKNOWN,
    FILE_ANY_ACCESS,
    FUNCTION_GET_CHANNEL,
    METHOD_BUFFERED,
);
pub const IOCTL_SET_CHANNEL: u32 = ctl_code(
    FILE_DEVICE_UNKNOWN,
    FILE_ANY_ACCESS,
    FUNCTION_SET_CHANNEL,
    METHOD_BUFFERED,
);

/// Get-channel request: one i32 channel index
pub const GET_REQUEST_SIZE: usize = 4;
/// Get-channel response: one i32 raw value
pub const GET_RESPONSE_SIZE: usize = 4;
/// Set-channel request: i32 channel index followed by i32 value
pub const SET_REQUEST_SIZE: usize = 8;

/// Build a 32-bit driver control code.
///
/// Fields wider than their slot are masked so that one field can never
/// bleed into its neighbour.
pub const fn ctl_code(device_type: u32, access: u32, function: u32, method: u32) -> u32 {
    ((device_type & 0xFFFF) << 16)
        | ((access & 0x3) << 14)
        | ((function & 0xFFF) << 2)
        | (method & 0x3)
}

/// Fields of a control code, as produced by [`decompose`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlCode {
    pub device_type: u32,
    pub access: u32,
    pub function: u32,
    pub method: u32,
}

pub const fn decompose(code: u32) -> ControlCode {
    ControlCode {
        device_type: code >> 16,
        access: (code >> 14) & 0x3,
        function: (code >> 2) & 0xFFF,
        method: code & 0x3,
    }
}

pub fn encode_get_request(buf: &mut [u8; GET_REQUEST_SIZE], index: i32) {
    LittleEndian::write_i32(buf, index);
}

pub fn decode_get_response(buf: &[u8; GET_RESPONSE_SIZE]) -> i32 {
    LittleEndian::read_i32(buf)
}

pub fn encode_set_request(buf: &mut [u8; SET_REQUEST_SIZE], index: i32, value: i32) {
    LittleEndian::write_i32(&mut buf[..4], index);
    LittleEndian::write_i32(&mut buf[4..], value);
}

/// Inverse of [`encode_set_request`], used by device stand-ins
pub fn decode_set_request(buf: &[u8]) -> Option<(i32, i32)> {
    if buf.len() < SET_REQUEST_SIZE {
        return None;
    }
    Some((
        LittleEndian::read_i32(&buf[..4]),
        LittleEndian::read_i32(&buf[4..8]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_codes() {
        assert_eq!(IOCTL_GET_CHANNEL, 0x0022_3C34);
        assert_eq!(IOCTL_SET_CHANNEL, 0x0022_3C60);
    }

    #[test]
    fn test_decompose_inverts_ctl_code() {
        for function in [0u32, 1, 0x7FF, 0xF0D, 0xF18, 0xFFF] {
            for method in 0..4 {
                for access in 0..4 {
                    let code = ctl_code(FILE_DEVICE_UNKNOWN, access, function, method);
                    assert_eq!(
                        decompose(code),
                        ControlCode {
                            device_type: FILE_DEVICE_UNKNOWN,
                            access,
                            function,
                            method,
                        }
                    );
                }
            }
        }
    }

    #[test]
    fn test_injective_on_function_and_method() {
        let mut seen = HashSet::new();
        for function in 0..=0xFFFu32 {
            for method in 0..4 {
                let code = ctl_code(FILE_DEVICE_UNKNOWN, FILE_ANY_ACCESS, function, method);
                assert!(seen.insert(code), "collision at {function:#x}/{method}");
            }
        }
    }

    #[test]
    fn test_request_framing_is_little_endian() {
        let mut get = [0u8; GET_REQUEST_SIZE];
        encode_get_request(&mut get, -2);
        assert_eq!(get, [0xFE, 0xFF, 0xFF, 0xFF]);

        let mut set = [0u8; SET_REQUEST_SIZE];
        encode_set_request(&mut set, -1, 1000);
        assert_eq!(set, [0xFF, 0xFF, 0xFF, 0xFF, 0xE8, 0x03, 0x00, 0x00]);
        assert_eq!(decode_set_request(&set), Some((-1, 1000)));
        assert_eq!(decode_set_request(&set[..7]), None);

        assert_eq!(decode_get_response(&[0xE8, 0x03, 0x00, 0x00]), 1000);
    }
}
