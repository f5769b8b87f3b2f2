use super::DeviceControl;
use super::ioctl::{self, GET_RESPONSE_SIZE, IOCTL_GET_CHANNEL, IOCTL_SET_CHANNEL};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;
use std::io;

/// In-memory stand-in for the SXM kernel driver.
///
/// Decodes the same request frames as the real driver: a set-channel stores
/// the count in a register file, a get-channel returns it (zero if never
/// written). Used for offline runs and tests.
#[derive(Debug, Default)]
pub struct LoopbackDevice {
    registers: HashMap<i32, i32>,
    closed: bool,
}

impl LoopbackDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload a register, e.g. to pin an input channel at a fixed count
    pub fn with_register(mut self, index: i32, value: i32) -> Self {
        self.registers.insert(index, value);
        self
    }
}

impl DeviceControl for LoopbackDevice {
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device closed"));
        }
        match code {
            IOCTL_GET_CHANNEL => {
                if input.len() < 4 || output.len() < GET_RESPONSE_SIZE {
                    return Err(io::Error::from(io::ErrorKind::InvalidInput));
                }
                let index = LittleEndian::read_i32(&input[..4]);
                let value = self.registers.get(&index).copied().unwrap_or(0);
                LittleEndian::write_i32(&mut output[..GET_RESPONSE_SIZE], value);
                Ok(GET_RESPONSE_SIZE)
            }
            IOCTL_SET_CHANNEL => {
                let (index, value) = ioctl::decode_set_request(input)
                    .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
                self.registers.insert(index, value);
                Ok(0)
            }
            other => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unknown control code {other:#010x}"),
            )),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}
