//! Raw channel access through the SXM kernel driver
//!
//! [`RawChannelDriver`] talks to the driver with two control codes (get and
//! set channel) and layers the channel table on top for physical units. The
//! device node itself sits behind [`DeviceControl`] so the same driver logic
//! runs against the real device or the in-memory [`LoopbackDevice`].

pub mod ioctl;
mod loopback;
#[cfg(windows)]
mod windows;

pub use loopback::LoopbackDevice;

use crate::channels::ChannelTable;
use crate::error::SxmError;
use ioctl::{
    GET_REQUEST_SIZE, GET_RESPONSE_SIZE, IOCTL_GET_CHANNEL, IOCTL_SET_CHANNEL, SET_REQUEST_SIZE,
};
use log::{debug, warn};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

/// Default device node created by the SXM driver
pub const DEVICE_PATH: &str = r"\\.\SXM";

/// A device node that accepts buffered control requests.
pub trait DeviceControl: Send {
    /// Issue `code` with `input`, writing any response into `output`.
    /// Returns the number of response bytes written.
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> io::Result<usize>;

    /// Release the underlying handle
    fn close(&mut self) -> io::Result<()>;
}

/// Driver handle shared between the facade and the acquisition worker
pub type SharedDriver = Arc<Mutex<RawChannelDriver>>;

pub struct RawChannelDriver {
    device: Option<Box<dyn DeviceControl>>,
    table: Arc<ChannelTable>,
    /// Scratch buffers reused by every call; sampling runs at tens of kHz
    get_request: [u8; GET_REQUEST_SIZE],
    get_response: [u8; GET_RESPONSE_SIZE],
    set_request: [u8; SET_REQUEST_SIZE],
}

impl RawChannelDriver {
    /// Open the kernel driver's device node.
    ///
    /// Fails with [`SxmError::DriverUnavailable`] when the node cannot be
    /// opened: driver not installed or not started, hardware absent, or
    /// insufficient permissions.
    pub fn open(device_path: &str, table: Arc<ChannelTable>) -> Result<Self, SxmError> {
        let device = open_device(device_path).map_err(|source| {
            warn!("Failed to open SXM driver at {device_path}: {source}");
            SxmError::DriverUnavailable {
                path: device_path.to_string(),
                source,
            }
        })?;
        debug!("Opened SXM driver at {device_path}");
        Ok(Self::with_device(Box::new(device), table))
    }

    /// Wrap an already opened device
    pub fn with_device(device: Box<dyn DeviceControl>, table: Arc<ChannelTable>) -> Self {
        Self {
            device: Some(device),
            table,
            get_request: [0; GET_REQUEST_SIZE],
            get_response: [0; GET_RESPONSE_SIZE],
            set_request: [0; SET_REQUEST_SIZE],
        }
    }

    pub fn into_shared(self) -> SharedDriver {
        Arc::new(Mutex::new(self))
    }

    pub fn table(&self) -> &Arc<ChannelTable> {
        &self.table
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Read the raw signed count of a driver channel.
    pub fn read_raw(&mut self, index: i32) -> Result<i32, SxmError> {
        let device = self.device.as_mut().ok_or(SxmError::DriverOffline)?;

        ioctl::encode_get_request(&mut self.get_request, index);
        let n = device
            .control(IOCTL_GET_CHANNEL, &self.get_request, &mut self.get_response)
            .map_err(|source| SxmError::Io {
                source,
                context: format!("Reading driver channel {index}"),
            })?;

        if n < GET_RESPONSE_SIZE {
            return Err(SxmError::Protocol(format!(
                "Driver returned {n} bytes for channel {index}, expected {GET_RESPONSE_SIZE}"
            )));
        }
        Ok(ioctl::decode_get_response(&self.get_response))
    }

    /// Write a raw signed count to a driver channel.
    pub fn write_raw(&mut self, index: i32, value: i32) -> Result<(), SxmError> {
        let device = self.device.as_mut().ok_or(SxmError::DriverOffline)?;

        ioctl::encode_set_request(&mut self.set_request, index, value);
        device
            .control(IOCTL_SET_CHANNEL, &self.set_request, &mut [])
            .map_err(|source| SxmError::Io {
                source,
                context: format!("Writing {value} to driver channel {index}"),
            })?;
        debug!("Driver channel {index} <- {value}");
        Ok(())
    }

    /// Read a channel by name in physical units.
    pub fn read_scaled(&mut self, name: &str) -> Result<f64, SxmError> {
        let (index, scale) = {
            let ch = self.table.lookup(name)?;
            (ch.driver_index, ch.scale)
        };
        let raw = self.read_raw(index)?;
        Ok(f64::from(raw) * scale)
    }

    /// Write a physical value to a channel by name.
    ///
    /// The value is rounded to the nearest driver count; the count actually
    /// sent is returned so callers can see the quantization.
    pub fn write_unit(&mut self, name: &str, value: f64) -> Result<i32, SxmError> {
        if !value.is_finite() {
            return Err(SxmError::InvalidArgument(format!(
                "refusing to write non-finite value {value} to '{name}'"
            )));
        }
        let (index, counts) = {
            let ch = self.table.lookup(name)?;
            let exact = value / ch.scale;
            if exact > f64::from(i32::MAX) || exact < f64::from(i32::MIN) {
                return Err(SxmError::InvalidArgument(format!(
                    "{value} {} is outside the range of channel '{name}'",
                    ch.unit
                )));
            }
            (ch.driver_index, ch.to_counts(value))
        };
        self.write_raw(index, counts)?;
        Ok(counts)
    }

    /// Release the device handle. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<(), SxmError> {
        match self.device.take() {
            Some(mut device) => device.close().map_err(|source| SxmError::Io {
                source,
                context: "Closing SXM driver".to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl Drop for RawChannelDriver {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(windows)]
fn open_device(path: &str) -> io::Result<windows::WinDevice> {
    windows::WinDevice::open(path)
}

#[cfg(not(windows))]
fn open_device(_path: &str) -> io::Result<LoopbackDevice> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "the SXM kernel driver is only available on Windows",
    ))
}
