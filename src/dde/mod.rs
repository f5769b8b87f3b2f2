//! DDE command channel to the SXM control program
//!
//! SXM accepts small Pascal-like programs on the `SXM|Remote` conversation
//! and reports back through advisory topics. [`CommandProtocolClient`] owns
//! that conversation; [`MockCommandClient`] stands in when SXM is not
//! running.

mod cache;
mod client;
pub mod inifile;
mod mock;
pub mod notification;
pub mod script;
pub mod transport;
#[cfg(windows)]
mod windows;

pub use cache::WriteCache;
pub use client::{ClientOptions, CommandProtocolClient, RequestId};
pub use mock::MockCommandClient;
pub use notification::{
    ADVISORY_TOPICS, LogNotifications, Notification, NotificationHandler, NotificationKind,
};
pub use transport::{DdeEvent, DdeTransport};
#[cfg(windows)]
pub use windows::DdemlTransport;

use crate::error::SxmError;

/// Parameter-level operations shared by the live client and the mock
///
/// The instrument facade holds one of these and never needs to know whether
/// SXM is actually running.
pub trait CommandClient {
    /// Write a scan-panel edit field
    ///
    /// # Arguments
    /// * `edit_code` - Field identifier, `Edit` followed by digits (e.g. `Edit23`)
    /// * `value` - New value in the field's display unit
    fn send_scan_para(&mut self, edit_code: &str, value: f64) -> Result<(), SxmError>;

    /// Write a dynamic-mode (NC-AFM) controller parameter by numeric index
    fn send_dnc_para(&mut self, index: i32, value: f64) -> Result<(), SxmError>;

    /// Write a feedback parameter; `FeedPara('enable', 0)` opens the loop
    fn feed_para(&mut self, name: &str, value: i32) -> Result<(), SxmError>;

    /// Write an output channel through the script interface
    fn set_channel(&mut self, index: i32, value: f64) -> Result<(), SxmError>;

    /// Read one channel through the script interface
    ///
    /// # Returns
    /// `Ok(None)` when SXM answered but the reply carried no number
    fn get_channel(&mut self, index: i32) -> Result<Option<f64>, SxmError>;

    /// Read channel 0 (topography)
    fn read_topography(&mut self) -> Result<Option<f64>, SxmError> {
        self.get_channel(0)
    }

    /// Cache of the most recent value written per parameter
    fn write_cache(&self) -> &WriteCache;

    /// Last value written for `(kind, code)`, kind matched case-insensitively
    fn last_written(&self, kind: &str, code: &str) -> Option<f64> {
        self.write_cache().get(kind, code)
    }

    /// Deliver pending advisories; returns true if anything was processed
    fn pump(&mut self) -> bool {
        false
    }

    fn is_mock(&self) -> bool {
        false
    }

    fn disconnect(&mut self) {}
}
