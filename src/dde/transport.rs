//! Platform seam for the DDE conversation
//!
//! The protocol state machine in [`super::client`] is platform neutral; all
//! it needs from the host is the small [`DdeTransport`] surface below. Error
//! values are the host's raw status codes (DDEML error numbers on Windows).

use std::time::Duration;

/// Something the host delivered while pumping its message queue
#[derive(Debug, Clone, PartialEq)]
pub enum DdeEvent {
    /// Advisory data for a subscribed topic
    AdviseData { topic: String, payload: Vec<u8> },
    /// The server ended the conversation
    Disconnected,
}

pub trait DdeTransport {
    /// Register with the messaging subsystem; a nonzero status is returned as `Err`
    fn register(&mut self) -> Result<(), u32>;

    /// Open a conversation. Name handles are released whatever the outcome.
    fn connect(&mut self, service: &str, topic: &str) -> Result<(), u32>;

    /// Start (or, with `stop`, end) an advisory link on `topic`
    fn advise(&mut self, topic: &str, stop: bool) -> Result<(), u32>;

    /// Submit an execute transaction; `Ok` means the server acknowledged receipt
    fn submit_command(&mut self, payload: &[u8], timeout: Duration) -> Result<(), u32>;

    /// Synchronous request transaction for a plain item
    fn request(&mut self, item: &str, timeout: Duration) -> Result<Vec<u8>, u32>;

    /// Dispatch whatever is pending in the host queue, handing each event to
    /// `sink`. Returns true if anything was processed.
    fn pump_pending_events(&mut self, sink: &mut dyn FnMut(DdeEvent)) -> bool;

    fn disconnect(&mut self);

    fn unregister(&mut self);
}
