//! Advisory notifications pushed by SXM
//!
//! Every advisory arrives as (topic, payload). [`classify`] turns that pair
//! into a [`NotificationKind`] once; everything downstream matches on the
//! enum.

use super::script::decode_payload;
use log::{info, warn};
use std::time::Instant;

/// Topics subscribed right after connecting, in subscription order
pub const ADVISORY_TOPICS: [&str; 6] = [
    "Scan",
    "Command",
    "SaveFileName",
    "ScanLine",
    "MicState",
    "SpectSave",
];

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationKind {
    /// `Scan on` / `Scan off`
    ScanState { scanning: bool },
    /// Output of an executed program; answers the oldest pending request
    CommandEcho { payload: Vec<u8> },
    SaveFileName { file_name: String },
    ScanLine { line: String },
    MicState { payload: String },
    SpectSave { payload: String },
    Unknown { topic: String, payload: String },
}

/// A classified notification with its arrival time, for aligning with
/// acquisition data.
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub received_at: Instant,
}

/// Classify an advisory by payload prefix first (scan state can arrive on
/// any topic), then by topic prefix.
pub fn classify(topic: &str, payload: &[u8]) -> NotificationKind {
    if payload.starts_with(b"Scan on") {
        return NotificationKind::ScanState { scanning: true };
    }
    if payload.starts_with(b"Scan off") {
        return NotificationKind::ScanState { scanning: false };
    }

    let text = || decode_payload(payload).trim_matches(['\r', '\n']).to_string();
    if topic.starts_with("SaveFileName") {
        NotificationKind::SaveFileName { file_name: text() }
    } else if topic.starts_with("ScanLine") {
        NotificationKind::ScanLine { line: text() }
    } else if topic.starts_with("MicState") {
        NotificationKind::MicState { payload: text() }
    } else if topic.starts_with("SpectSave") {
        NotificationKind::SpectSave { payload: text() }
    } else if topic.starts_with("Command") {
        NotificationKind::CommandEcho {
            payload: payload.to_vec(),
        }
    } else {
        NotificationKind::Unknown {
            topic: topic.to_string(),
            payload: text(),
        }
    }
}

/// Receiver of instrument events other than command echoes.
///
/// Every method has a logging default, so implementors override only what
/// they care about.
pub trait NotificationHandler {
    fn scan_state_changed(&mut self, scanning: bool) {
        info!("Scan is {}", if scanning { "on" } else { "off" });
    }

    fn save_finished(&mut self, file_name: &str) {
        info!("SXM saved {file_name}");
    }

    fn scan_line(&mut self, _line: &str) {}

    fn mic_state(&mut self, payload: &str) {
        info!("MicState {payload}");
    }

    fn spectrum_saved(&mut self, payload: &str) {
        info!("SpectSave {payload}");
    }

    fn unknown(&mut self, topic: &str, payload: &str) {
        warn!("Unknown callback {topic}: {payload}");
    }

    /// Route a classified notification to the matching method
    fn dispatch(&mut self, notification: &Notification) {
        match &notification.kind {
            NotificationKind::ScanState { scanning } => self.scan_state_changed(*scanning),
            NotificationKind::SaveFileName { file_name } => self.save_finished(file_name),
            NotificationKind::ScanLine { line } => self.scan_line(line),
            NotificationKind::MicState { payload } => self.mic_state(payload),
            NotificationKind::SpectSave { payload } => self.spectrum_saved(payload),
            NotificationKind::Unknown { topic, payload } => self.unknown(topic, payload),
            NotificationKind::CommandEcho { .. } => {}
        }
    }
}

/// Logs every event
#[derive(Debug, Default)]
pub struct LogNotifications;

impl NotificationHandler for LogNotifications {}

/// Forwards every non-echo notification to a channel, e.g. so a UI can mark
/// parameter changes on a running capture.
impl NotificationHandler for crossbeam_channel::Sender<Notification> {
    fn dispatch(&mut self, notification: &Notification) {
        if matches!(notification.kind, NotificationKind::CommandEcho { .. }) {
            return;
        }
        if self.send(notification.clone()).is_err() {
            log::debug!("Notification receiver dropped");
        }
    }
}
