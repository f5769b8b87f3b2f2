use std::time::Duration;

use thiserror::Error;

/// Coarse classification of an [`SxmError`], used by callers to decide
/// between falling back, reporting, or propagating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Startup connection failures; recovered by switching to an offline stand-in
    Connection,
    /// Malformed input rejected before any I/O
    Validation,
    /// Rejected commands, timeouts and unusable replies
    Protocol,
    /// Single-sample glitches during acquisition
    Transient,
    /// Anything unanticipated
    Fatal,
}

#[derive(Error, Debug)]
pub enum SxmError {
    #[error("SXM driver unavailable at {path}: {source}")]
    DriverUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to register with DDEML (err={0:#x})")]
    RegistrationFailed(u32),
    #[error("Unable to establish a conversation with {service}|{topic} (err={code:#x})")]
    ConversationFailed {
        service: String,
        topic: String,
        code: u32,
    },
    #[error("Unable to start advise on '{topic}' (err={code:#x})")]
    AdvisoryFailed { topic: String, code: u32 },
    #[error("Not connected to the SXM program")]
    NotConnected,
    #[error("Command rejected by SXM (err={code:#x}): {command}")]
    CommandRejected { command: String, code: u32 },
    #[error("No reply from SXM within {0:?}")]
    TimedOut(Duration),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unknown channel '{name}'. Available channels: {}", available.join(", "))]
    UnknownChannel {
        name: String,
        available: Vec<String>,
    },
    #[error("A capture is already running")]
    CaptureInProgress,
    #[error("Acquisition failed: {0}")]
    AcquisitionFailed(String),
    #[error("SXM driver is offline")]
    DriverOffline,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("IO error ({context}): {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<std::io::Error> for SxmError {
    fn from(source: std::io::Error) -> Self {
        SxmError::Io {
            source,
            context: "unspecified".to_string(),
        }
    }
}

impl SxmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SxmError::DriverUnavailable { .. }
            | SxmError::RegistrationFailed(_)
            | SxmError::ConversationFailed { .. }
            | SxmError::AdvisoryFailed { .. } => ErrorClass::Connection,
            SxmError::InvalidArgument(_)
            | SxmError::UnknownChannel { .. }
            | SxmError::CaptureInProgress => ErrorClass::Validation,
            SxmError::NotConnected
            | SxmError::CommandRejected { .. }
            | SxmError::TimedOut(_)
            | SxmError::DriverOffline
            | SxmError::Protocol(_) => ErrorClass::Protocol,
            SxmError::Io { .. } => ErrorClass::Transient,
            SxmError::AcquisitionFailed(_) | SxmError::Config(_) | SxmError::Json(_) => {
                ErrorClass::Fatal
            }
        }
    }

    /// True for startup failures the facade recovers from by going offline.
    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Connection
    }
}
