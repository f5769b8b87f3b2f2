use serde::{Deserialize, Serialize};
use std::fmt;

/// One entry of the channel calibration table.
///
/// `driver_index` is signed: negative indices address outputs (DACs),
/// zero and positive indices address inputs (ADCs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub name: String,
    pub driver_index: i32,
    /// Short hardware label, e.g. `DAC0` or `ADC12`
    #[serde(default)]
    pub label: String,
    pub unit: String,
    pub scale: f64,
}

impl ChannelDescriptor {
    pub fn is_output(&self) -> bool {
        self.driver_index < 0
    }

    /// Physical value of a raw driver count
    pub fn to_physical(&self, raw: i32) -> f64 {
        f64::from(raw) * self.scale
    }

    /// Nearest driver count for a physical value
    pub fn to_counts(&self, value: f64) -> i32 {
        // `as` saturates on overflow, so out-of-range requests clamp to i32 bounds
        (value / self.scale).round() as i32
    }
}

/// Parameter families tracked by the last-written cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamKind {
    /// `ScanPara('EditNN', v)`
    Edit,
    /// `DNCPara(i, v)`
    Dnc,
    /// `FeedPara('name', i)`
    Feed,
    /// `SetChannel(i, v)`
    Channel,
}

impl ParamKind {
    pub fn tag(self) -> &'static str {
        match self {
            ParamKind::Edit => "EDIT",
            ParamKind::Dnc => "DNC",
            ParamKind::Feed => "FEED",
            ParamKind::Channel => "CHANNEL",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Decimal separator the SXM installation prints in numeric replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimalSeparator {
    /// German-locale installations print `12,5`
    #[default]
    Comma,
    Point,
}

/// Lifecycle of the DDE conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last synchronous request expired; the conversation is still usable
    TimedOut,
}

impl ConnectionState {
    pub fn accepts_commands(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::TimedOut)
    }
}

/// Lifecycle of the acquisition engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Running,
    Completed,
    Cancelled,
    /// The driver went away mid-run; no capture was produced
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo() -> ChannelDescriptor {
        ChannelDescriptor {
            name: "Topo".to_string(),
            driver_index: 0,
            label: "DAC0".to_string(),
            unit: "nm".to_string(),
            scale: -2.60914e-07,
        }
    }

    #[test]
    fn test_scaling_rounds_to_nearest_count() {
        let ch = topo();
        let counts = ch.to_counts(-0.00026091);
        assert_eq!(counts, 1000);
        assert!((ch.to_physical(counts) - (-0.00026091)).abs() <= ch.scale.abs() / 2.0);
    }

    #[test]
    fn test_output_channels_are_negative() {
        let mut ch = topo();
        assert!(!ch.is_output());
        ch.driver_index = -1;
        assert!(ch.is_output());
    }

    #[test]
    fn test_param_kind_tags() {
        assert_eq!(ParamKind::Edit.to_string(), "EDIT");
        assert_eq!(ParamKind::Dnc.tag(), "DNC");
        assert!(ConnectionState::TimedOut.accepts_commands());
        assert!(!ConnectionState::Disconnected.accepts_commands());
    }
}
