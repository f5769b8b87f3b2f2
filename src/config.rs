use crate::acquisition::DEFAULT_SIMULATED_RATE_HZ;
use crate::driver::DEVICE_PATH;
use crate::types::DecimalSeparator;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub dde: DdeConfig,
    pub driver: DriverConfig,
    pub acquisition: AcquisitionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DdeConfig {
    pub service: String,
    pub topic: String,
    pub transaction_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Separator SXM prints in numeric replies (`comma` on German installs)
    pub decimal_separator: DecimalSeparator,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DriverConfig {
    pub device_path: String,
    /// Per-installation channel table; the built-in table when unset
    pub channel_table: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Pacing of the synthetic signal when no driver is present
    pub simulated_rate_hz: f64,
    pub default_samples: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Record every parameter write in a JSONL journal
    pub journal: bool,
    pub journal_path: String,
    pub log_level: String,
}

impl Default for DdeConfig {
    fn default() -> Self {
        Self {
            service: "SXM".to_string(),
            topic: "Remote".to_string(),
            transaction_timeout_ms: 1000,
            reply_timeout_ms: 5000,
            poll_interval_ms: 1,
            decimal_separator: DecimalSeparator::Comma,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device_path: DEVICE_PATH.to_string(),
            channel_table: None,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            simulated_rate_hz: DEFAULT_SIMULATED_RATE_HZ,
            default_samples: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            journal: false,
            journal_path: "./logs/sxm-journal".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Load configuration from file with layered fallbacks
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else {
        let possible_paths = ["sxm-remote.toml", "config/sxm-remote.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
                break;
            }
        }
    }

    // Environment overrides, e.g. SXM_REMOTE__DDE__REPLY_TIMEOUT_MS=2000
    builder = builder.add_source(
        Environment::with_prefix("SXM_REMOTE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize::<AppConfig>()
}

/// Load configuration, logging and falling back to defaults on failure
pub fn load_config_or_default(config_path: Option<&Path>) -> AppConfig {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::warn!("Failed to load config ({}), using defaults", e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.dde.service, "SXM");
        assert_eq!(config.dde.topic, "Remote");
        assert_eq!(config.dde.reply_timeout_ms, 5000);
        assert_eq!(config.dde.decimal_separator, DecimalSeparator::Comma);
        assert_eq!(config.driver.device_path, r"\\.\SXM");
        assert!(config.driver.channel_table.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[dde]\nreply_timeout_ms = 250\ndecimal_separator = \"point\"\n\n[acquisition]\nsimulated_rate_hz = 500.0"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.dde.reply_timeout_ms, 250);
        assert_eq!(config.dde.decimal_separator, DecimalSeparator::Point);
        assert_eq!(config.dde.service, "SXM");
        assert_eq!(config.acquisition.simulated_rate_hz, 500.0);
        assert_eq!(config.acquisition.default_samples, 10_000);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let missing = Path::new("/definitely/not/here/sxm-remote.toml");
        assert!(load_config(Some(missing)).is_err());
        let config = load_config_or_default(Some(missing));
        assert_eq!(config.dde.transaction_timeout_ms, 1000);
    }
}
