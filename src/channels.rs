//! Channel calibration table
//!
//! Maps symbolic channel names to driver index, unit and scale factor. The
//! table is calibration data, not logic: the default ships as
//! `config/channels.toml` and a per-installation file can replace it.

use crate::error::SxmError;
use crate::types::ChannelDescriptor;
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const BUILTIN_TABLE: &str = include_str!("../config/channels.toml");

#[derive(Debug, Deserialize)]
struct ChannelTableFile {
    channels: Vec<ChannelDescriptor>,
}

/// Immutable name → descriptor table, in file order.
#[derive(Debug, Clone)]
pub struct ChannelTable {
    channels: Vec<ChannelDescriptor>,
    by_name: HashMap<String, usize>,
}

impl ChannelTable {
    /// Table compiled into the binary from `config/channels.toml`
    pub fn builtin() -> Result<Self, SxmError> {
        Self::from_toml_str(BUILTIN_TABLE)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SxmError> {
        let file: ChannelTableFile = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Self::new(file.channels)
    }

    pub fn from_file(path: &Path) -> Result<Self, SxmError> {
        if !path.exists() {
            return Err(SxmError::Io {
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
                context: format!("Channel table not found: {}", path.display()),
            });
        }
        let file: ChannelTableFile = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        log::info!(
            "Loaded {} channels from {}",
            file.channels.len(),
            path.display()
        );
        Self::new(file.channels)
    }

    /// Installation file if given, otherwise the builtin table
    pub fn load(path: Option<&Path>) -> Result<Self, SxmError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::builtin(),
        }
    }

    pub fn new(channels: Vec<ChannelDescriptor>) -> Result<Self, SxmError> {
        let mut by_name = HashMap::with_capacity(channels.len());
        for (i, ch) in channels.iter().enumerate() {
            if !ch.scale.is_finite() || ch.scale == 0.0 {
                return Err(SxmError::InvalidArgument(format!(
                    "channel '{}' has unusable scale {}",
                    ch.name, ch.scale
                )));
            }
            if by_name.insert(ch.name.clone(), i).is_some() {
                return Err(SxmError::InvalidArgument(format!(
                    "duplicate channel '{}' in table",
                    ch.name
                )));
            }
        }
        Ok(Self { channels, by_name })
    }

    /// Look up a channel by exact name, falling back to a unique
    /// case-insensitive match.
    pub fn lookup(&self, name: &str) -> Result<&ChannelDescriptor, SxmError> {
        if let Some(&i) = self.by_name.get(name) {
            return Ok(&self.channels[i]);
        }

        let mut folded = self
            .channels
            .iter()
            .filter(|ch| ch.name.eq_ignore_ascii_case(name));
        match (folded.next(), folded.next()) {
            (Some(ch), None) => Ok(ch),
            _ => Err(SxmError::UnknownChannel {
                name: name.to_string(),
                available: self.names(),
            }),
        }
    }

    pub fn by_index(&self, driver_index: i32) -> Option<&ChannelDescriptor> {
        self.channels.iter().find(|ch| ch.driver_index == driver_index)
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|ch| ch.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_parses() {
        let table = ChannelTable::builtin().unwrap();
        assert_eq!(table.len(), 34);

        let topo = table.lookup("Topo").unwrap();
        assert_eq!(topo.driver_index, 0);
        assert_eq!(topo.unit, "nm");
        assert_eq!(topo.scale, -2.60914e-07);

        let df = table.lookup("df").unwrap();
        assert_eq!(df.driver_index, -40);
        assert_eq!(df.label, "DAC40");

        assert_eq!(table.lookup("Zeit").unwrap().unit, "s");
        assert_eq!(table.by_index(47).unwrap().name, "minmax");
    }

    #[test]
    fn test_unknown_channel_reports_all_names() {
        let table = ChannelTable::builtin().unwrap();
        match table.lookup("Zsensor") {
            Err(SxmError::UnknownChannel { name, available }) => {
                assert_eq!(name, "Zsensor");
                assert_eq!(available.len(), table.len());
                assert!(available.contains(&"QPlusAmpl".to_string()));
            }
            other => panic!("expected UnknownChannel, got {other:?}"),
        }
    }

    #[test]
    fn test_case_insensitive_fallback() {
        let table = ChannelTable::builtin().unwrap();
        assert_eq!(table.lookup("qplusampl").unwrap().name, "QPlusAmpl");
        assert_eq!(table.lookup("TOPO").unwrap().name, "Topo");
    }

    #[test]
    fn test_rejects_duplicate_and_zero_scale() {
        let dup = r#"
            [[channels]]
            name = "A"
            driver_index = 1
            unit = "V"
            scale = 1.0

            [[channels]]
            name = "A"
            driver_index = 2
            unit = "V"
            scale = 1.0
        "#;
        assert!(matches!(
            ChannelTable::from_toml_str(dup),
            Err(SxmError::InvalidArgument(_))
        ));

        let zero = r#"
            [[channels]]
            name = "B"
            driver_index = 1
            unit = "V"
            scale = 0.0
        "#;
        assert!(matches!(
            ChannelTable::from_toml_str(zero),
            Err(SxmError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_installation_file_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.toml");
        std::fs::write(
            &path,
            "[[channels]]\nname = \"Topo\"\ndriver_index = 0\nunit = \"nm\"\nscale = -3.0e-07\n",
        )
        .unwrap();

        let table = ChannelTable::load(Some(&path)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("Topo").unwrap().scale, -3.0e-07);

        assert!(ChannelTable::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
