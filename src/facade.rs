//! Single entry point for the application layer
//!
//! [`InstrumentFacade`] composes the command client and the raw driver. Both
//! are connected at construction and fall back independently: without SXM
//! the command side runs on [`MockCommandClient`], without the kernel
//! driver raw access reports [`SxmError::DriverOffline`] and captures are
//! synthetic.

use crate::acquisition::{AcquisitionEngine, CaptureHandle, CaptureRequest};
use crate::channels::ChannelTable;
use crate::config::{AppConfig, DdeConfig};
use crate::dde::{CommandClient, MockCommandClient, WriteCache};
use crate::driver::{RawChannelDriver, SharedDriver};
use crate::error::SxmError;
use crate::journal::{Journal, JournalEntry};
use crate::types::{AcquisitionState, ParamKind};
use log::{error, info, warn};
use std::fmt::Display;
use std::sync::Arc;

/// Journal entries buffered before each append
const JOURNAL_BATCH: usize = 16;

/// Log the standard offline-mode notice for a component that failed to start
pub fn offline_warning(component: &str, cause: &dyn Display, substitute: &str) {
    warn!(
        "[OFFLINE MODE] {component} is not available. Cause: {cause} -> switching to {substitute} (no hardware connected)"
    );
}

pub struct InstrumentFacade {
    commands: Box<dyn CommandClient>,
    driver: Option<SharedDriver>,
    table: Arc<ChannelTable>,
    acquisition: AcquisitionEngine,
    journal: Option<Journal>,
}

impl InstrumentFacade {
    /// Connect both channels as configured, falling back independently.
    ///
    /// Only a broken channel table is an error; connection failures are
    /// logged and replaced by offline stand-ins.
    pub fn connect(config: &AppConfig) -> Result<Self, SxmError> {
        let table = Arc::new(ChannelTable::load(config.driver.channel_table.as_deref())?);

        let commands = connect_commands(&config.dde);
        let driver = match RawChannelDriver::open(&config.driver.device_path, table.clone()) {
            Ok(driver) => {
                info!("Opened SXM driver at {}", config.driver.device_path);
                Some(driver.into_shared())
            }
            Err(e) => {
                offline_warning("Microscope driver", &e, "synthetic acquisition");
                None
            }
        };

        let acquisition = AcquisitionEngine::new(driver.clone(), table.clone())
            .with_simulated_rate(config.acquisition.simulated_rate_hz);
        let journal = config
            .logging
            .journal
            .then(|| Journal::new(&config.logging.journal_path, JOURNAL_BATCH));

        let facade = Self {
            commands,
            driver,
            table,
            acquisition,
            journal,
        };
        if facade.is_offline() {
            warn!("Running in offline mode");
        }
        Ok(facade)
    }

    /// Assemble a facade from already constructed parts
    pub fn from_parts(
        commands: Box<dyn CommandClient>,
        driver: Option<SharedDriver>,
        table: Arc<ChannelTable>,
    ) -> Self {
        let acquisition = AcquisitionEngine::new(driver.clone(), table.clone());
        Self {
            commands,
            driver,
            table,
            acquisition,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// True when either side runs on its offline stand-in
    pub fn is_offline(&self) -> bool {
        self.commands.is_mock() || self.driver.is_none()
    }

    pub fn has_driver(&self) -> bool {
        self.driver.is_some()
    }

    pub fn commands_are_mock(&self) -> bool {
        self.commands.is_mock()
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.table
    }

    fn journal(&mut self, kind: ParamKind, code: &str, value: f64) {
        let mock = self.commands.is_mock();
        if let Some(journal) = &mut self.journal {
            if let Err(e) = journal.record(JournalEntry::new(kind, code, value, mock)) {
                error!("Journal unavailable: {e}");
            }
        }
    }

    pub fn send_scan_para(&mut self, edit_code: &str, value: f64) -> Result<(), SxmError> {
        self.commands.send_scan_para(edit_code, value)?;
        self.journal(ParamKind::Edit, edit_code, value);
        Ok(())
    }

    pub fn send_dnc_para(&mut self, index: i32, value: f64) -> Result<(), SxmError> {
        self.commands.send_dnc_para(index, value)?;
        self.journal(ParamKind::Dnc, &index.to_string(), value);
        Ok(())
    }

    pub fn feed_para(&mut self, name: &str, value: i32) -> Result<(), SxmError> {
        self.commands.feed_para(name, value)?;
        self.journal(ParamKind::Feed, name, f64::from(value));
        Ok(())
    }

    pub fn set_channel(&mut self, index: i32, value: f64) -> Result<(), SxmError> {
        self.commands.set_channel(index, value)?;
        self.journal(ParamKind::Channel, &index.to_string(), value);
        Ok(())
    }

    /// Read a channel through SXM; `Ok(None)` for an unusable reply
    pub fn read_channel(&mut self, index: i32) -> Result<Option<f64>, SxmError> {
        self.commands.get_channel(index)
    }

    pub fn read_topography(&mut self) -> Result<Option<f64>, SxmError> {
        self.commands.read_topography()
    }

    pub fn last_written(&self, kind: &str, code: &str) -> Option<f64> {
        self.commands.last_written(kind, code)
    }

    pub fn write_cache(&self) -> &WriteCache {
        self.commands.write_cache()
    }

    /// Deliver pending advisories from SXM
    pub fn pump(&mut self) -> bool {
        self.commands.pump()
    }

    fn driver(&self) -> Result<&SharedDriver, SxmError> {
        self.driver.as_ref().ok_or(SxmError::DriverOffline)
    }

    pub fn read_raw(&self, index: i32) -> Result<i32, SxmError> {
        self.driver()?.lock().read_raw(index)
    }

    pub fn read_scaled(&self, name: &str) -> Result<f64, SxmError> {
        self.driver()?.lock().read_scaled(name)
    }

    /// Write a physical value; returns the counts actually sent
    pub fn write_unit(&self, name: &str, value: f64) -> Result<i32, SxmError> {
        self.driver()?.lock().write_unit(name, value)
    }

    pub fn start_capture(&mut self, request: &CaptureRequest) -> Result<CaptureHandle, SxmError> {
        self.acquisition.start_capture(request)
    }

    pub fn cancel_capture(&self) {
        self.acquisition.cancel();
    }

    pub fn acquisition_state(&self) -> AcquisitionState {
        self.acquisition.state()
    }

    /// Close the DDE conversation and the driver, flushing the journal
    pub fn shutdown(&mut self) {
        self.acquisition.cancel();
        self.commands.disconnect();
        if let Some(driver) = &self.driver {
            if let Err(e) = driver.lock().close() {
                warn!("Closing SXM driver failed: {e}");
            }
        }
        if let Some(journal) = &mut self.journal {
            if let Err(e) = journal.flush() {
                error!("Journal flush on shutdown failed: {e}");
            }
        }
    }
}

#[cfg(windows)]
fn connect_commands(config: &DdeConfig) -> Box<dyn CommandClient> {
    use crate::dde::{ClientOptions, CommandProtocolClient, DdemlTransport};

    let mut client = CommandProtocolClient::new(DdemlTransport::new(), ClientOptions::from(config));
    match client.connect() {
        Ok(()) => Box::new(client),
        Err(e) => {
            offline_warning("DDE connection", &e, "MockCommandClient");
            Box::new(MockCommandClient::new())
        }
    }
}

#[cfg(not(windows))]
fn connect_commands(config: &DdeConfig) -> Box<dyn CommandClient> {
    offline_warning(
        &format!("DDE connection to {}|{}", config.service, config.topic),
        &"DDE is only available on Windows",
        "MockCommandClient",
    );
    Box::new(MockCommandClient::new())
}
