use super::cache::WriteCache;
use super::script::Statement;
use super::CommandClient;
use crate::error::SxmError;
use crate::types::ParamKind;
use log::info;

/// Drift added to the simulated topography on every read of channel 0
const DRIFT_PER_READ: f64 = 0.001;

/// Offline stand-in for [`super::CommandProtocolClient`].
///
/// Validates exactly like the live client, logs each accepted command with
/// a running number and records it in the write cache. Reads return a slowly
/// drifting topography on channel 0 and zero elsewhere.
#[derive(Debug, Default)]
pub struct MockCommandClient {
    command_count: usize,
    sim_base: f64,
    cache: WriteCache,
}

impl MockCommandClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands accepted so far
    pub fn command_count(&self) -> usize {
        self.command_count
    }

    fn log(&mut self, statement: &Statement, note: Option<&str>) {
        self.command_count += 1;
        match note {
            Some(note) => info!("[MOCK] #{:03} {statement} // {note}", self.command_count),
            None => info!("[MOCK] #{:03} {statement}", self.command_count),
        }
    }
}

fn dnc_description(index: i32) -> String {
    match index {
        3 => "Used Frequency (f0)".to_string(),
        4 => "Drive amplitude".to_string(),
        _ => format!("DNC parameter {index}"),
    }
}

impl CommandClient for MockCommandClient {
    fn send_scan_para(&mut self, edit_code: &str, value: f64) -> Result<(), SxmError> {
        let statement = Statement::scan_para(edit_code, value)?;
        self.log(&statement, None);
        self.cache.remember(ParamKind::Edit, edit_code, value);
        Ok(())
    }

    fn send_dnc_para(&mut self, index: i32, value: f64) -> Result<(), SxmError> {
        let statement = Statement::dnc_para(index, value)?;
        self.log(&statement, Some(&dnc_description(index)));
        self.cache.remember(ParamKind::Dnc, &index.to_string(), value);
        Ok(())
    }

    fn feed_para(&mut self, name: &str, value: i32) -> Result<(), SxmError> {
        let statement = Statement::feed_para(name, value)?;
        self.log(&statement, None);
        self.cache.remember(ParamKind::Feed, name, f64::from(value));
        Ok(())
    }

    fn set_channel(&mut self, index: i32, value: f64) -> Result<(), SxmError> {
        let statement = Statement::set_channel(index, value)?;
        self.log(&statement, None);
        self.cache.remember(ParamKind::Channel, &index.to_string(), value);
        Ok(())
    }

    fn get_channel(&mut self, index: i32) -> Result<Option<f64>, SxmError> {
        if index != 0 {
            return Ok(Some(0.0));
        }
        self.sim_base += DRIFT_PER_READ;
        Ok(Some(self.sim_base))
    }

    fn write_cache(&self) -> &WriteCache {
        &self.cache
    }

    fn is_mock(&self) -> bool {
        true
    }
}
