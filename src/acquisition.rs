//! Background capture of raw channels
//!
//! An [`AcquisitionEngine`] samples one channel, or two in lockstep, on a
//! dedicated worker thread as fast as the driver allows. The caller gets a
//! [`CaptureHandle`] for cooperative cancellation, progress and event
//! markers, and collects the finished [`Capture`] from it.
//!
//! Without a driver the engine produces a deterministic synthetic signal at
//! a fixed rate so the rest of the application stays usable offline.

use crate::channels::ChannelTable;
use crate::driver::SharedDriver;
use crate::error::SxmError;
use crate::types::{AcquisitionState, ChannelDescriptor};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{error, info, trace, warn};
use parking_lot::Mutex;
use std::f64::consts::{FRAC_PI_2, TAU};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default pacing of the synthetic signal
pub const DEFAULT_SIMULATED_RATE_HZ: f64 = 1000.0;

const SYNTH_FREQUENCY_HZ: f64 = 5.0;
const SYNTH_AMPLITUDE: f64 = 1.0;
const SYNTH_DRIFT_PER_S: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureChannels {
    Single(String),
    /// Two channels read back to back for every sample index
    Dual(String, String),
}

impl CaptureChannels {
    pub fn names(&self) -> Vec<&str> {
        match self {
            CaptureChannels::Single(a) => vec![a.as_str()],
            CaptureChannels::Dual(a, b) => vec![a.as_str(), b.as_str()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub channels: CaptureChannels,
    pub sample_count: usize,
}

impl CaptureRequest {
    pub fn single(name: &str, sample_count: usize) -> Self {
        Self {
            channels: CaptureChannels::Single(name.to_string()),
            sample_count,
        }
    }

    pub fn dual(first: &str, second: &str, sample_count: usize) -> Self {
        Self {
            channels: CaptureChannels::Dual(first.to_string(), second.to_string()),
            sample_count,
        }
    }
}

/// A labelled sample index, e.g. the moment a parameter was changed
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub label: String,
    pub sample_index: usize,
    pub at: Instant,
}

/// Result of one capture run.
///
/// Traces are in physical units and all have the same length; on
/// cancellation they hold exactly the samples collected. The time base is
/// uniform: sample `i` sits at `i / achieved_rate_hz` seconds.
#[derive(Debug, Clone)]
pub struct Capture {
    pub channels: Vec<ChannelDescriptor>,
    pub traces: Vec<Vec<f64>>,
    pub achieved_rate_hz: f64,
    pub elapsed: Duration,
    pub cancelled: bool,
    /// Reads that failed and were replaced by the previous value
    pub glitches: usize,
    /// True when produced without a driver
    pub synthetic: bool,
    pub markers: Vec<Marker>,
    pub started_at: Instant,
    pub started_wall: DateTime<Utc>,
}

impl Capture {
    /// Samples per channel
    pub fn len(&self) -> usize {
        self.traces.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn trace(&self, channel: usize) -> Option<&[f64]> {
        self.traces.get(channel).map(Vec::as_slice)
    }

    /// Seconds since the start of the run for every sample
    pub fn time_axis(&self) -> Vec<f64> {
        if self.achieved_rate_hz <= 0.0 {
            return vec![0.0; self.len()];
        }
        (0..self.len())
            .map(|i| i as f64 / self.achieved_rate_hz)
            .collect()
    }

    /// Map a moment (e.g. a notification's arrival) to the nearest earlier
    /// sample index. `None` before the run started or for an empty capture.
    pub fn sample_index_at(&self, at: Instant) -> Option<usize> {
        if self.is_empty() || at < self.started_at {
            return None;
        }
        let offset = at.duration_since(self.started_at).as_secs_f64();
        let index = (offset * self.achieved_rate_hz).floor() as usize;
        Some(index.min(self.len() - 1))
    }
}

#[derive(Debug, Default)]
struct MarkerLog {
    markers: Vec<Marker>,
    closed: bool,
}

enum SampleSource {
    Driver(SharedDriver),
    Synthetic { rate_hz: f64 },
}

/// A running (or finished) capture
pub struct CaptureHandle {
    cancel: Arc<AtomicBool>,
    progress: Arc<AtomicUsize>,
    markers: Arc<Mutex<MarkerLog>>,
    sample_count: usize,
    result_rx: Receiver<Result<Capture, SxmError>>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Ask the worker to stop after the current sample
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Shared cancel flag, e.g. for a Ctrl+C handler
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Samples collected so far
    pub fn progress(&self) -> usize {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Tag the current sample index. Returns `None` once the run has ended.
    pub fn mark(&self, label: &str) -> Option<usize> {
        let mut log = self.markers.lock();
        if log.closed {
            return None;
        }
        let sample_index = self.progress();
        log.markers.push(Marker {
            label: label.to_string(),
            sample_index,
            at: Instant::now(),
        });
        Some(sample_index)
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Non-blocking poll for the result, e.g. from a UI timer
    pub fn try_result(&mut self) -> Option<Result<Capture, SxmError>> {
        let result = self.result_rx.try_recv().ok()?;
        self.join();
        Some(result)
    }

    /// Block until the run completes, is cancelled or fails
    pub fn wait(mut self) -> Result<Capture, SxmError> {
        let result = self.result_rx.recv().map_err(|_| {
            SxmError::AcquisitionFailed("worker stopped without a result".to_string())
        });
        self.join();
        result?
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Acquisition worker panicked");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel();
            self.join();
        }
    }
}

/// Runs captures on a worker thread, one at a time
pub struct AcquisitionEngine {
    driver: Option<SharedDriver>,
    table: Arc<ChannelTable>,
    simulated_rate_hz: f64,
    state: Arc<Mutex<AcquisitionState>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl AcquisitionEngine {
    /// # Arguments
    /// * `driver` - Shared raw driver, or `None` to capture a synthetic signal
    /// * `table` - Channel table used to resolve capture channel names
    pub fn new(driver: Option<SharedDriver>, table: Arc<ChannelTable>) -> Self {
        Self {
            driver,
            table,
            simulated_rate_hz: DEFAULT_SIMULATED_RATE_HZ,
            state: Arc::new(Mutex::new(AcquisitionState::Idle)),
            cancel: None,
        }
    }

    pub fn with_simulated_rate(mut self, rate_hz: f64) -> Self {
        self.simulated_rate_hz = rate_hz;
        self
    }

    pub fn state(&self) -> AcquisitionState {
        *self.state.lock()
    }

    pub fn is_synthetic(&self) -> bool {
        self.driver.is_none()
    }

    /// Start a capture on a fresh worker thread.
    ///
    /// Channel names are resolved before anything starts, so an unknown
    /// name fails with [`SxmError::UnknownChannel`] and leaves the engine
    /// untouched.
    pub fn start_capture(&mut self, request: &CaptureRequest) -> Result<CaptureHandle, SxmError> {
        if self.state() == AcquisitionState::Running {
            return Err(SxmError::CaptureInProgress);
        }
        if request.sample_count == 0 {
            return Err(SxmError::InvalidArgument(
                "sample count must be at least 1".to_string(),
            ));
        }
        let channels = request
            .channels
            .names()
            .into_iter()
            .map(|name| self.table.lookup(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        let source = match &self.driver {
            Some(driver) if !driver.lock().is_open() => return Err(SxmError::DriverOffline),
            Some(driver) => SampleSource::Driver(driver.clone()),
            None => {
                let rate_hz = self.simulated_rate_hz;
                if !(rate_hz.is_finite() && rate_hz > 0.0) {
                    return Err(SxmError::InvalidArgument(format!(
                        "simulated rate must be positive, got {rate_hz}"
                    )));
                }
                info!("No driver available: capturing a synthetic signal at {rate_hz} Hz");
                SampleSource::Synthetic { rate_hz }
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(AtomicUsize::new(0));
        let markers = Arc::new(Mutex::new(MarkerLog::default()));
        let (result_tx, result_rx) = bounded(1);

        let run = CaptureRun {
            channels,
            sample_count: request.sample_count,
            source,
            cancel: cancel.clone(),
            progress: progress.clone(),
            markers: markers.clone(),
            state: self.state.clone(),
        };

        *self.state.lock() = AcquisitionState::Running;
        let worker = thread::Builder::new()
            .name("sxm-acquisition".to_string())
            .spawn(move || run.execute(result_tx))
            .map_err(|source| {
                *self.state.lock() = AcquisitionState::Idle;
                SxmError::Io {
                    source,
                    context: "spawning acquisition worker".to_string(),
                }
            })?;

        self.cancel = Some(cancel.clone());
        Ok(CaptureHandle {
            cancel,
            progress,
            markers,
            sample_count: request.sample_count,
            result_rx,
            worker: Some(worker),
        })
    }

    /// Cancel the running capture. No-op when nothing is running.
    pub fn cancel(&self) {
        if self.state() != AcquisitionState::Running {
            return;
        }
        if let Some(cancel) = &self.cancel {
            cancel.store(true, Ordering::Relaxed);
        }
    }
}

/// Everything the worker thread owns
struct CaptureRun {
    channels: Vec<ChannelDescriptor>,
    sample_count: usize,
    source: SampleSource,
    cancel: Arc<AtomicBool>,
    progress: Arc<AtomicUsize>,
    markers: Arc<Mutex<MarkerLog>>,
    state: Arc<Mutex<AcquisitionState>>,
}

impl CaptureRun {
    fn execute(self, result_tx: Sender<Result<Capture, SxmError>>) {
        let names: Vec<&str> = self.channels.iter().map(|c| c.name.as_str()).collect();
        info!(
            "Capture started: {} x {} samples",
            names.join(" + "),
            self.sample_count
        );

        let started_at = Instant::now();
        let started_wall = Utc::now();
        let mut traces: Vec<Vec<f64>> = self
            .channels
            .iter()
            .map(|_| Vec::with_capacity(self.sample_count))
            .collect();
        let mut held = vec![0.0; self.channels.len()];
        let mut glitches = 0;
        let mut failure = None;

        'sampling: for index in 0..self.sample_count {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            match &self.source {
                SampleSource::Driver(driver) => {
                    // One lock per sample keeps dual channels in lockstep
                    let mut driver = driver.lock();
                    for (slot, channel) in self.channels.iter().enumerate() {
                        match driver.read_raw(channel.driver_index) {
                            Ok(raw) => held[slot] = channel.to_physical(raw),
                            Err(SxmError::DriverOffline) => {
                                failure = Some(SxmError::DriverOffline);
                                break 'sampling;
                            }
                            Err(e) => {
                                glitches += 1;
                                trace!("Sample {index} of {}: {e}", channel.name);
                            }
                        }
                    }
                }
                SampleSource::Synthetic { rate_hz } => {
                    let due = started_at + Duration::from_secs_f64(index as f64 / rate_hz);
                    let now = Instant::now();
                    if due > now {
                        thread::sleep(due - now);
                    }
                    for (slot, value) in held.iter_mut().enumerate() {
                        *value = synthetic_sample(slot, index, *rate_hz);
                    }
                }
            }
            for (trace, value) in traces.iter_mut().zip(&held) {
                trace.push(*value);
            }
            self.progress.store(index + 1, Ordering::Relaxed);
        }

        let elapsed = started_at.elapsed();
        let collected = traces.first().map_or(0, Vec::len);

        if let Some(e) = failure {
            self.markers.lock().closed = true;
            error!("Capture aborted after {collected} samples: {e}");
            *self.state.lock() = AcquisitionState::Failed;
            if result_tx.send(Err(e)).is_err() {
                trace!("Capture result dropped by caller");
            }
            return;
        }

        let cancelled = collected < self.sample_count;
        let achieved_rate_hz = if collected > 0 && !elapsed.is_zero() {
            collected as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let markers = {
            let mut log = self.markers.lock();
            log.closed = true;
            std::mem::take(&mut log.markers)
        };

        if glitches > 0 {
            warn!("Capture replaced {glitches} failed reads with the previous value");
        }
        info!(
            "Capture {}: {collected} samples in {:.3} s ({achieved_rate_hz:.1} Hz)",
            if cancelled { "cancelled" } else { "completed" },
            elapsed.as_secs_f64()
        );

        let capture = Capture {
            channels: self.channels,
            traces,
            achieved_rate_hz,
            elapsed,
            cancelled,
            glitches,
            synthetic: matches!(self.source, SampleSource::Synthetic { .. }),
            markers,
            started_at,
            started_wall,
        };

        *self.state.lock() = if cancelled {
            AcquisitionState::Cancelled
        } else {
            AcquisitionState::Completed
        };
        if result_tx.send(Ok(capture)).is_err() {
            trace!("Capture result dropped by caller");
        }
    }
}

/// Sine plus slow drift, phase shifted per channel
fn synthetic_sample(channel: usize, index: usize, rate_hz: f64) -> f64 {
    let t = index as f64 / rate_hz;
    let phase = channel as f64 * FRAC_PI_2;
    SYNTH_AMPLITUDE * (TAU * SYNTH_FREQUENCY_HZ * t + phase).sin() + SYNTH_DRIFT_PER_S * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DeviceControl, LoopbackDevice, RawChannelDriver};
    use std::io;

    fn table() -> Arc<ChannelTable> {
        Arc::new(ChannelTable::builtin().unwrap())
    }

    fn engine_with(device: impl DeviceControl + 'static) -> AcquisitionEngine {
        let table = table();
        let driver = RawChannelDriver::with_device(Box::new(device), table.clone()).into_shared();
        AcquisitionEngine::new(Some(driver), table)
    }

    fn wait_for_progress(handle: &CaptureHandle, samples: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.progress() < samples && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Fails every third request
    struct FlakyDevice {
        calls: usize,
        inner: LoopbackDevice,
    }

    impl DeviceControl for FlakyDevice {
        fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls % 3 == 0 {
                return Err(io::Error::other("glitch"));
            }
            self.inner.control(code, input, output)
        }

        fn close(&mut self) -> io::Result<()> {
            self.inner.close()
        }
    }

    #[test]
    fn test_dual_capture_reads_both_channels() {
        let device = LoopbackDevice::new()
            .with_register(0, 1000)
            .with_register(-40, 10);
        let mut engine = engine_with(device);

        let capture = engine
            .start_capture(&CaptureRequest::dual("Topo", "df", 50))
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(engine.state(), AcquisitionState::Completed);
        assert!(!capture.cancelled);
        assert!(!capture.synthetic);
        assert_eq!(capture.len(), 50);
        assert_eq!(capture.traces.len(), 2);
        assert!(capture.trace(0).unwrap().iter().all(|v| (v - (-0.000260914)).abs() < 1e-9));
        assert!(capture.trace(1).unwrap().iter().all(|v| (v - 0.0232838).abs() < 1e-12));
        assert!(capture.achieved_rate_hz > 0.0);
    }

    #[test]
    fn test_failed_reads_hold_previous_value() {
        let device = FlakyDevice {
            calls: 0,
            inner: LoopbackDevice::new().with_register(0, 1000),
        };
        let mut engine = engine_with(device);

        let capture = engine
            .start_capture(&CaptureRequest::single("Topo", 30))
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(capture.len(), 30);
        assert_eq!(capture.glitches, 10);
        assert!(capture.traces[0].iter().all(|v| (v - (-0.000260914)).abs() < 1e-9));
    }

    #[test]
    fn test_closed_driver_is_refused() {
        let table = table();
        let driver = RawChannelDriver::with_device(Box::new(LoopbackDevice::new()), table.clone())
            .into_shared();
        driver.lock().close().unwrap();
        let mut engine = AcquisitionEngine::new(Some(driver), table);

        let err = engine
            .start_capture(&CaptureRequest::single("Topo", 100))
            .err()
            .unwrap();
        assert!(matches!(err, SxmError::DriverOffline));
        assert_eq!(engine.state(), AcquisitionState::Idle);
    }

    #[test]
    fn test_driver_closed_mid_run_fails_the_capture() {
        let table = table();
        let driver = RawChannelDriver::with_device(
            Box::new(LoopbackDevice::new().with_register(0, 1000)),
            table.clone(),
        )
        .into_shared();
        let mut engine = AcquisitionEngine::new(Some(driver.clone()), table);

        let handle = engine
            .start_capture(&CaptureRequest::single("Topo", 1_000_000))
            .unwrap();
        wait_for_progress(&handle, 10);
        driver.lock().close().unwrap();

        assert!(matches!(handle.wait(), Err(SxmError::DriverOffline)));
        assert_eq!(engine.state(), AcquisitionState::Failed);
    }

    #[test]
    fn test_cancel_truncates_output() {
        let mut engine = AcquisitionEngine::new(None, table()).with_simulated_rate(2000.0);
        let handle = engine
            .start_capture(&CaptureRequest::dual("Topo", "Bias", 1_000_000))
            .unwrap();
        wait_for_progress(&handle, 20);
        handle.cancel();
        let capture = handle.wait().unwrap();

        assert!(capture.cancelled);
        assert!(capture.synthetic);
        let k = capture.len();
        assert!(k >= 20 && k < 1_000_000, "collected {k}");
        assert_eq!(capture.traces[1].len(), k);
        let expected = k as f64 / capture.elapsed.as_secs_f64();
        assert!((capture.achieved_rate_hz - expected).abs() <= 1e-9 * expected);
        assert_eq!(engine.state(), AcquisitionState::Cancelled);
    }

    #[test]
    fn test_engine_cancel_and_single_run() {
        let mut engine = AcquisitionEngine::new(None, table());
        engine.cancel();
        assert_eq!(engine.state(), AcquisitionState::Idle);

        let handle = engine
            .start_capture(&CaptureRequest::single("Topo", 1_000_000))
            .unwrap();
        assert!(matches!(
            engine.start_capture(&CaptureRequest::single("Bias", 10)),
            Err(SxmError::CaptureInProgress)
        ));

        engine.cancel();
        let capture = handle.wait().unwrap();
        assert!(capture.cancelled);

        // A finished engine accepts a new run
        let again = engine
            .start_capture(&CaptureRequest::single("Bias", 5))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(again.len(), 5);
    }

    #[test]
    fn test_unknown_channel_is_rejected_up_front() {
        let mut engine = AcquisitionEngine::new(None, table());
        let err = engine
            .start_capture(&CaptureRequest::dual("Topo", "Nope", 10))
            .err()
            .unwrap();
        assert!(matches!(err, SxmError::UnknownChannel { .. }));
        assert_eq!(engine.state(), AcquisitionState::Idle);
        assert!(engine.start_capture(&CaptureRequest::single("Topo", 0)).is_err());
    }

    #[test]
    fn test_synthetic_signal_is_deterministic() {
        let mut engine = AcquisitionEngine::new(None, table()).with_simulated_rate(5000.0);
        let request = CaptureRequest::dual("Topo", "Bias", 25);
        let a = engine.start_capture(&request).unwrap().wait().unwrap();
        let b = engine.start_capture(&request).unwrap().wait().unwrap();
        assert_eq!(a.traces, b.traces);
        assert_eq!(a.traces[0][0], 0.0);
        assert!((a.traces[1][0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_markers_and_time_base() {
        let mut engine = AcquisitionEngine::new(None, table()).with_simulated_rate(1000.0);
        let mut handle = engine
            .start_capture(&CaptureRequest::single("Topo", 100))
            .unwrap();
        let marked = handle.mark("step applied").unwrap();
        assert!(marked <= 100);

        let capture = loop {
            if let Some(result) = handle.try_result() {
                break result.unwrap();
            }
            thread::sleep(Duration::from_millis(2));
        };
        assert!(handle.mark("too late").is_none());
        assert!(handle.is_finished());

        assert_eq!(capture.markers.len(), 1);
        assert_eq!(capture.markers[0].label, "step applied");
        assert_eq!(capture.markers[0].sample_index, marked);
        assert_eq!(capture.sample_index_at(capture.started_at), Some(0));
        assert_eq!(
            capture.sample_index_at(capture.started_at + Duration::from_secs(3600)),
            Some(99)
        );

        let axis = capture.time_axis();
        assert_eq!(axis.len(), 100);
        assert!((axis[1] - 1.0 / capture.achieved_rate_hz).abs() < 1e-12);
    }
}
