use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{LevelFilter, error, info};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use sxm_remote::{AppConfig, Capture, CaptureRequest, InstrumentFacade, load_config_or_default};

/// SXM remote control
#[derive(Parser, Debug)]
#[command(name = "sxm-ctl")]
#[command(about = "Parameter access and channel capture for the SXM NC-AFM program", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report which backends are connected
    Status,
    /// List the channel table
    Channels,
    /// Write a scan-panel edit field, e.g. `scan-para Edit23 0.08`
    ScanPara {
        edit_code: String,
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },
    /// Write an NC-AFM controller parameter by index
    DncPara {
        index: i32,
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },
    /// Write a feedback parameter, e.g. `feed-para enable 0`
    FeedPara {
        name: String,
        #[arg(allow_negative_numbers = true)]
        value: i32,
    },
    /// Read a channel through SXM
    ReadChannel { index: i32 },
    /// Read the topography (channel 0) through SXM
    Topo,
    /// Read one scaled sample from the driver
    Read { name: String },
    /// Read one raw count from the driver
    ReadRaw {
        #[arg(allow_negative_numbers = true)]
        index: i32,
    },
    /// Write a physical value to an output channel
    WriteUnit {
        name: String,
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },
    /// Capture one or two channels; Ctrl+C stops early
    Capture {
        name: String,
        /// Second channel sampled in lockstep
        #[arg(long)]
        second: Option<String>,
        /// Samples per channel (default from config)
        #[arg(short = 'n', long)]
        samples: Option<usize>,
    },
}

#[derive(Serialize)]
struct TraceSummary {
    channel: String,
    unit: String,
    min: f64,
    max: f64,
    mean: f64,
}

#[derive(Serialize)]
struct CaptureSummary {
    started: DateTime<Utc>,
    samples: usize,
    achieved_rate_hz: f64,
    elapsed_s: f64,
    cancelled: bool,
    synthetic: bool,
    glitches: usize,
    traces: Vec<TraceSummary>,
}

impl From<&Capture> for CaptureSummary {
    fn from(capture: &Capture) -> Self {
        let traces = capture
            .channels
            .iter()
            .zip(&capture.traces)
            .map(|(channel, trace)| {
                let min = trace.iter().copied().fold(f64::INFINITY, f64::min);
                let max = trace.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let mean = if trace.is_empty() {
                    0.0
                } else {
                    trace.iter().sum::<f64>() / trace.len() as f64
                };
                TraceSummary {
                    channel: channel.name.clone(),
                    unit: channel.unit.clone(),
                    min,
                    max,
                    mean,
                }
            })
            .collect();
        Self {
            started: capture.started_wall,
            samples: capture.len(),
            achieved_rate_hz: capture.achieved_rate_hz,
            elapsed_s: capture.elapsed.as_secs_f64(),
            cancelled: capture.cancelled,
            synthetic: capture.synthetic,
            glitches: capture.glitches,
            traces,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config_or_default(args.config.as_deref());

    let log_level = args
        .log_level
        .clone()
        .unwrap_or(config.logging.log_level.clone());
    initialize_logging(&log_level)?;
    log_startup_info(&config, args.config.as_ref());

    let mut facade = InstrumentFacade::connect(&config)?;
    let result = run(&mut facade, &config, args.command);

    facade.shutdown();
    if let Err(e) = &result {
        error!("{e}");
    }
    result
}

fn run(
    facade: &mut InstrumentFacade,
    config: &AppConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Status => {
            facade.pump();
            println!(
                "DDE:    {}",
                if facade.commands_are_mock() {
                    "offline (mock)"
                } else {
                    "connected"
                }
            );
            println!(
                "Driver: {}",
                if facade.has_driver() {
                    "open"
                } else {
                    "unavailable"
                }
            );
            println!("Mode:   {}", if facade.is_offline() { "offline" } else { "online" });
        }
        Command::Channels => {
            for channel in facade.channels().iter() {
                println!(
                    "{:<12} {:>4} {:<6} {:<4} {:e}",
                    channel.name, channel.driver_index, channel.label, channel.unit, channel.scale
                );
            }
        }
        Command::ScanPara { edit_code, value } => facade.send_scan_para(&edit_code, value)?,
        Command::DncPara { index, value } => facade.send_dnc_para(index, value)?,
        Command::FeedPara { name, value } => facade.feed_para(&name, value)?,
        Command::ReadChannel { index } => print_reply(facade.read_channel(index)?),
        Command::Topo => print_reply(facade.read_topography()?),
        Command::Read { name } => {
            let unit = facade.channels().lookup(&name)?.unit.clone();
            println!("{} {unit}", facade.read_scaled(&name)?);
        }
        Command::ReadRaw { index } => println!("{}", facade.read_raw(index)?),
        Command::WriteUnit { name, value } => {
            let counts = facade.write_unit(&name, value)?;
            println!("sent {counts} counts");
        }
        Command::Capture {
            name,
            second,
            samples,
        } => {
            let samples = samples.unwrap_or(config.acquisition.default_samples);
            let request = match &second {
                Some(second) => CaptureRequest::dual(&name, second, samples),
                None => CaptureRequest::single(&name, samples),
            };
            let capture = capture_until_done(facade, &request)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&CaptureSummary::from(&capture))?
            );
        }
    }
    Ok(())
}

fn print_reply(value: Option<f64>) {
    match value {
        Some(value) => println!("{value}"),
        None => println!("no value in reply"),
    }
}

/// Run a capture, cancelling it on Ctrl+C
fn capture_until_done(
    facade: &mut InstrumentFacade,
    request: &CaptureRequest,
) -> Result<Capture, Box<dyn std::error::Error>> {
    let shutdown_flag = setup_shutdown_handler()?;
    let mut handle = facade.start_capture(request)?;
    let mut cancel_sent = false;

    loop {
        if let Some(result) = handle.try_result() {
            return Ok(result?);
        }
        if !cancel_sent && shutdown_flag.load(Ordering::SeqCst) {
            handle.cancel();
            cancel_sent = true;
        }
        // Keep advisories flowing while the worker samples
        facade.pump();
        thread::sleep(Duration::from_millis(20));
    }
}

/// Setup Ctrl+C handler for cooperative cancellation
fn setup_shutdown_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    ctrlc::set_handler(move || {
        info!("Ctrl+C received - stopping capture...");
        shutdown_flag_clone.store(true, Ordering::SeqCst);
    })?;

    Ok(shutdown_flag)
}

/// Log startup information
fn log_startup_info(config: &AppConfig, config_path: Option<&PathBuf>) {
    info!("=== SXM remote control ===");
    match config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: defaults"),
    }
    info!("DDE: {}|{}", config.dde.service, config.dde.topic);
    info!("Driver: {}", config.driver.device_path);
    if config.logging.journal {
        info!("Journal: {}", config.logging.journal_path);
    }
}

/// Initialize logging with configurable level
fn initialize_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .try_init()?;

    Ok(())
}
