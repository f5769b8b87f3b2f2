pub mod acquisition;
pub mod channels;
pub mod config;
pub mod dde;
pub mod driver;
pub mod error;
pub mod facade;
pub mod journal;
pub mod types;
pub mod utils;

pub use acquisition::{
    AcquisitionEngine, Capture, CaptureChannels, CaptureHandle, CaptureRequest, Marker,
};
pub use channels::ChannelTable;
pub use config::{AppConfig, load_config, load_config_or_default};
pub use dde::{
    ClientOptions, CommandClient, CommandProtocolClient, DdeEvent, DdeTransport,
    MockCommandClient, Notification, NotificationHandler, NotificationKind, WriteCache,
};
pub use driver::{DeviceControl, LoopbackDevice, RawChannelDriver, SharedDriver};
pub use error::{ErrorClass, SxmError};
pub use facade::InstrumentFacade;
pub use journal::{Journal, JournalEntry};
pub use types::{
    AcquisitionState, ChannelDescriptor, ConnectionState, DecimalSeparator, ParamKind,
};
