//! Configuration for furnisync.
//!
//! Settings persist to disk as a RON file and can be overridden from the
//! command line. Every section defaults independently, so files written by
//! older or newer versions still load.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{BulkSettings, Config, DebugSettings, ScanSettings, TradeSettings, default_config_dir};
pub use error::ConfigError;
