//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// furnisync command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "furnisync", about = "Inventory and room sync demo")]
pub struct CliArgs {
    /// Our player name on the trade table.
    #[arg(long)]
    pub local_party: Option<String>,

    /// Minimum spacing between bulk requests, in milliseconds.
    #[arg(long)]
    pub request_spacing_ms: Option<u64>,

    /// Delay before the first inventory page request, in milliseconds.
    #[arg(long)]
    pub warmup_ms: Option<u64>,

    /// Where to save completed trades.
    #[arg(long)]
    pub trade_log: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Trace every outbound packet.
    #[arg(long)]
    pub log_packets: Option<bool>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref party) = args.local_party {
            self.trade.local_party = party.clone();
        }
        if let Some(spacing) = args.request_spacing_ms {
            self.bulk.request_spacing_ms = spacing;
        }
        if let Some(warmup) = args.warmup_ms {
            self.scan.warmup_ms = warmup;
        }
        if let Some(ref path) = args.trade_log {
            self.trade.log_file = Some(path.clone());
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(packets) = args.log_packets {
            self.debug.log_packets = packets;
        }
    }
}
