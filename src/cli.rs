// CLI definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "qmk-layer-bridge")]
#[command(author, version, about = "Relay QMK keyboard layer state to a desktop indicator")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file path (default: ~/.config/qmk-layer-bridge/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll the keyboard and publish layer changes
    Poll {
        /// Where layer changes go
        #[arg(value_enum, short, long, default_value = "auto")]
        mode: PollMode,
    },

    /// Run the session-side bridge (socket -> session bus)
    #[command(visible_alias = "serve")]
    Bridge,

    /// List VIA keyboards
    #[command(visible_alias = "ls")]
    List {
        /// List every HID interface, not only VIA-capable ones
        #[arg(short, long)]
        all: bool,
    },

    /// Read the current layer state once
    Layer,

    /// Query the indicator, then cycle it through every layer
    IndicatorTest,

    /// Serve a stand-in indicator on the session bus
    ServeIndicator,

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Default)]
pub enum PollMode {
    /// Bridge when running as root, direct otherwise
    #[default]
    Auto,
    /// Send through the Unix-socket bridge
    Bridge,
    /// Call the indicator on the session bus directly
    Direct,
}

impl PollMode {
    /// Resolve `Auto` for a process with effective uid `euid`
    pub fn resolve(self, euid: u32) -> PollMode {
        match self {
            PollMode::Auto if euid == 0 => PollMode::Bridge,
            PollMode::Auto => PollMode::Direct,
            mode => mode,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PollMode::Auto => "auto",
            PollMode::Bridge => "bridge",
            PollMode::Direct => "direct",
        }
    }
}
