// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "giftlink")]
#[command(author, version, about = "Drive LEDs, servos and microcontrollers from live-stream gifts")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: <config dir>/giftlink/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    // === Serial ===
    /// List serial ports
    #[command(visible_aliases = ["list", "ls"])]
    Ports,

    /// Open a port and verify the board answers the handshake
    Probe {
        /// Serial port (e.g. /dev/ttyACM0, COM3)
        port: String,

        /// Baud rate (default from config)
        #[arg(short, long)]
        baud: Option<u32>,
    },

    /// Send one protocol line (e.g. "LED:COLOR:#ff0000:50:3000") and print the reply
    #[command(visible_aliases = ["raw"])]
    Send {
        port: String,

        command: String,

        #[arg(short, long)]
        baud: Option<u32>,
    },

    // === Engine ===
    /// Show the gift catalog and each gift's default action
    #[command(visible_aliases = ["catalog"])]
    Gifts,

    /// Dispatch a single gift through the configured devices
    #[command(visible_aliases = ["sim", "test-gift"])]
    Simulate {
        /// Gift type (ROSE, HEART, STAR, CROWN, DIAMOND, ROCKET, UNICORN)
        gift: String,

        #[arg(short, long, default_value = "tester")]
        sender: String,
    },

    /// Run the engine; gifts are read from stdin as JSON lines
    /// ({"type":"ROSE","sender":"alice"}), notifications written to stdout
    #[command(visible_aliases = ["serve"])]
    Run,

    /// Exercise the LED strip, servo, sound and camera once and heartbeat
    /// auto-connected boards
    #[command(visible_aliases = ["test"])]
    SelfTest,

    /// Write a starter config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
