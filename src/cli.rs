//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "rbspi")]
#[command(author, version, about = "Bit-banged SPI bus tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Use the simulated bus (SPI NOR flash on CS0)
    #[arg(long, global = true, conflicts_with = "config")]
    pub sim: bool,

    /// Bus description file (TOML) for a Linux GPIO bus
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read the JEDEC ID of a flash chip
    Probe {
        /// Chip select of the flash
        #[arg(long, default_value_t = 0)]
        cs: u8,
    },

    /// Read flash contents to file
    Read {
        /// Chip select of the flash
        #[arg(long, default_value_t = 0)]
        cs: u8,

        /// Start address (hex with 0x prefix, or decimal)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        offset: u32,

        /// Number of bytes to read (hex with 0x prefix, or decimal)
        #[arg(short, long, value_parser = parse_hex_u32)]
        length: u32,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Bus speed in Hz instead of the device default
        #[arg(long, value_parser = parse_hex_u32)]
        speed: Option<u32>,
    },

    /// Run one full-duplex transfer and print what came back
    Xfer {
        /// Chip select of the device
        #[arg(long, default_value_t = 0)]
        cs: u8,

        /// Bytes to send, e.g. "9f" or "03 00 10 00"
        #[arg(long)]
        hex: String,

        /// Extra bytes to clock in after the sent ones
        #[arg(long, default_value_t = 0)]
        read: usize,

        /// Speed override for this transfer in Hz
        #[arg(long, value_parser = parse_hex_u32)]
        speed: Option<u32>,
    },
}
