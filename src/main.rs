//! rbspi - Bit-banged SPI bus tool
//!
//! Drives an SPI bus made of plain GPIO lines, either on a Linux gpiochip
//! described by a TOML file or on the built-in simulated bus.
//!
//! # Architecture
//!
//! - `config` - TOML bus description (lines, calibration, device defaults)
//! - `backend` - builds a `Controller` over the simulated or Linux lines
//! - `commands` - probe / read / xfer on top of the controller queue

mod backend;
mod cli;
mod commands;
mod config;

use backend::Bus;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logger; RUST_LOG overrides the verbosity flags
    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let bus = Bus::open(cli.sim, cli.config.as_deref())?;
    log::info!("Opened bus {}", bus.controller().name());

    match cli.command {
        Commands::Probe { cs } => commands::probe::run_probe(&bus, cs),
        Commands::Read {
            cs,
            offset,
            length,
            output,
            speed,
        } => commands::read::run_read(&bus, cs, offset, length, &output, speed),
        Commands::Xfer {
            cs,
            hex,
            read,
            speed,
        } => commands::xfer::run_xfer(&bus, cs, &hex, read, speed),
    }
}
