//! rbspi-linux-gpio - Linux GPIO backend
//!
//! This crate drives an rbspi bus through the Linux GPIO character device
//! interface (gpiocdev). Each bus requests its SCK, MOSI, MISO and chip
//! select lines from one gpiochip and hands them to the core engine as a
//! single [`GpioLines`](rbspi_core::GpioLines) bank.
//!
//! # Example
//!
//! ```no_run
//! use rbspi_core::{Calibration, Controller, Engine, SpinDelay};
//! use rbspi_linux_gpio::{BusWiring, LinuxGpioLines};
//!
//! //                          SCK MOSI MISO
//! let wiring = BusWiring::new(11, 10, Some(9)).with_cs(8);
//! let config = wiring.line_config("/dev/gpiochip0");
//! let pins = wiring.pin_map(&config)?;
//!
//! let lines = LinuxGpioLines::open(&config)?;
//! let engine = Engine::new(lines, SpinDelay, pins)?;
//! let ctrl = Controller::new("spi-gpio0", engine, Calibration::new(60))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # System Requirements
//!
//! - Linux kernel 4.8+ with GPIO character device support (kernel 5.5+ for v2 API)
//! - Access to `/dev/gpiochipN` devices (may require root or udev rules)
//!
//! Each line write is a syscall, typically 1-5 us on an ARM board. Put the
//! measured time in `Calibration::toggle_overhead_ns` so requested speeds
//! are not undershot by more than necessary.

pub mod device;
pub mod error;
pub mod wiring;

// Re-exports
pub use device::{LinuxGpioConfig, LinuxGpioLines, DEFAULT_CONSUMER};
pub use error::{LinuxGpioError, Result};
pub use wiring::BusWiring;

