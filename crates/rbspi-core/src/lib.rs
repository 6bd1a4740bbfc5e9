//! rbspi-core - Software SPI bus controller
//!
//! This crate implements an SPI master on top of plain GPIO lines: clock
//! generation, chip-select sequencing, CPOL/CPHA handling, speed dependent
//! bit timing, queued multi-transfer messages and asynchronous completion.
//! An optional hardware shift register can take over whole 32-bit words.
//!
//! # Layers
//!
//! - [`gpio`] - the `GpioLines` capability a platform backend implements
//! - [`latch`] - a `GpioLines` backend extending outputs through a serial latch
//! - [`delay`] - the injectable busy-wait used between clock edges
//! - [`timing`] - converts a requested bus frequency into a `Timing`
//! - [`engine`] - shifts bytes (or 32-bit words) across SCK/MOSI/MISO
//! - [`sequencer`] - chip-select state machine driving one `Message`
//! - [`controller`] - queue, worker thread and atomic fast path (`std` only)
//!
//! # Features
//!
//! - `std` (default) - worker-thread controller, `SpinDelay`, `std::error::Error`
//! - `serde` - `Deserialize` for the calibration types
//!
//! # Example
//!
//! ```ignore
//! use rbspi_core::{Controller, DeviceConfig, Message, Mode, Transfer};
//!
//! let ctrl = Controller::new("spi0", engine, calibration)?;
//! let flash = ctrl.register_device(DeviceConfig::new(0, Mode::MODE_0, 1_000_000))?;
//!
//! let msg = Message::new(flash)
//!     .with_transfer(Transfer::full_duplex(vec![0x9F], 3, 4));
//! let done = ctrl.submit_and_wait(msg)?;
//! assert!(done.status().is_ok());
//! ```

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
pub mod controller;
pub mod delay;
pub mod device;
pub mod engine;
pub mod error;
pub mod gpio;
pub mod latch;
pub mod message;
pub mod sequencer;
pub mod timing;

#[cfg(test)]
pub(crate) mod mock;

#[cfg(feature = "std")]
pub use controller::Controller;
pub use delay::Delay;
#[cfg(feature = "std")]
pub use delay::SpinDelay;
pub use device::{ChipSelect, Device, DeviceConfig, Mode};
pub use engine::{Engine, ShiftCommand, ShiftRegister};
pub use error::{Error, Result};
pub use gpio::{Direction, GpioLines, LineMask, PinMap};
pub use latch::{LatchLines, LatchPins};
pub use message::{Message, Transfer};
pub use sequencer::Sequencer;
pub use timing::{Calibration, DividerRange, SpeedCalculator, Timing, MIN_SPEED_HZ};
