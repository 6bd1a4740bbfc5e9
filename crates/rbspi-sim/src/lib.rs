//! rbspi-sim - Simulated bus for testing
//!
//! This crate provides an in-memory GPIO block with SPI slave models
//! attached to it. The slaves decode the actual clock and chip-select edges
//! the bit engine produces, so tests exercise the full controller stack
//! without hardware.
//!
//! # Example
//!
//! ```ignore
//! use rbspi_sim::{SimBus, SimFlash};
//!
//! let bus = SimBus::new(pins);
//! bus.attach(0, Mode::MODE_0, SimFlash::default())?;
//! let ctrl = Controller::new("sim", bus.engine()?, Calibration::default())?;
//! ```

pub mod bus;
pub mod flash;
pub mod slave;

pub use bus::{SimBus, SimDelay, SimGpio, SimShifter, TraceEvent};
pub use flash::{FlashConfig, SimFlash};
pub use slave::{ScriptedDevice, SlaveDevice};

use rbspi_core::{LineMask, PinMap};

/// Pin map used by the CLI `--sim` bus and most tests
///
/// SCK on line 0, MOSI on 1, MISO on 2, chip selects from line 3 upwards.
pub fn default_pins(chip_selects: u32) -> PinMap {
    (0..chip_selects).fold(
        PinMap::new(LineMask::line(0), LineMask::line(1), LineMask::line(2)),
        |pins, i| pins.with_cs(LineMask::line(3 + i)),
    )
}
