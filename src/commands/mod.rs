//! CLI command implementations
//!
//! Each command registers the chip select it talks to and drives the bus
//! through the controller's queue, so the same code runs against the
//! simulated bus and a Linux GPIO bus.

pub mod probe;
pub mod read;
pub mod xfer;
