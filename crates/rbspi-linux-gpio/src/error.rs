//! Error types for the Linux GPIO backend

use gpiocdev::line::Offset;
use thiserror::Error;

/// Linux GPIO backend errors
#[derive(Debug, Error)]
pub enum LinuxGpioError {
    /// Failed to request the GPIO lines
    #[error("Failed to request GPIO lines on '{path}': {source}")]
    LineRequestFailed {
        path: String,
        #[source]
        source: gpiocdev::Error,
    },

    /// GPIO chip not specified
    #[error("No GPIO chip specified. Use a path like /dev/gpiochip0")]
    NoDevice,

    /// The same line offset appears twice
    #[error("GPIO line {0} is assigned more than once")]
    DuplicateLine(Offset),

    /// More lines than fit in a line mask
    #[error("{0} GPIO lines requested, at most 32 are supported")]
    TooManyLines(usize),

    /// The resulting bus description was rejected
    #[error("Invalid bus wiring: {0}")]
    Bus(#[from] rbspi_core::Error),
}

/// Result type for the Linux GPIO backend
pub type Result<T> = std::result::Result<T, LinuxGpioError>;
