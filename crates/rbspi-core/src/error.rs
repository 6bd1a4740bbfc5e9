//! Error types for rbspi-core
//!
//! This module provides a no_std compatible error type shared by the
//! sequencer, the dispatcher and device registration.

use core::fmt;

/// Core error type - no_std compatible, Copy so it can live in a Message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Transfer errors
    /// The engine moved fewer bytes than the Transfer asked for
    /// (verify mismatch or hardware fault)
    TransferSizeMismatch,
    /// The Message was still queued when the controller shut down
    Cancelled,

    // Construction errors
    /// Pin map or backend is unusable
    BusMisconfigured,

    // Registration errors
    /// Mode bits or bits-per-word the controller cannot honor
    UnsupportedMode,
    /// Chip-select index outside the pin map
    InvalidChipSelect,
    /// Chip-select index already registered
    ChipSelectInUse,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransferSizeMismatch => write!(f, "transfer size mismatch"),
            Self::Cancelled => write!(f, "message cancelled"),
            Self::BusMisconfigured => write!(f, "SPI bus misconfigured"),
            Self::UnsupportedMode => write!(f, "SPI mode not supported by controller"),
            Self::InvalidChipSelect => write!(f, "invalid chip select"),
            Self::ChipSelectInUse => write!(f, "chip select already registered"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
