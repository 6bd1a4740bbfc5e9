//! SPI devices (chip-select slots)

use core::fmt;

use bitflags::bitflags;

use crate::gpio::LineMask;

bitflags! {
    /// SPI mode bits
    ///
    /// Bit values follow the Linux `SPI_*` mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Mode: u8 {
        /// Clock phase: sample on the trailing edge
        const CPHA      = 0x01;
        /// Clock polarity: SCK idles high
        const CPOL      = 0x02;
        /// Chip select is active high
        const CS_HIGH   = 0x04;
        /// Shift the least significant bit first
        const LSB_FIRST = 0x08;

        /// CPOL=0, CPHA=0
        const MODE_0 = 0;
        /// CPOL=0, CPHA=1
        const MODE_1 = Self::CPHA.bits();
        /// CPOL=1, CPHA=0
        const MODE_2 = Self::CPOL.bits();
        /// CPOL=1, CPHA=1
        const MODE_3 = Self::CPOL.bits() | Self::CPHA.bits();
    }
}

impl Mode {
    /// SCK level while idle
    #[inline]
    pub fn idle_clock(self) -> bool {
        self.contains(Mode::CPOL)
    }

    /// CS level that selects the device
    #[inline]
    pub fn cs_active_level(self) -> bool {
        self.contains(Mode::CS_HIGH)
    }
}

/// Chip-select index on a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChipSelect(pub u8);

impl fmt::Display for ChipSelect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cs{}", self.0)
    }
}

/// Parameters a driver registers a device with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Chip-select index in the controller's pin map
    pub chip_select: u8,
    /// Mode bits
    pub mode: Mode,
    /// Maximum SCK frequency; 0 runs the bus at the slowest speed
    pub max_speed_hz: u32,
    /// Word size, 8 or (with a hardware shift register) 16
    pub bits_per_word: u8,
    /// Lines raised only while this device is selected
    pub aux_lines: LineMask,
    /// Lines pulsed high when the device is deselected
    pub strobe_lines: LineMask,
    /// Never use the hardware shift register for this device
    pub no_fast_path: bool,
}

impl DeviceConfig {
    /// Device on `chip_select` with the given mode and speed
    pub fn new(chip_select: u8, mode: Mode, max_speed_hz: u32) -> Self {
        Self {
            chip_select,
            mode,
            max_speed_hz,
            bits_per_word: 8,
            aux_lines: LineMask::empty(),
            strobe_lines: LineMask::empty(),
            no_fast_path: false,
        }
    }

    /// Set the word size
    pub fn with_bits_per_word(mut self, bits: u8) -> Self {
        self.bits_per_word = bits;
        self
    }

    /// Raise `lines` while selected (e.g. an input multiplexer enable)
    pub fn with_aux_lines(mut self, lines: LineMask) -> Self {
        self.aux_lines = lines;
        self
    }

    /// Pulse `lines` on deselect (e.g. a latch commit)
    pub fn with_strobe_lines(mut self, lines: LineMask) -> Self {
        self.strobe_lines = lines;
        self
    }

    /// Keep this device on the bit-banged path
    pub fn without_fast_path(mut self) -> Self {
        self.no_fast_path = true;
        self
    }
}

/// A registered device
///
/// Returned by `Controller::register_device`; cheap to copy into Messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    config: DeviceConfig,
    cs_line: LineMask,
}

impl Device {
    /// Bind a config to its resolved chip-select line
    pub fn new(config: DeviceConfig, cs_line: LineMask) -> Self {
        Self { config, cs_line }
    }

    /// Chip-select index
    pub fn chip_select(&self) -> ChipSelect {
        ChipSelect(self.config.chip_select)
    }

    /// Chip-select line
    pub fn cs_line(&self) -> LineMask {
        self.cs_line
    }

    /// Mode bits
    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    /// Default maximum speed
    pub fn max_speed_hz(&self) -> u32 {
        self.config.max_speed_hz
    }

    /// Word size
    pub fn bits_per_word(&self) -> u8 {
        self.config.bits_per_word
    }

    /// Registration parameters
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
}
