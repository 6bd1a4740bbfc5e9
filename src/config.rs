//! TOML bus description
//!
//! ```toml
//! [bus]
//! name = "spi-gpio0"
//! gpiochip = "/dev/gpiochip0"
//! sck = 11
//! mosi = 10
//! miso = 9
//! cs = [8, 7]
//!
//! [calibration]
//! toggle_overhead_ns = 1500
//! max_speed_hz = 2_000_000
//!
//! [[device]]
//! cs = 0
//! mode = 0
//! speed_hz = "0x0F4240"
//!
//! [[device]]
//! cs = 1
//! mode = 3
//! speed_hz = 250000
//! aux = [22]
//! strobe = [23]
//! ```
//!
//! Line offsets and speeds may be written as decimal or as `"0x..."` strings.

use std::fs;
use std::path::{Path, PathBuf};

use rbspi_core::{Calibration, DeviceConfig, LineMask, Mode};
use serde::Deserialize;

/// Speed of chip selects without a `[[device]]` entry
pub const DEFAULT_SPEED_HZ: u32 = 1_000_000;

const DEFAULT_GPIOCHIP: &str = "/dev/gpiochip0";
const DEFAULT_BUS_NAME: &str = "spi-gpio0";

/// Errors from loading a bus description
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid bus description: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("device on CS{cs}: mode {mode} is not one of 0-3")]
    InvalidMode { cs: u8, mode: u8 },
    #[error("CS{0} is described twice")]
    DuplicateDevice(u8),
    #[error("device on CS{cs}: line {line} is not owned by the bus")]
    UnknownLine { cs: u8, line: u32 },
}

/// A u32 written as an integer or a hex/decimal string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "HexOrInt")]
pub struct Number(pub u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

impl TryFrom<HexOrInt> for Number {
    type Error = String;

    fn try_from(value: HexOrInt) -> Result<Self, Self::Error> {
        match value {
            HexOrInt::Int(n) => Ok(Number(n)),
            HexOrInt::Str(s) => parse_number(&s).map(Number),
        }
    }
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

fn default_bus_name() -> String {
    DEFAULT_BUS_NAME.to_string()
}

fn default_gpiochip() -> String {
    DEFAULT_GPIOCHIP.to_string()
}

fn default_speed() -> Number {
    Number(DEFAULT_SPEED_HZ)
}

fn default_bits_per_word() -> u8 {
    8
}

/// Whole bus description file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    pub bus: BusSection,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceSection>,
}

/// `[bus]`: gpiochip and signal offsets
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusSection {
    #[serde(default = "default_bus_name")]
    pub name: String,
    #[serde(default = "default_gpiochip")]
    pub gpiochip: String,
    pub sck: Number,
    pub mosi: Number,
    #[serde(default)]
    pub miso: Option<Number>,
    #[serde(default)]
    pub cs: Vec<Number>,
}

/// `[[device]]`: defaults for one chip select
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSection {
    pub cs: u8,
    /// SPI mode number 0-3
    #[serde(default)]
    pub mode: u8,
    #[serde(default = "default_speed")]
    pub speed_hz: Number,
    #[serde(default)]
    pub cs_high: bool,
    #[serde(default)]
    pub lsb_first: bool,
    #[serde(default = "default_bits_per_word")]
    pub bits_per_word: u8,
    /// Lines driven low whenever the device is deselected
    #[serde(default)]
    pub aux: Vec<Number>,
    /// Lines pulsed after the device is deselected
    #[serde(default)]
    pub strobe: Vec<Number>,
    #[serde(default)]
    pub no_fast_path: bool,
}

impl DeviceSection {
    /// Plain entry for `cs`
    pub fn new(cs: u8, mode: u8, speed_hz: u32) -> Self {
        Self {
            cs,
            mode,
            speed_hz: Number(speed_hz),
            cs_high: false,
            lsb_first: false,
            bits_per_word: default_bits_per_word(),
            aux: Vec::new(),
            strobe: Vec::new(),
            no_fast_path: false,
        }
    }

    /// Offsets of the aux and strobe lines
    pub fn extra_lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.aux.iter().chain(&self.strobe).map(|n| n.0)
    }

    /// Core registration config; `resolve` maps a line offset to its mask
    pub fn device_config<F>(&self, resolve: F) -> Result<DeviceConfig, ConfigError>
    where
        F: Fn(u32) -> Option<LineMask>,
    {
        if self.mode > 3 {
            return Err(ConfigError::InvalidMode {
                cs: self.cs,
                mode: self.mode,
            });
        }
        let mut mode = Mode::from_bits_truncate(self.mode);
        mode.set(Mode::CS_HIGH, self.cs_high);
        mode.set(Mode::LSB_FIRST, self.lsb_first);

        let masks = |lines: &[Number]| -> Result<LineMask, ConfigError> {
            lines.iter().try_fold(LineMask::empty(), |acc, n| {
                resolve(n.0).map(|m| acc | m).ok_or(ConfigError::UnknownLine {
                    cs: self.cs,
                    line: n.0,
                })
            })
        };

        let mut config = DeviceConfig::new(self.cs, mode, self.speed_hz.0)
            .with_bits_per_word(self.bits_per_word)
            .with_aux_lines(masks(&self.aux)?)
            .with_strobe_lines(masks(&self.strobe)?);
        if self.no_fast_path {
            config = config.without_fast_path();
        }
        Ok(config)
    }
}

impl BusConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BusConfig = toml::from_str(content)?;
        for (i, dev) in config.devices.iter().enumerate() {
            if config.devices[..i].iter().any(|d| d.cs == dev.cs) {
                return Err(ConfigError::DuplicateDevice(dev.cs));
            }
        }
        Ok(config)
    }

    /// Entry for `cs`, or mode 0 at [`DEFAULT_SPEED_HZ`]
    pub fn device(&self, cs: u8) -> DeviceSection {
        self.devices
            .iter()
            .find(|d| d.cs == cs)
            .cloned()
            .unwrap_or_else(|| DeviceSection::new(cs, 0, DEFAULT_SPEED_HZ))
    }

    /// Offsets of every aux and strobe line named by a device
    pub fn extra_lines(&self) -> Vec<u32> {
        let mut lines: Vec<u32> = self.devices.iter().flat_map(|d| d.extra_lines()).collect();
        lines.sort_unstable();
        lines.dedup();
        lines
    }
}
