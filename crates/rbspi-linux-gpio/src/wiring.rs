//! SPI signal assignment in gpiochip offsets

use gpiocdev::line::Offset;

use rbspi_core::{LineMask, PinMap};

use crate::device::LinuxGpioConfig;
use crate::error::Result;

/// Which gpiochip offsets carry which SPI signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusWiring {
    /// Serial clock
    pub sck: Offset,
    /// Master out, slave in
    pub mosi: Offset,
    /// Master in, slave out; `None` for write-only buses
    pub miso: Option<Offset>,
    /// Chip-select line of each chip-select index
    pub cs: Vec<Offset>,
    /// Further outputs owned by the bus (device aux and strobe lines)
    pub extra: Vec<Offset>,
}

impl BusWiring {
    /// Wiring without chip selects
    pub fn new(sck: Offset, mosi: Offset, miso: Option<Offset>) -> Self {
        Self {
            sck,
            mosi,
            miso,
            cs: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Append a chip select
    pub fn with_cs(mut self, offset: Offset) -> Self {
        self.cs.push(offset);
        self
    }

    /// Append an extra output line
    pub fn with_extra(mut self, offset: Offset) -> Self {
        self.extra.push(offset);
        self
    }

    /// Line request for this wiring
    ///
    /// Chip selects start high, deselecting active-low devices until the
    /// controller parks each registered device at its own idle level.
    pub fn line_config(&self, device: impl Into<String>) -> LinuxGpioConfig {
        let config = [self.sck, self.mosi]
            .into_iter()
            .fold(LinuxGpioConfig::new(device), |c, o| c.with_output(o));
        let config = self.cs.iter().fold(config, |c, &o| c.with_output_high(o));
        let config = self.extra.iter().fold(config, |c, &o| c.with_output(o));
        match self.miso {
            Some(miso) => config.with_input(miso),
            None => config,
        }
    }

    /// Pin map over the masks of [`line_config`](Self::line_config)
    pub fn pin_map(&self, config: &LinuxGpioConfig) -> Result<PinMap> {
        let mask = |offset: Offset| -> Result<LineMask> {
            config.mask_of(offset).ok_or_else(|| {
                log::error!("linux_gpio: line {} missing from the request", offset);
                rbspi_core::Error::BusMisconfigured.into()
            })
        };
        let miso = match self.miso {
            Some(offset) => mask(offset)?,
            None => LineMask::empty(),
        };
        let mut pins = PinMap::new(mask(self.sck)?, mask(self.mosi)?, miso);
        for &cs in &self.cs {
            pins = pins.with_cs(mask(cs)?);
        }
        pins.validate()?;
        Ok(pins)
    }

    /// Mask of one of the extra outputs
    pub fn extra_mask(&self, config: &LinuxGpioConfig, offset: Offset) -> Option<LineMask> {
        if self.extra.contains(&offset) {
            config.mask_of(offset)
        } else {
            None
        }
    }
}
