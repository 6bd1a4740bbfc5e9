//! GPIO character device line bank
//!
//! [`LinuxGpioLines`] requests a set of lines from one gpiochip and exposes
//! them as a [`GpioLines`] bank: bit `i` of a [`LineMask`] is the `i`-th
//! offset of the request (outputs first, then inputs, in the order they
//! were added to the [`LinuxGpioConfig`]).
//!
//! Output levels are kept in a shadow mask so `get()` only has to query
//! the kernel for lines currently configured as inputs. Every `set()` is
//! one `set_values` call carrying the level of each output, so lines
//! changed together switch together.

use crate::error::{LinuxGpioError, Result};

use gpiocdev::line::{Drive, Offset, Value, Values};
use gpiocdev::request::{Config, Request};

use rbspi_core::{Direction, GpioLines, LineMask};

/// Default consumer label shown by `gpioinfo`
pub const DEFAULT_CONSUMER: &str = "rbspi";

/// Lines to request from a gpiochip
#[derive(Debug, Clone)]
pub struct LinuxGpioConfig {
    /// Device path (e.g., "/dev/gpiochip0")
    pub device: String,
    /// Lines requested as outputs, driven low initially
    pub outputs: Vec<Offset>,
    /// Outputs driven high when requested instead
    pub initial_high: Vec<Offset>,
    /// Lines requested as inputs
    pub inputs: Vec<Offset>,
    /// Consumer label
    pub consumer: String,
}

impl LinuxGpioConfig {
    /// Empty request on `device`
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            outputs: Vec::new(),
            initial_high: Vec::new(),
            inputs: Vec::new(),
            consumer: DEFAULT_CONSUMER.to_string(),
        }
    }

    /// Add an output line
    pub fn with_output(mut self, offset: Offset) -> Self {
        self.outputs.push(offset);
        self
    }

    /// Add an output line that starts high
    pub fn with_output_high(mut self, offset: Offset) -> Self {
        self.outputs.push(offset);
        self.initial_high.push(offset);
        self
    }

    /// Add an input line
    pub fn with_input(mut self, offset: Offset) -> Self {
        self.inputs.push(offset);
        self
    }

    /// Set the consumer label
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    /// All offsets in mask bit order
    pub fn offsets(&self) -> Vec<Offset> {
        self.outputs.iter().chain(&self.inputs).copied().collect()
    }

    /// Mask bit of `offset`
    pub fn mask_of(&self, offset: Offset) -> Option<LineMask> {
        self.offsets()
            .iter()
            .position(|&o| o == offset)
            .map(|i| LineMask::line(i as u32))
    }

    /// Levels of the outputs right after the request
    pub fn initial_levels(&self) -> LineMask {
        self.initial_high
            .iter()
            .filter_map(|&offset| self.mask_of(offset))
            .fold(LineMask::empty(), |acc, m| acc | m)
    }

    /// Check the request can be expressed as a line mask
    pub fn validate(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(LinuxGpioError::NoDevice);
        }
        let offsets = self.offsets();
        if offsets.len() > 32 {
            return Err(LinuxGpioError::TooManyLines(offsets.len()));
        }
        for (i, offset) in offsets.iter().enumerate() {
            if offsets[..i].contains(offset) {
                return Err(LinuxGpioError::DuplicateLine(*offset));
            }
        }
        Ok(())
    }
}

fn value(level: bool) -> Value {
    if level {
        Value::Active
    } else {
        Value::Inactive
    }
}

/// Level of every line not configured as an input
///
/// The v1 uAPI drives requested lines missing from a `set_values` call low,
/// so the whole output set is always written.
fn output_values(offsets: &[Offset], directions: &[Direction], levels: LineMask) -> Values {
    offsets
        .iter()
        .zip(directions)
        .enumerate()
        .filter(|&(_, (_, &dir))| dir != Direction::Input)
        .map(|(i, (&offset, _))| (offset, value(levels.contains(LineMask::line(i as u32)))))
        .collect()
}

/// GPIO lines on a Linux gpiochip
pub struct LinuxGpioLines {
    request: Request,
    device: String,
    offsets: Vec<Offset>,
    directions: Vec<Direction>,
    /// Last level driven on each output
    levels: LineMask,
}

impl LinuxGpioLines {
    /// Request the lines described by `config`
    pub fn open(config: &LinuxGpioConfig) -> Result<Self> {
        config.validate()?;

        log::debug!("linux_gpio: Opening device {}", config.device);

        let mut req_config = Config::default();
        for &offset in &config.outputs {
            let level = value(config.initial_high.contains(&offset));
            req_config.with_line(offset).as_output(level);
        }
        for &offset in &config.inputs {
            req_config.with_line(offset).as_input();
        }

        let request = Request::from_config(req_config)
            .on_chip(&config.device)
            .with_consumer(config.consumer.as_str())
            .request()
            .map_err(|source| LinuxGpioError::LineRequestFailed {
                path: config.device.clone(),
                source,
            })?;

        let directions = config
            .outputs
            .iter()
            .map(|_| Direction::Output)
            .chain(config.inputs.iter().map(|_| Direction::Input))
            .collect();

        log::info!(
            "linux_gpio: Opened {} (outputs={:?}, inputs={:?})",
            config.device,
            config.outputs,
            config.inputs
        );

        Ok(Self {
            request,
            device: config.device.clone(),
            offsets: config.offsets(),
            directions,
            levels: config.initial_levels(),
        })
    }

    /// Device path
    pub fn device(&self) -> &str {
        &self.device
    }

    fn lines(&self, mask: LineMask) -> impl Iterator<Item = (usize, Offset)> + '_ {
        self.offsets
            .iter()
            .copied()
            .enumerate()
            .filter(move |&(i, _)| mask.contains(LineMask::line(i as u32)))
    }

    /// Config for every requested line with its current direction and level
    fn full_config(&self) -> Config {
        let mut cfg = Config::default();
        for (i, &offset) in self.offsets.iter().enumerate() {
            let level = value(self.levels.contains(LineMask::line(i as u32)));
            match self.directions[i] {
                Direction::Input => {
                    cfg.with_line(offset).as_input();
                }
                Direction::Output => {
                    cfg.with_line(offset).as_output(level).with_drive(Drive::PushPull);
                }
                Direction::OpenDrain => {
                    cfg.with_line(offset).as_output(level).with_drive(Drive::OpenDrain);
                }
            }
        }
        cfg
    }
}

impl GpioLines for LinuxGpioLines {
    fn set(&mut self, high: LineMask, low: LineMask) {
        let mut levels = self.levels;
        for (i, offset) in self.lines(high | low) {
            if self.directions[i] == Direction::Input {
                log::trace!("linux_gpio: Ignoring write to input line {}", offset);
                continue;
            }
            let bit = LineMask::line(i as u32);
            levels.set(bit, high.contains(bit));
        }
        self.levels = levels;

        let values = output_values(&self.offsets, &self.directions, levels);
        if values.is_empty() {
            return;
        }
        if let Err(e) = self.request.set_values(&values) {
            log::error!("Failed to set GPIO lines {:?}: {}", values, e);
        }
    }

    fn get(&self) -> LineMask {
        let mut levels = LineMask::empty();
        for (i, &offset) in self.offsets.iter().enumerate() {
            let bit = LineMask::line(i as u32);
            if self.directions[i] == Direction::Input {
                match self.request.value(offset) {
                    Ok(Value::Active) => levels |= bit,
                    Ok(Value::Inactive) => {}
                    Err(e) => log::error!("Failed to get GPIO line {}: {}", offset, e),
                }
            } else if self.levels.contains(bit) {
                levels |= bit;
            }
        }
        levels
    }

    fn set_direction(&mut self, mask: LineMask, direction: Direction) {
        let targets: Vec<usize> = self.lines(mask).map(|(i, _)| i).collect();
        let mut changed = false;
        for i in targets {
            if self.directions[i] != direction {
                self.directions[i] = direction;
                changed = true;
            }
        }
        if !changed {
            return;
        }

        if let Err(e) = self.request.reconfigure(&self.full_config()) {
            log::error!("Failed to reconfigure GPIO lines: {}", e);
        }
    }
}
