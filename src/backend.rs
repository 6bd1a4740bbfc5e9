//! Opening a bus controller from the command line options
//!
//! `--sim` builds a simulated bus with a SPI NOR flash on CS0 and a hardware
//! shift register; `--config` builds a Linux GPIO bus from a description
//! file.

use std::error::Error;

use rbspi_core::{Controller, Delay, Device, GpioLines, LineMask};

use crate::config::{BusConfig, Number};

/// Controller over type-erased lines and delay
pub type BusController = Controller<Box<dyn GpioLines + Send>, Box<dyn Delay + Send>>;

/// Bus description used by `--sim`
#[cfg(feature = "sim")]
const SIM_BUS: &str = r#"
[bus]
name = "sim"
sck = 0
mosi = 1
miso = 2
cs = [3, 4]

[calibration.divider]
base_hz = 50000000
min = 2
max = 65535

[[device]]
cs = 0
speed_hz = 10000000
"#;

/// Contents of the first bytes of the simulated flash
#[cfg(feature = "sim")]
const SIM_BANNER: &[u8] = b"rbspi simulated flash\n";

/// An open bus and the description it was built from
pub struct Bus {
    ctrl: BusController,
    config: BusConfig,
    /// Masks of the aux and strobe lines, by gpiochip offset
    extra: Vec<(u32, LineMask)>,
}

impl Bus {
    /// Open the simulated bus or the described one
    pub fn open(sim: bool, config: Option<&std::path::Path>) -> Result<Self, Box<dyn Error>> {
        match (sim, config) {
            (true, _) => open_sim(),
            (false, Some(path)) => open_linux(BusConfig::from_file(path)?),
            (false, None) => Err("no bus selected: pass --sim or --config <bus.toml>".into()),
        }
    }

    /// The controller
    pub fn controller(&self) -> &BusController {
        &self.ctrl
    }

    /// Register chip select `cs` using its description, optionally at `speed_hz`
    pub fn register(&self, cs: u8, speed_hz: Option<u32>) -> Result<Device, Box<dyn Error>> {
        let mut section = self.config.device(cs);
        if let Some(hz) = speed_hz {
            section.speed_hz = Number(hz);
        }
        let config = section.device_config(|line| {
            self.extra
                .iter()
                .find(|&&(offset, _)| offset == line)
                .map(|&(_, mask)| mask)
        })?;
        log::debug!(
            "{}: registering CS{} mode {:?} at {} Hz",
            self.ctrl.name(),
            cs,
            config.mode,
            config.max_speed_hz
        );
        Ok(self.ctrl.register_device(config)?)
    }
}

/// Mask of line `n` in a bank addressed directly by offset
#[cfg(feature = "sim")]
fn direct_line(n: Number) -> Result<LineMask, Box<dyn Error>> {
    if n.0 >= u32::BITS {
        return Err(format!(
            "line {} is past the last line of the bank ({})",
            n.0,
            u32::BITS - 1
        )
        .into());
    }
    Ok(LineMask::line(n.0))
}

/// Pin map addressing lines directly by offset
#[cfg(feature = "sim")]
fn direct_pins(bus: &crate::config::BusSection) -> Result<rbspi_core::PinMap, Box<dyn Error>> {
    let miso = bus.miso.map(direct_line).transpose()?.unwrap_or_default();
    let pins = rbspi_core::PinMap::new(direct_line(bus.sck)?, direct_line(bus.mosi)?, miso);
    bus.cs
        .iter()
        .try_fold(pins, |pins, &cs| Ok(pins.with_cs(direct_line(cs)?)))
}

#[cfg(feature = "sim")]
fn open_sim() -> Result<Bus, Box<dyn Error>> {
    use rbspi_core::{Engine, Mode};
    use rbspi_sim::{FlashConfig, SimBus, SimFlash};

    let config = BusConfig::from_toml_str(SIM_BUS)?;
    let sim = SimBus::new(direct_pins(&config.bus)?).without_trace();

    let gpio: Box<dyn GpioLines + Send> = Box::new(sim.gpio());
    let delay: Box<dyn Delay + Send> = Box::new(sim.delay());
    let mut engine = Engine::new(gpio, delay, sim.pins())?;
    if let Some(divider) = config.calibration.divider {
        engine = engine.with_shift_register(sim.shift_register(divider.base_hz));
    }

    let flash = SimFlash::with_data(FlashConfig::default(), SIM_BANNER);
    log::info!(
        "sim: {} byte flash on CS0 (id {:02X} {:04X})",
        flash.config().size,
        flash.config().manufacturer_id,
        flash.config().device_id
    );
    sim.attach(0, Mode::MODE_0, flash)?;

    let ctrl = Controller::new(&config.bus.name, engine, config.calibration)?;
    Ok(Bus {
        ctrl,
        config,
        extra: Vec::new(),
    })
}

#[cfg(not(feature = "sim"))]
fn open_sim() -> Result<Bus, Box<dyn Error>> {
    Err("rbspi was built without the simulated bus (feature \"sim\")".into())
}

#[cfg(feature = "linux-gpio")]
fn open_linux(config: BusConfig) -> Result<Bus, Box<dyn Error>> {
    use rbspi_core::{Engine, SpinDelay};
    use rbspi_linux_gpio::{BusWiring, LinuxGpioLines};

    let bus = &config.bus;
    let extra_lines = config.extra_lines();

    let wiring = bus.cs.iter().fold(
        BusWiring::new(bus.sck.0, bus.mosi.0, bus.miso.map(|n| n.0)),
        |w, cs| w.with_cs(cs.0),
    );
    let wiring = extra_lines.iter().fold(wiring, |w, &line| w.with_extra(line));

    let lines_config = wiring
        .line_config(bus.gpiochip.as_str())
        .with_consumer(bus.name.as_str());
    let pins = wiring.pin_map(&lines_config)?;
    let lines = LinuxGpioLines::open(&lines_config)?;

    let extra = extra_lines
        .iter()
        .filter_map(|&line| wiring.extra_mask(&lines_config, line).map(|m| (line, m)))
        .collect();

    let gpio: Box<dyn GpioLines + Send> = Box::new(lines);
    let delay: Box<dyn Delay + Send> = Box::new(SpinDelay);
    let engine = Engine::new(gpio, delay, pins)?;

    let ctrl = Controller::new(&bus.name, engine, config.calibration)?;
    Ok(Bus {
        ctrl,
        config,
        extra,
    })
}

#[cfg(not(feature = "linux-gpio"))]
fn open_linux(_config: BusConfig) -> Result<Bus, Box<dyn Error>> {
    Err("rbspi was built without Linux GPIO support (feature \"linux-gpio\")".into())
}
