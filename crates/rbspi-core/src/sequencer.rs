//! Chip-select / message sequencer
//!
//! Drives one [`Message`] at a time through the engine and owns the
//! chip-select state of the bus. A chip select is either released or held
//! by exactly one device; it stays held across Messages when the last
//! Transfer asks for it with `cs_change`, which lets a driver split one
//! long bus transaction over several Messages.

use crate::delay::Delay;
use crate::device::{ChipSelect, Device};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::gpio::GpioLines;
use crate::message::{Message, Transfer};
use crate::timing::{Calibration, SpeedCalculator};

/// Chip-select state machine over an [`Engine`]
pub struct Sequencer<G, D> {
    engine: Engine<G, D>,
    speed: SpeedCalculator,
    held: Option<Device>,
    applied_hz: Option<u32>,
}

impl<G: GpioLines, D: Delay> Sequencer<G, D> {
    /// Wrap `engine`; no chip select is held
    pub fn new(engine: Engine<G, D>, calibration: Calibration) -> Self {
        Self {
            engine,
            speed: SpeedCalculator::new(calibration),
            held: None,
            applied_hz: None,
        }
    }

    /// Device whose chip select is currently asserted
    pub fn held(&self) -> Option<ChipSelect> {
        self.held.map(|dev| dev.chip_select())
    }

    /// The engine
    pub fn engine(&self) -> &Engine<G, D> {
        &self.engine
    }

    /// The engine, mutably
    pub fn engine_mut(&mut self) -> &mut Engine<G, D> {
        &mut self.engine
    }

    /// Speed calculator
    pub fn speed(&self) -> &SpeedCalculator {
        &self.speed
    }

    /// Park the lines of a newly registered device
    pub fn park(&mut self, dev: &Device) {
        self.engine.park(dev);
    }

    /// Deassert any held chip select
    pub fn release(&mut self) {
        if let Some(dev) = self.held.take() {
            log::debug!("sequencer: releasing {}", dev.chip_select());
            self.engine.deselect(&dev);
        }
    }

    fn apply_speed(&mut self, dev: &Device, xfer: &Transfer) {
        let requested = xfer
            .speed_hz()
            .filter(|&hz| hz != 0)
            .unwrap_or(dev.max_speed_hz());
        let hz = self.speed.effective_hz(requested);
        if self.applied_hz == Some(hz) {
            return;
        }

        let timing = self.speed.set_speed(hz);
        log::debug!(
            "sequencer: {} Hz, half period {} ns, divider {:?}",
            hz,
            timing.half_period_ns,
            timing.divider
        );
        self.engine.set_timing(timing);
        self.applied_hz = Some(hz);
    }

    fn assert_cs(&mut self, dev: &Device) {
        log::debug!("sequencer: asserting {}", dev.chip_select());
        self.engine.select(dev);
        self.held = Some(*dev);
    }

    /// Run `msg` to completion on the bus
    ///
    /// Fills in the Message status and actual length and returns the chip
    /// select left held afterwards. The completion callback is not invoked.
    pub fn process_message(&mut self, msg: &mut Message) -> Option<ChipSelect> {
        msg.begin();
        let (dev, transfers) = msg.parts_mut();
        let (actual, status) = self.run(&dev, transfers);
        msg.finish(actual, status);
        self.held()
    }

    fn run(&mut self, dev: &Device, transfers: &mut [Transfer]) -> (usize, Result<()>) {
        if transfers.is_empty() {
            self.release();
            return (0, Ok(()));
        }

        match self.held {
            Some(held) if held.chip_select() == dev.chip_select() => {}
            Some(_) => self.release(),
            None => {}
        }

        let last = transfers.len() - 1;
        let mut actual = 0;

        for (i, xfer) in transfers.iter_mut().enumerate() {
            // Speed first so the CS setup time matches the new clock
            self.apply_speed(dev, xfer);
            if self.held.is_none() {
                self.assert_cs(dev);
            }

            let done = self.engine.transfer(dev, xfer);
            actual += done;
            log::trace!(
                "sequencer: {} transfer {}: {}/{} bytes",
                dev.chip_select(),
                i,
                done,
                xfer.len()
            );
            if done != xfer.len() {
                self.release();
                return (actual, Err(Error::TransferSizeMismatch));
            }

            if xfer.delay_us() > 0 {
                self.engine.delay_us(xfer.delay_us());
            }

            let is_last = i == last;
            let terminate = if xfer.cs_change() { !is_last } else { is_last };
            if terminate {
                // Non-last: the next iteration re-asserts
                self.release();
            }
        }

        (actual, Ok(()))
    }
}
