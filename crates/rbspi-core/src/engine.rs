//! Bit-level transfer engine
//!
//! The engine owns the GPIO lines and the delay source of one bus and moves
//! data across SCK/MOSI/MISO. Bytes go through the bit-banged path; whole
//! 32-bit words can go through an optional hardware shift register.
//!
//! ## Bit-banged timing
//!
//! For each bit, most significant first unless the device asks for
//! `LSB_FIRST`:
//!
//! - CPHA=0: drive MOSI, wait half a period, SCK to the active edge, wait
//!   half a period, sample MISO, SCK back to idle
//! - CPHA=1: SCK to the active edge together with MOSI, wait half a period,
//!   sample MISO, SCK back to idle, wait half a period
//!
//! CPOL only decides the idle level of SCK, which is set once when the chip
//! select is asserted.

use alloc::boxed::Box;

use crate::delay::Delay;
use crate::device::{ChipSelect, Device, Mode};
use crate::error::Result;
use crate::gpio::{Direction, GpioLines, LineMask, PinMap};
use crate::message::Transfer;
use crate::timing::Timing;

/// Command word for a hardware shift register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftCommand {
    /// Number of bits to shift, MSB of the data word first (1..=32)
    pub bits: u8,
    /// Chip select the transfer belongs to
    pub chip_select: ChipSelect,
    /// SCK idles high
    pub cpol: bool,
}

/// Hardware shift register peripheral
///
/// The peripheral clocks a loaded word out on MOSI while shifting MISO into
/// its receive register. It always samples on the leading edge (CPHA=0).
pub trait ShiftRegister {
    /// Program the clock divider
    fn set_divider(&mut self, divider: u32);

    /// Load the transmit register
    fn write_data(&mut self, word: u32);

    /// Start a shift; returns once the peripheral is done
    fn write_command(&mut self, cmd: ShiftCommand);

    /// Read the receive register
    fn read_data(&mut self) -> u32;

    /// Shift one word and return the received word
    fn shift(&mut self, word: u32, cmd: ShiftCommand) -> u32 {
        self.write_data(word);
        self.write_command(cmd);
        self.read_data()
    }
}

impl<S: ShiftRegister + ?Sized> ShiftRegister for Box<S> {
    fn set_divider(&mut self, divider: u32) {
        (**self).set_divider(divider)
    }

    fn write_data(&mut self, word: u32) {
        (**self).write_data(word)
    }

    fn write_command(&mut self, cmd: ShiftCommand) {
        (**self).write_command(cmd)
    }

    fn read_data(&mut self) -> u32 {
        (**self).read_data()
    }
}

/// Bytes per hardware shift register word
const WORD_BYTES: usize = 4;

/// GPIO/shift-register transfer engine for one bus
pub struct Engine<G, D> {
    gpio: G,
    delay: D,
    pins: PinMap,
    half_period_ns: u32,
    divider: Option<u32>,
    shifter: Option<Box<dyn ShiftRegister + Send>>,
}

impl<G: GpioLines, D: Delay> Engine<G, D> {
    /// Take over `gpio` with the signal assignment in `pins`
    ///
    /// Configures directions and parks the bus: SCK and MOSI low, every chip
    /// select high (inactive for active-low devices).
    pub fn new(mut gpio: G, delay: D, pins: PinMap) -> Result<Self> {
        pins.validate()?;

        gpio.set_direction(pins.outputs(), Direction::Output);
        if !pins.miso.is_empty() {
            gpio.set_direction(pins.miso, Direction::Input);
        }
        gpio.set(pins.all_cs(), pins.sck | pins.mosi);

        log::debug!(
            "engine: sck={:#x} mosi={:#x} miso={:#x} cs={}",
            pins.sck.bits(),
            pins.mosi.bits(),
            pins.miso.bits(),
            pins.cs.len()
        );

        Ok(Self {
            gpio,
            delay,
            pins,
            half_period_ns: 0,
            divider: None,
            shifter: None,
        })
    }

    /// Attach a hardware shift register for the word fast path
    pub fn with_shift_register<S>(mut self, shifter: S) -> Self
    where
        S: ShiftRegister + Send + 'static,
    {
        self.shifter = Some(Box::new(shifter));
        self
    }

    /// Signal assignment
    pub fn pins(&self) -> &PinMap {
        &self.pins
    }

    /// Whether a hardware shift register is attached
    pub fn has_shift_register(&self) -> bool {
        self.shifter.is_some()
    }

    /// Current bit-banged half-period delay
    pub fn half_period_ns(&self) -> u32 {
        self.half_period_ns
    }

    /// Current hardware divider, if the speed is in its range
    pub fn divider(&self) -> Option<u32> {
        self.divider
    }

    /// The underlying lines
    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    /// Apply a new speed
    pub fn set_timing(&mut self, timing: Timing) {
        self.half_period_ns = timing.half_period_ns;
        self.divider = timing.divider;
        if let (Some(shifter), Some(divider)) = (self.shifter.as_mut(), timing.divider) {
            shifter.set_divider(divider);
        }
    }

    /// Put a freshly registered device's lines into their inactive state
    pub fn park(&mut self, dev: &Device) {
        let extra = dev.config().aux_lines | dev.config().strobe_lines;
        if !extra.is_empty() {
            self.gpio.set_direction(extra, Direction::Output);
        }
        let cs_inactive = !dev.mode().cs_active_level();
        self.gpio.set(
            dev.cs_line().when(cs_inactive),
            dev.cs_line().when(!cs_inactive) | extra,
        );
    }

    /// Assert the device's chip select and auxiliary lines
    ///
    /// SCK is moved to the device's idle level first so no stray edge is
    /// seen while selected.
    pub fn select(&mut self, dev: &Device) {
        let mode = dev.mode();
        let idle = mode.idle_clock();
        self.gpio
            .set(self.pins.sck.when(idle), self.pins.sck.when(!idle));
        self.half_delay();

        let active = mode.cs_active_level();
        let aux = dev.config().aux_lines;
        self.gpio
            .set(dev.cs_line().when(active) | aux, dev.cs_line().when(!active));
        self.half_delay();
    }

    /// Deassert the device's chip select
    ///
    /// The auxiliary lines drop with CS and the strobe lines get a pulse to
    /// commit whatever was shifted in.
    pub fn deselect(&mut self, dev: &Device) {
        let inactive = !dev.mode().cs_active_level();
        let aux = dev.config().aux_lines;
        self.gpio
            .set(dev.cs_line().when(inactive), dev.cs_line().when(!inactive) | aux);
        self.half_delay();

        let strobe = dev.config().strobe_lines;
        if !strobe.is_empty() {
            self.gpio.set(strobe, LineMask::empty());
            self.half_delay();
            self.gpio.set(LineMask::empty(), strobe);
        }
    }

    /// Busy-wait `us` microseconds
    pub fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    #[inline]
    fn half_delay(&mut self) {
        if self.half_period_ns > 0 {
            self.delay.delay_ns(self.half_period_ns);
        }
    }

    #[inline]
    fn sample_miso(&self) -> bool {
        self.gpio.get().intersects(self.pins.miso)
    }

    /// Shift one byte; returns the byte sampled from MISO (0 if `!want_rx`)
    ///
    /// `None` clocks out zeros.
    pub fn shift_byte(&mut self, tx: Option<u8>, want_rx: bool, mode: Mode) -> u8 {
        let byte = tx.unwrap_or(0);
        let lsb_first = mode.contains(Mode::LSB_FIRST);
        let idle = mode.idle_clock();
        let sck = self.pins.sck;
        let mosi = self.pins.mosi;
        let mut rx = 0u8;

        for i in 0..8 {
            let mask = if lsb_first { 1u8 << i } else { 0x80 >> i };
            let bit = byte & mask != 0;

            let sampled = if mode.contains(Mode::CPHA) {
                // Leading edge and data change together
                let active = !idle;
                self.gpio.set(
                    sck.when(active) | mosi.when(bit),
                    sck.when(!active) | mosi.when(!bit),
                );
                self.half_delay();
                let s = want_rx && self.sample_miso();
                self.gpio.set(sck.when(idle), sck.when(!idle));
                self.half_delay();
                s
            } else {
                self.gpio.set(mosi.when(bit), mosi.when(!bit));
                self.half_delay();
                self.gpio.set(sck.when(!idle), sck.when(idle));
                self.half_delay();
                let s = want_rx && self.sample_miso();
                self.gpio.set(sck.when(idle), sck.when(!idle));
                s
            };

            if sampled {
                rx |= mask;
            }
        }

        rx
    }

    fn fast_path_allowed(&self, dev: &Device, xfer: &Transfer) -> bool {
        let mode = dev.mode();
        self.shifter.is_some()
            && self.divider.is_some()
            && !dev.config().no_fast_path
            && !xfer.is_verify()
            && !mode.intersects(Mode::CPHA | Mode::LSB_FIRST)
            && xfer.len() >= WORD_BYTES
    }

    /// Run one transfer; returns the number of bytes completed
    ///
    /// A short count means a verify mismatch at that index, or a 16-bit
    /// device given an odd length.
    pub fn transfer(&mut self, dev: &Device, xfer: &mut Transfer) -> usize {
        let mode = dev.mode();
        let len = if dev.bits_per_word() == 16 {
            xfer.len() & !1
        } else {
            xfer.len()
        };
        let mut done = 0;

        if self.fast_path_allowed(dev, xfer) {
            let cmd = ShiftCommand {
                bits: 32,
                chip_select: dev.chip_select(),
                cpol: mode.idle_clock(),
            };
            while len - done >= WORD_BYTES {
                let mut out = [0u8; WORD_BYTES];
                for (i, b) in out.iter_mut().enumerate() {
                    *b = xfer.tx_byte(done + i).unwrap_or(0);
                }
                let word = u32::from_be_bytes(out);
                let received = match self.shifter.as_mut() {
                    Some(shifter) => shifter.shift(word, cmd),
                    None => break,
                };
                for (i, b) in received.to_be_bytes().into_iter().enumerate() {
                    xfer.accept_rx(done + i, b);
                }
                done += WORD_BYTES;
            }
            log::trace!("engine: {} bytes via shift register", done);
        }

        while done < len {
            let want_rx = xfer.wants_rx(done);
            let rx = self.shift_byte(xfer.tx_byte(done), want_rx, mode);
            if want_rx && !xfer.accept_rx(done, rx) {
                log::debug!(
                    "engine: verify mismatch at byte {} on {}",
                    done,
                    dev.chip_select()
                );
                return done;
            }
            done += 1;
        }

        done
    }
}
