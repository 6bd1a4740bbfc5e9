//! GPIO outputs extended through an 8-bit serial latch
//!
//! Some boards run out of fast GPIO and hang the slow signals (chip
//! selects, reset, mux enables) off a serial-in parallel-out latch. The
//! latch is loaded over two lines of the fast GPIO block (data and clock)
//! and its outputs change together when a third line strobes.
//!
//! [`LatchLines`] presents both as one [`GpioLines`] bank:
//!
//! - lines 0..=7 are the latch outputs, write-only
//! - lines 8 and above pass straight through to the underlying block
//!
//! Writes that leave the latch byte unchanged cost nothing on the serial
//! side, so SCK/MOSI on pass-through lines keep full speed.

use crate::delay::Delay;
use crate::error::{Error, Result};
use crate::gpio::{Direction, GpioLines, LineMask};

/// Lines of the latch outputs in the combined bank
pub const LATCH_LINES: LineMask = LineMask::from_bits_retain(0xFF);

/// Lines of the underlying block used to load the latch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatchPins {
    /// Serial data in
    pub data: LineMask,
    /// Shift clock (rising edge)
    pub clock: LineMask,
    /// Output register strobe (rising edge)
    pub strobe: LineMask,
}

impl LatchPins {
    fn all(&self) -> LineMask {
        self.data | self.clock | self.strobe
    }
}

/// [`GpioLines`] bank made of a latch byte plus pass-through lines
pub struct LatchLines<G, D> {
    inner: G,
    delay: D,
    pins: LatchPins,
    shadow: u8,
    bit_delay_ns: u32,
}

impl<G: GpioLines, D: Delay> LatchLines<G, D> {
    /// Take over the latch pins of `inner` and clear the latch
    pub fn new(mut inner: G, delay: D, pins: LatchPins) -> Result<Self> {
        let single = |m: LineMask| m.bits().count_ones() == 1;
        let distinct = (pins.data | pins.clock | pins.strobe).bits().count_ones() == 3;
        if !(single(pins.data) && single(pins.clock) && single(pins.strobe) && distinct) {
            log::error!("latch: data/clock/strobe must be three distinct lines: {:?}", pins);
            return Err(Error::BusMisconfigured);
        }
        if pins.all().intersects(LATCH_LINES) {
            log::error!("latch: control lines overlap the latch outputs: {:?}", pins);
            return Err(Error::BusMisconfigured);
        }

        inner.set_direction(pins.all(), Direction::Output);
        inner.set(LineMask::empty(), pins.all());

        let mut latch = Self {
            inner,
            delay,
            pins,
            shadow: 0,
            bit_delay_ns: 0,
        };
        latch.commit();
        Ok(latch)
    }

    /// Wait this long around each serial clock edge
    pub fn with_bit_delay_ns(mut self, ns: u32) -> Self {
        self.bit_delay_ns = ns;
        self
    }

    /// Current latch outputs
    pub fn latched(&self) -> u8 {
        self.shadow
    }

    /// The underlying block
    pub fn inner(&self) -> &G {
        &self.inner
    }

    fn pass_through(&self) -> LineMask {
        !(LATCH_LINES | self.pins.all())
    }

    fn wait(&mut self) {
        if self.bit_delay_ns > 0 {
            self.delay.delay_ns(self.bit_delay_ns);
        }
    }

    /// Shift the shadow byte out MSB first and strobe it into the outputs
    fn commit(&mut self) {
        let LatchPins {
            data,
            clock,
            strobe,
        } = self.pins;
        for i in (0..8).rev() {
            let bit = self.shadow >> i & 1 != 0;
            self.inner.set(data.when(bit), data.when(!bit) | clock);
            self.wait();
            self.inner.set(clock, LineMask::empty());
            self.wait();
        }
        self.inner.set(strobe, clock);
        self.wait();
        self.inner.set(LineMask::empty(), strobe);
        log::trace!("latch: committed {:#04x}", self.shadow);
    }
}

impl<G: GpioLines, D: Delay> GpioLines for LatchLines<G, D> {
    fn set(&mut self, high: LineMask, low: LineMask) {
        let pass = self.pass_through();
        let (pass_high, pass_low) = (high & pass, low & pass);
        if !(pass_high | pass_low).is_empty() {
            self.inner.set(pass_high, pass_low);
        }

        let latched = (self.shadow | (high & LATCH_LINES).bits() as u8)
            & !((low & LATCH_LINES).bits() as u8);
        if latched != self.shadow {
            self.shadow = latched;
            self.commit();
        }
    }

    fn get(&self) -> LineMask {
        (self.inner.get() & self.pass_through()) | LineMask::from_bits_retain(self.shadow as u32)
    }

    fn set_direction(&mut self, mask: LineMask, direction: Direction) {
        let pass = mask & self.pass_through();
        if !pass.is_empty() {
            self.inner.set_direction(pass, direction);
        }
        if mask.intersects(LATCH_LINES) && direction == Direction::Input {
            log::warn!("latch: lines {:#04x} are output only", (mask & LATCH_LINES).bits());
        }
    }
}
