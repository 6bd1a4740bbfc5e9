//! GPIO line abstraction
//!
//! Backends expose a bank of up to 32 lines addressed by bit position in a
//! [`LineMask`]. Lines can be driven in bulk ("these high, those low" in one
//! operation), sampled, and switched between input and output.
//!
//! The trait is infallible: pokes into a mapped GPIO block do not fail.
//! Backends that talk to a kernel interface log failures instead of
//! returning them. An unusable backend is rejected when it is constructed.

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::error::{Error, Result};

bitflags! {
    /// Set of GPIO lines, one bit per line
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LineMask: u32 {
        const _ = !0;
    }
}

impl LineMask {
    /// Mask with only line `n` set, empty if `n` is past the last line
    pub const fn line(n: u32) -> Self {
        if n < u32::BITS {
            Self::from_bits_retain(1 << n)
        } else {
            Self::empty()
        }
    }

    /// Return `self` if `cond`, otherwise the empty mask
    #[inline]
    pub fn when(self, cond: bool) -> Self {
        if cond {
            self
        } else {
            Self::empty()
        }
    }
}

/// Line direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// High impedance input
    Input,
    /// Push-pull output
    Output,
    /// Open-drain output (driven low, released high)
    OpenDrain,
}

/// GPIO line capability consumed by the bit engine
pub trait GpioLines {
    /// Drive every line in `high` high and every line in `low` low
    ///
    /// Lines in neither mask keep their level. Implementations should make
    /// the write visible on the pins before returning.
    fn set(&mut self, high: LineMask, low: LineMask);

    /// Sample all lines
    fn get(&self) -> LineMask;

    /// Configure the direction of the lines in `mask`
    fn set_direction(&mut self, mask: LineMask, direction: Direction);

    /// Drive all lines in `mask` to `value`
    fn write(&mut self, mask: LineMask, value: bool) {
        if value {
            self.set(mask, LineMask::empty());
        } else {
            self.set(LineMask::empty(), mask);
        }
    }
}

impl<G: GpioLines + ?Sized> GpioLines for alloc::boxed::Box<G> {
    fn set(&mut self, high: LineMask, low: LineMask) {
        (**self).set(high, low)
    }

    fn get(&self) -> LineMask {
        (**self).get()
    }

    fn set_direction(&mut self, mask: LineMask, direction: Direction) {
        (**self).set_direction(mask, direction)
    }
}

/// Assignment of SPI signals to lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinMap {
    /// Serial clock
    pub sck: LineMask,
    /// Master out, slave in
    pub mosi: LineMask,
    /// Master in, slave out (may be empty on write-only buses)
    pub miso: LineMask,
    /// Chip-select line for each chip-select index
    pub cs: Vec<LineMask>,
}

impl PinMap {
    /// Create a pin map without chip selects
    pub fn new(sck: LineMask, mosi: LineMask, miso: LineMask) -> Self {
        Self {
            sck,
            mosi,
            miso,
            cs: Vec::new(),
        }
    }

    /// Append a chip-select line; its index is the next free chip-select number
    pub fn with_cs(mut self, cs: LineMask) -> Self {
        self.cs.push(cs);
        self
    }

    /// Chip-select line for `index`
    pub fn cs_line(&self, index: u8) -> Option<LineMask> {
        self.cs.get(index as usize).copied()
    }

    /// All chip-select lines
    pub fn all_cs(&self) -> LineMask {
        self.cs.iter().fold(LineMask::empty(), |acc, &m| acc | m)
    }

    /// All lines the controller drives
    pub fn outputs(&self) -> LineMask {
        self.sck | self.mosi | self.all_cs()
    }

    /// Every line the bus owns
    pub fn all(&self) -> LineMask {
        self.outputs() | self.miso
    }

    /// Check that every signal has exactly one line and no line is shared
    pub fn validate(&self) -> Result<()> {
        if self.sck.bits().count_ones() != 1 || self.mosi.bits().count_ones() != 1 {
            log::error!("pin map needs exactly one SCK and one MOSI line: {:?}", self);
            return Err(Error::BusMisconfigured);
        }
        if self.miso.bits().count_ones() > 1 {
            log::error!("pin map has more than one MISO line: {:?}", self);
            return Err(Error::BusMisconfigured);
        }
        if self.cs.is_empty() {
            log::error!("pin map has no chip-select lines");
            return Err(Error::BusMisconfigured);
        }

        let mut seen = LineMask::empty();
        let signals = [self.sck, self.mosi, self.miso]
            .into_iter()
            .chain(self.cs.iter().copied());
        for mask in signals {
            if mask.intersects(seen) {
                log::error!("line {:#010x} assigned twice in pin map", mask.bits());
                return Err(Error::BusMisconfigured);
            }
            seen |= mask;
        }
        for (i, cs) in self.cs.iter().enumerate() {
            if cs.bits().count_ones() != 1 {
                log::error!("chip select {} must be exactly one line", i);
                return Err(Error::BusMisconfigured);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pins() -> PinMap {
        PinMap::new(LineMask::line(0), LineMask::line(1), LineMask::line(2))
            .with_cs(LineMask::line(3))
            .with_cs(LineMask::line(4))
    }

    #[test]
    fn test_valid_pin_map() {
        let map = pins();
        assert!(map.validate().is_ok());
        assert_eq!(map.cs_line(1), Some(LineMask::line(4)));
        assert_eq!(map.cs_line(2), None);
        assert_eq!(map.outputs().bits(), 0b11011);
        assert_eq!(map.all().bits(), 0b11111);
    }

    #[test]
    fn test_shared_line_rejected() {
        let map = pins().with_cs(LineMask::line(0));
        assert_eq!(map.validate(), Err(Error::BusMisconfigured));
    }

    #[test]
    fn test_missing_cs_rejected() {
        let map = PinMap::new(LineMask::line(0), LineMask::line(1), LineMask::line(2));
        assert_eq!(map.validate(), Err(Error::BusMisconfigured));
    }

    #[test]
    fn test_write_only_bus() {
        let map = PinMap::new(LineMask::line(0), LineMask::line(1), LineMask::empty())
            .with_cs(LineMask::line(5));
        assert!(map.validate().is_ok());
    }

    #[test]
    fn test_line_past_bank_is_empty() {
        assert_eq!(LineMask::line(31).bits(), 0x8000_0000);
        assert!(LineMask::line(32).is_empty());
        assert!(LineMask::line(u32::MAX).is_empty());
        let map = PinMap::new(LineMask::line(40), LineMask::line(1), LineMask::empty())
            .with_cs(LineMask::line(5));
        assert_eq!(map.validate(), Err(Error::BusMisconfigured));
    }

    #[test]
    fn test_when() {
        assert_eq!(LineMask::line(3).when(true), LineMask::line(3));
        assert!(LineMask::line(3).when(false).is_empty());
    }
}
