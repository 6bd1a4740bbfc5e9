//! Precise delays between clock edges
//!
//! Bit timing needs sub-tick precision, so production delays spin instead of
//! sleeping. Tests inject a clock that only counts nanoseconds.

/// Busy-wait capability
pub trait Delay {
    /// Wait at least `ns` nanoseconds
    fn delay_ns(&mut self, ns: u32);

    /// Wait at least `us` microseconds
    fn delay_us(&mut self, us: u32) {
        for _ in 0..us / 1000 {
            self.delay_ns(1_000_000);
        }
        let rest = us % 1000;
        if rest > 0 {
            self.delay_ns(rest * 1000);
        }
    }
}

impl<D: Delay + ?Sized> Delay for alloc::boxed::Box<D> {
    fn delay_ns(&mut self, ns: u32) {
        (**self).delay_ns(ns)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// Spinning delay on the monotonic clock
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinDelay;

#[cfg(feature = "std")]
impl Delay for SpinDelay {
    fn delay_ns(&mut self, ns: u32) {
        if ns == 0 {
            return;
        }
        let deadline = std::time::Instant::now() + std::time::Duration::from_nanos(ns as u64);
        while std::time::Instant::now() < deadline {
            core::hint::spin_loop();
        }
    }
}
