//! Speed/timing calculator
//!
//! Converts a requested SCK frequency into the delay the bit engine inserts
//! around each half period and, when the controller has a hardware shift
//! register, the clock divider that register should run at.
//!
//! All arithmetic is integer and every rounding step goes toward the slower
//! bus: the produced bit period is never shorter than `1 / hz`.

/// Nanoseconds per second
const NS_PER_SEC: u64 = 1_000_000_000;

/// Default ceiling for a bit-banged bus (50 MHz)
pub const DEFAULT_MAX_SPEED_HZ: u32 = 50_000_000;

/// Slowest clock, used for a request of 0 Hz
pub const MIN_SPEED_HZ: u32 = 1;

/// Clock divider range of a hardware shift register
///
/// The shift clock is `base_hz / divider` for `divider` in `min..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct DividerRange {
    /// Input clock of the divider
    pub base_hz: u32,
    /// Smallest usable divider (fastest clock)
    pub min: u32,
    /// Largest usable divider (slowest clock)
    pub max: u32,
}

impl DividerRange {
    /// Shift clock for `divider`, rounded up
    ///
    /// Rounding up means a divider accepted by `frequency(d) <= hz` never
    /// runs the bus faster than `hz`.
    pub fn frequency(&self, divider: u32) -> u32 {
        let divider = divider.max(1);
        self.base_hz.div_ceil(divider)
    }

    /// Smallest divider whose clock does not exceed `hz`
    pub fn divider_for(&self, hz: u32) -> Option<u32> {
        (self.min.max(1)..=self.max).find(|&d| self.frequency(d) <= hz)
    }
}

/// Board specific timing calibration, fixed for the life of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Calibration {
    /// Latency of one GPIO write round trip on the host bus
    ///
    /// This time is spent anyway on every edge, so it is subtracted from the
    /// inserted half-period delay.
    pub toggle_overhead_ns: u32,
    /// Fastest SCK the controller will run
    pub max_speed_hz: u32,
    /// Divider range of the hardware shift register, if there is one
    pub divider: Option<DividerRange>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            toggle_overhead_ns: 0,
            max_speed_hz: DEFAULT_MAX_SPEED_HZ,
            divider: None,
        }
    }
}

impl Calibration {
    /// Calibration for a bus whose GPIO writes take `toggle_overhead_ns`
    pub fn new(toggle_overhead_ns: u32) -> Self {
        Self {
            toggle_overhead_ns,
            ..Default::default()
        }
    }

    /// Set the fastest allowed SCK
    pub fn with_max_speed_hz(mut self, hz: u32) -> Self {
        self.max_speed_hz = hz;
        self
    }

    /// Attach a hardware divider range
    pub fn with_divider(mut self, divider: DividerRange) -> Self {
        self.divider = Some(divider);
        self
    }
}

/// Timing applied to the bus for one speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Effective frequency the timing was computed for
    pub hz: u32,
    /// Delay inserted in each half bit period by the bit-banged path
    pub half_period_ns: u32,
    /// Hardware shift register divider, if the speed is reachable by it
    pub divider: Option<u32>,
}

impl Timing {
    /// Bit period produced by the bit-banged path
    pub fn bitbang_period_ns(&self, calibration: &Calibration) -> u64 {
        2 * (self.half_period_ns as u64 + calibration.toggle_overhead_ns as u64)
    }
}

/// Converts requested frequencies into [`Timing`]
#[derive(Debug, Clone, Copy)]
pub struct SpeedCalculator {
    calibration: Calibration,
}

impl SpeedCalculator {
    /// Create a calculator for one controller
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }

    /// The calibration in use
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Frequency actually used for a request
    ///
    /// Zero selects the slowest representable speed (1 Hz); anything above
    /// the controller maximum is clamped down to it.
    pub fn effective_hz(&self, requested: u32) -> u32 {
        match (requested, self.calibration.max_speed_hz) {
            (0, _) => MIN_SPEED_HZ,
            (hz, 0) => hz,
            (hz, max) => hz.min(max),
        }
    }

    /// Compute the timing for `hz`
    ///
    /// `hz` is used as given (callers pass it through [`effective_hz`]);
    /// zero is treated as [`MIN_SPEED_HZ`].
    ///
    /// [`effective_hz`]: SpeedCalculator::effective_hz
    pub fn set_speed(&self, hz: u32) -> Timing {
        let hz = hz.max(MIN_SPEED_HZ);
        let half_period_ns = NS_PER_SEC
            .div_ceil(2 * hz as u64)
            .saturating_sub(self.calibration.toggle_overhead_ns as u64)
            .min(u32::MAX as u64) as u32;
        let divider = self
            .calibration
            .divider
            .as_ref()
            .and_then(|range| range.divider_for(hz));

        Timing {
            hz,
            half_period_ns,
            divider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn divider() -> DividerRange {
        // 100 MHz base, /2 .. /255
        DividerRange {
            base_hz: 100_000_000,
            min: 2,
            max: 255,
        }
    }

    #[test]
    fn test_half_period_without_overhead() {
        let calc = SpeedCalculator::new(Calibration::new(0));
        assert_eq!(calc.set_speed(1_000_000).half_period_ns, 500);
        assert_eq!(calc.set_speed(100_000).half_period_ns, 5_000);
        // 1e9 / 6 rounds up
        assert_eq!(calc.set_speed(3).half_period_ns, 166_666_667);
    }

    #[test]
    fn test_overhead_subtracted_and_clamped() {
        let calc = SpeedCalculator::new(Calibration::new(67));
        assert_eq!(calc.set_speed(1_000_000).half_period_ns, 433);
        // 50 MHz needs 10 ns per half period, the GPIO write already takes longer
        assert_eq!(calc.set_speed(50_000_000).half_period_ns, 0);
    }

    #[test]
    fn test_effective_hz() {
        let calc = SpeedCalculator::new(Calibration::new(0).with_max_speed_hz(2_000_000));
        assert_eq!(calc.effective_hz(0), MIN_SPEED_HZ);
        assert_eq!(calc.effective_hz(10_000_000), 2_000_000);
        assert_eq!(calc.effective_hz(400_000), 400_000);

        // No limit configured
        let calc = SpeedCalculator::new(Calibration::new(0).with_max_speed_hz(0));
        assert_eq!(calc.effective_hz(0), MIN_SPEED_HZ);
        assert_eq!(calc.effective_hz(80_000_000), 80_000_000);
    }

    #[test]
    fn test_divider_selection() {
        let range = divider();
        // Exact
        assert_eq!(range.divider_for(50_000_000), Some(2));
        assert_eq!(range.divider_for(25_000_000), Some(4));
        // Between values rounds to the slower side
        assert_eq!(range.divider_for(30_000_000), Some(4));
        // 100 MHz / 3 = 33.33 MHz exceeds 33 MHz
        assert_eq!(range.divider_for(33_000_000), Some(4));
        // Faster than the minimum divider allows
        assert_eq!(range.divider_for(90_000_000), Some(2));
        // Below the dynamic range
        assert_eq!(range.divider_for(100_000), None);
    }

    #[test]
    fn test_fallback_to_delay_below_divider_range() {
        let calc = SpeedCalculator::new(Calibration::new(12).with_divider(divider()));
        let t = calc.set_speed(10_000);
        assert_eq!(t.divider, None);
        assert_eq!(t.half_period_ns, 50_000 - 12);

        let t = calc.set_speed(10_000_000);
        assert_eq!(t.divider, Some(10));
    }

    #[test]
    fn test_speed_monotonic() {
        let calc = SpeedCalculator::new(Calibration::new(25).with_divider(divider()));
        let speeds = [
            1, 7, 999, 10_000, 99_999, 392_157, 400_000, 1_000_000, 3_333_333, 12_500_000,
            33_000_000, 50_000_000,
        ];
        for pair in speeds.windows(2) {
            let slow = calc.set_speed(pair[0]);
            let fast = calc.set_speed(pair[1]);
            assert!(slow.half_period_ns >= fast.half_period_ns, "{:?}", pair);
            if let (Some(ds), Some(df)) = (slow.divider, fast.divider) {
                assert!(ds >= df, "{:?}", pair);
            }
            // Once reachable by the divider, faster speeds stay reachable
            if slow.divider.is_some() {
                assert!(fast.divider.is_some(), "{:?}", pair);
            }
        }
    }

    #[test]
    fn test_speed_never_exceeds_request() {
        let cal = Calibration::new(40).with_divider(divider());
        let calc = SpeedCalculator::new(cal);
        for hz in (1..2_000u32)
            .map(|i| i * 24_989)
            .chain([1, 2, 3, 333_333, 49_999_999])
        {
            let t = calc.set_speed(hz);
            // period >= 1 / hz  <=>  period_ns * hz >= 1e9
            assert!(
                t.bitbang_period_ns(&cal) * hz as u64 >= NS_PER_SEC,
                "bitbang too fast at {} Hz",
                hz
            );
            if let Some(d) = t.divider {
                // base / d <= hz
                assert!(
                    d as u64 * hz as u64 >= divider().base_hz as u64,
                    "divider too fast at {} Hz",
                    hz
                );
            }
        }
    }
}
