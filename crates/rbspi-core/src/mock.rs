//! Recording GPIO block and clock for unit tests

use std::sync::{Arc, Mutex};

use crate::delay::Delay;
use crate::gpio::{Direction, GpioLines, LineMask, PinMap};

pub(crate) const SCK: LineMask = LineMask::line(0);
pub(crate) const MOSI: LineMask = LineMask::line(1);
pub(crate) const MISO: LineMask = LineMask::line(2);
pub(crate) const CS0: LineMask = LineMask::line(3);
pub(crate) const CS1: LineMask = LineMask::line(4);

pub(crate) fn pins() -> PinMap {
    PinMap::new(SCK, MOSI, MISO).with_cs(CS0).with_cs(CS1)
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub levels: LineMask,
    pub now_ns: u64,
    /// (time, levels after the write) for every `set`
    pub log: Vec<(u64, LineMask)>,
    pub directions: Vec<(LineMask, Direction)>,
    /// MISO follows MOSI
    pub loopback: bool,
    pub write_ns: u32,
}

/// Shared handle; clones see the same lines and clock
#[derive(Debug, Clone, Default)]
pub(crate) struct MockBus(pub Arc<Mutex<State>>);

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loopback() -> Self {
        let bus = Self::new();
        bus.state().loopback = true;
        bus
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.0.lock().unwrap()
    }

    pub fn log(&self) -> Vec<(u64, LineMask)> {
        self.state().log.clone()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    /// Level of `line` after each write where it changed
    pub fn edges(&self, line: LineMask) -> Vec<(u64, bool)> {
        let state = self.state();
        let mut out = Vec::new();
        let mut last = None;
        for &(at, levels) in &state.log {
            let level = levels.contains(line);
            if last != Some(level) {
                out.push((at, level));
                last = Some(level);
            }
        }
        out
    }
}

impl GpioLines for MockBus {
    fn set(&mut self, high: LineMask, low: LineMask) {
        let mut state = self.state();
        state.levels = (state.levels | high) & !low;
        state.now_ns += state.write_ns as u64;
        let entry = (state.now_ns, state.levels);
        state.log.push(entry);
    }

    fn get(&self) -> LineMask {
        let state = self.state();
        let mut levels = state.levels - MISO;
        if state.loopback && state.levels.contains(MOSI) {
            levels |= MISO;
        }
        levels
    }

    fn set_direction(&mut self, mask: LineMask, direction: Direction) {
        self.state().directions.push((mask, direction));
    }
}

impl Delay for MockBus {
    fn delay_ns(&mut self, ns: u32) {
        self.state().now_ns += ns as u64;
    }
}
