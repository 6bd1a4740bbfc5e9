//! Simulated GPIO block with SPI slaves hanging off it
//!
//! [`SimBus`] keeps the line levels, a nanosecond clock and a trace of every
//! write. Attached slaves watch their chip select and SCK edges and drive
//! MISO according to their own mode, so a master with the wrong phase or
//! bit order reads garbage just as it would on a board.
//!
//! The handles ([`SimGpio`], [`SimDelay`], [`SimShifter`]) all share the one
//! state and can be moved into an engine running on another thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rbspi_core::{
    Delay, Direction, Engine, GpioLines, LineMask, Mode, PinMap, ShiftCommand, ShiftRegister,
};

use crate::slave::SlaveDevice;

/// One recorded GPIO write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent {
    /// Simulated time of the write
    pub at_ns: u64,
    /// Line levels after the write
    pub levels: LineMask,
}

struct Attached {
    chip_select: u8,
    cs_line: LineMask,
    mode: Mode,
    device: Box<dyn SlaveDevice>,
    selected: bool,
    selections: usize,
    /// Byte being shifted out, loaded on demand
    out: Option<u8>,
    rx: u8,
    bit: u8,
}

impl Attached {
    fn is_active(&self, levels: LineMask) -> bool {
        levels.contains(self.cs_line) == self.mode.contains(Mode::CS_HIGH)
    }

    fn mask(&self, bit: u8) -> u8 {
        if self.mode.contains(Mode::LSB_FIRST) {
            1 << bit
        } else {
            0x80 >> bit
        }
    }

    fn load(&mut self) -> u8 {
        match self.out {
            Some(byte) => byte,
            None => {
                let byte = self.device.next_out();
                self.out = Some(byte);
                byte
            }
        }
    }

    /// Level this slave puts on MISO for the current bit
    fn drive(&mut self) -> bool {
        let byte = self.load();
        byte & self.mask(self.bit) != 0
    }

    fn sample(&mut self, mosi: bool) {
        if mosi {
            self.rx |= self.mask(self.bit);
        }
    }

    fn end_bit(&mut self) {
        self.bit += 1;
        if self.bit == 8 {
            self.device.receive(self.rx);
            self.rx = 0;
            self.bit = 0;
            self.out = None;
        }
    }

    fn select(&mut self) {
        self.selected = true;
        self.selections += 1;
        self.out = None;
        self.rx = 0;
        self.bit = 0;
        self.device.select();
    }

    fn deselect(&mut self) {
        if self.bit != 0 {
            log::warn!(
                "sim: cs{} deselected after {} stray bits",
                self.chip_select,
                self.bit
            );
        }
        self.selected = false;
        self.out = None;
        self.device.deselect();
    }
}

struct SimState {
    pins: PinMap,
    levels: LineMask,
    outputs: LineMask,
    now_ns: u64,
    toggle_ns: u32,
    trace: Vec<TraceEvent>,
    tracing: bool,
    slaves: Vec<Attached>,
    /// Level driven by the selected slave; pulled high otherwise
    miso: Option<bool>,
    hw_words: usize,
}

impl SimState {
    fn write(&mut self, high: LineMask, low: LineMask) {
        let before = self.levels;
        let after = (before | high) & !low;
        self.levels = after;
        self.now_ns += self.toggle_ns as u64;
        if self.tracing {
            self.trace.push(TraceEvent {
                at_ns: self.now_ns,
                levels: after,
            });
        }

        let sck = self.pins.sck;
        let mosi = after.contains(self.pins.mosi);
        let sck_changed = before.contains(sck) != after.contains(sck);

        for slave in &mut self.slaves {
            let was = slave.selected;
            let now = slave.is_active(after);
            if now && !was {
                slave.select();
                if !slave.mode.contains(Mode::CPHA) {
                    self.miso = Some(slave.drive());
                }
                continue;
            }
            if was && !now {
                slave.deselect();
                self.miso = None;
                continue;
            }
            if !now || !sck_changed {
                continue;
            }

            let idle = slave.mode.contains(Mode::CPOL);
            let leading = after.contains(sck) != idle;
            match (slave.mode.contains(Mode::CPHA), leading) {
                // CPHA=0: sample on leading, shift on trailing
                (false, true) => slave.sample(mosi),
                (false, false) => {
                    slave.end_bit();
                    self.miso = Some(slave.drive());
                }
                // CPHA=1: shift on leading, sample on trailing
                (true, true) => self.miso = Some(slave.drive()),
                (true, false) => {
                    slave.sample(mosi);
                    slave.end_bit();
                }
            }
        }
    }

    fn read(&self) -> LineMask {
        let mut levels = self.levels - self.pins.miso;
        if self.miso.unwrap_or(true) {
            levels |= self.pins.miso;
        }
        levels
    }

    /// Move one byte through the selected slave without clock edges
    fn exchange(&mut self, tx: u8) -> u8 {
        let Some(slave) = self.slaves.iter_mut().find(|s| s.selected) else {
            return 0xFF;
        };
        if slave.bit != 0 {
            log::warn!("sim: word shift on cs{} mid-byte", slave.chip_select);
        }
        let rx = slave.load();
        slave.device.receive(tx);
        slave.out = None;
        slave.rx = 0;
        slave.bit = 0;
        if !slave.mode.contains(Mode::CPHA) {
            self.miso = Some(slave.drive());
        }
        rx
    }
}

/// Handle to a simulated bus
#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    /// Bus with the given signal assignment; SCK, MOSI and every CS start low
    pub fn new(pins: PinMap) -> Self {
        let state = SimState {
            pins,
            levels: LineMask::empty(),
            outputs: LineMask::empty(),
            now_ns: 0,
            toggle_ns: 0,
            trace: Vec::new(),
            tracing: true,
            slaves: Vec::new(),
            miso: None,
            hw_words: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Charge `ns` of simulated time for every GPIO write
    pub fn with_toggle_ns(self, ns: u32) -> Self {
        self.lock().toggle_ns = ns;
        self
    }

    /// Stop recording writes; long transfers otherwise grow the trace
    /// without bound
    pub fn without_trace(self) -> Self {
        self.lock().tracing = false;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signal assignment
    pub fn pins(&self) -> PinMap {
        self.lock().pins.clone()
    }

    /// GPIO handle
    pub fn gpio(&self) -> SimGpio {
        SimGpio {
            state: Arc::clone(&self.state),
        }
    }

    /// Delay handle advancing the simulated clock
    pub fn delay(&self) -> SimDelay {
        SimDelay {
            state: Arc::clone(&self.state),
        }
    }

    /// Hardware shift register clocked from `base_hz`
    pub fn shift_register(&self, base_hz: u32) -> SimShifter {
        SimShifter {
            state: Arc::clone(&self.state),
            base_hz,
            divider: 1,
            data: 0,
            received: 0,
        }
    }

    /// Engine over this bus's pins
    pub fn engine(&self) -> rbspi_core::Result<Engine<SimGpio, SimDelay>> {
        Engine::new(self.gpio(), self.delay(), self.pins())
    }

    /// Put `device` on chip select `chip_select`, talking in `mode`
    pub fn attach<S>(&self, chip_select: u8, mode: Mode, device: S) -> rbspi_core::Result<()>
    where
        S: SlaveDevice + 'static,
    {
        let mut state = self.lock();
        let cs_line = state.pins.cs_line(chip_select).ok_or_else(|| {
            log::error!("sim: no chip select {}", chip_select);
            rbspi_core::Error::InvalidChipSelect
        })?;
        // Selection starts with the next write that drives the CS active
        state.slaves.push(Attached {
            chip_select,
            cs_line,
            mode,
            device: Box::new(device),
            selected: false,
            selections: 0,
            out: None,
            rx: 0,
            bit: 0,
        });
        Ok(())
    }

    /// Every GPIO write so far
    pub fn trace(&self) -> Vec<TraceEvent> {
        self.lock().trace.clone()
    }

    /// Forget the trace
    pub fn clear_trace(&self) {
        self.lock().trace.clear();
    }

    /// Level of `line` after each write where it changed
    pub fn line_history(&self, line: LineMask) -> Vec<(u64, bool)> {
        let state = self.lock();
        let mut out: Vec<(u64, bool)> = Vec::new();
        for event in &state.trace {
            let level = event.levels.contains(line);
            if out.last().map(|&(_, l)| l) != Some(level) {
                out.push((event.at_ns, level));
            }
        }
        out
    }

    /// Simulated time
    pub fn now_ns(&self) -> u64 {
        self.lock().now_ns
    }

    /// Current line levels as the master would sample them
    pub fn levels(&self) -> LineMask {
        self.lock().read()
    }

    /// Lines configured as outputs
    pub fn outputs(&self) -> LineMask {
        self.lock().outputs
    }

    /// How often the slave on `chip_select` has been selected
    pub fn selections(&self, chip_select: u8) -> usize {
        self.lock()
            .slaves
            .iter()
            .filter(|s| s.chip_select == chip_select)
            .map(|s| s.selections)
            .sum()
    }

    /// 32-bit words moved by the shift register
    pub fn hw_words(&self) -> usize {
        self.lock().hw_words
    }
}

/// [`GpioLines`] view of a [`SimBus`]
pub struct SimGpio {
    state: Arc<Mutex<SimState>>,
}

impl SimGpio {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GpioLines for SimGpio {
    fn set(&mut self, high: LineMask, low: LineMask) {
        self.lock().write(high, low);
    }

    fn get(&self) -> LineMask {
        self.lock().read()
    }

    fn set_direction(&mut self, mask: LineMask, direction: Direction) {
        let mut state = self.lock();
        match direction {
            Direction::Input => state.outputs -= mask,
            Direction::Output | Direction::OpenDrain => state.outputs |= mask,
        }
    }
}

/// [`Delay`] that advances the simulated clock instead of waiting
pub struct SimDelay {
    state: Arc<Mutex<SimState>>,
}

impl Delay for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now_ns += ns as u64;
    }
}

/// [`ShiftRegister`] exchanging whole words with the selected slave
pub struct SimShifter {
    state: Arc<Mutex<SimState>>,
    base_hz: u32,
    divider: u32,
    data: u32,
    received: u32,
}

impl ShiftRegister for SimShifter {
    fn set_divider(&mut self, divider: u32) {
        self.divider = divider.max(1);
    }

    fn write_data(&mut self, word: u32) {
        self.data = word;
    }

    fn write_command(&mut self, cmd: ShiftCommand) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let bytes = (cmd.bits as usize).div_ceil(8).min(4);
        let mut received = [0u8; 4];
        for (i, b) in self.data.to_be_bytes().into_iter().take(bytes).enumerate() {
            received[i] = state.exchange(b);
        }
        self.received = u32::from_be_bytes(received);

        let period_ns = (self.divider as u64 * 1_000_000_000).div_ceil(self.base_hz.max(1) as u64);
        state.now_ns += period_ns * cmd.bits as u64;
        state.hw_words += 1;
    }

    fn read_data(&mut self) -> u32 {
        self.received
    }
}
