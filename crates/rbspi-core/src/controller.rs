//! Queue and deferred-work dispatcher
//!
//! A [`Controller`] owns one bus. Messages submitted from any thread are
//! queued and drained by a dedicated worker thread which runs them through
//! the [`Sequencer`] and then fires their completion callbacks.
//!
//! Locking:
//!
//! - the queue state (pending Messages, busy flag, scheduling copy of the
//!   held chip select) sits behind one mutex paired with a condvar
//! - the sequencer and engine sit behind a second mutex, held for the whole
//!   of one Message
//!
//! When both are needed the bus lock is taken first. Completion callbacks
//! run with neither lock held, so they may submit further Messages.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::delay::Delay;
use crate::device::{ChipSelect, Device, DeviceConfig, Mode};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::gpio::GpioLines;
use crate::message::Message;
use crate::sequencer::Sequencer;
use crate::timing::Calibration;

/// Lock a mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Message>,
    busy: bool,
    held: Option<ChipSelect>,
    shutdown: bool,
    registered: Vec<u8>,
}

impl QueueState {
    /// First Message for the device holding CS, else the oldest one
    fn take_next(&mut self) -> Option<Message> {
        let index = self
            .held
            .and_then(|cs| {
                self.queue
                    .iter()
                    .position(|msg| msg.device().chip_select() == cs)
            })
            .unwrap_or(0);
        self.queue.remove(index)
    }
}

struct Shared<G, D> {
    name: String,
    state: Mutex<QueueState>,
    wake: Condvar,
    bus: Mutex<Sequencer<G, D>>,
}

impl<G: GpioLines, D: Delay> Shared<G, D> {
    fn worker(&self) {
        log::debug!("{}: worker started", self.name);
        loop {
            let mut msg = {
                let mut state = lock(&self.state);
                loop {
                    if state.shutdown {
                        log::debug!("{}: worker stopped", self.name);
                        return;
                    }
                    if let Some(msg) = state.take_next() {
                        break msg;
                    }
                    state.busy = false;
                    state = self
                        .wake
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };

            {
                let mut bus = lock(&self.bus);
                let held = bus.process_message(&mut msg);
                lock(&self.state).held = held;
            }

            log::trace!(
                "{}: {} done, {} bytes, {:?}",
                self.name,
                msg.device().chip_select(),
                msg.actual_length(),
                msg.status()
            );
            msg.complete();
        }
    }
}

/// SPI bus controller with a worker thread
pub struct Controller<G, D>
where
    G: GpioLines + Send + 'static,
    D: Delay + Send + 'static,
{
    shared: Arc<Shared<G, D>>,
    worker: Option<JoinHandle<()>>,
}

impl<G, D> Controller<G, D>
where
    G: GpioLines + Send + 'static,
    D: Delay + Send + 'static,
{
    /// Take over `engine` and start the worker thread `<name>-worker`
    pub fn new(name: &str, engine: Engine<G, D>, calibration: Calibration) -> Result<Self> {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            state: Mutex::new(QueueState::default()),
            wake: Condvar::new(),
            bus: Mutex::new(Sequencer::new(engine, calibration)),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("{}-worker", name))
            .spawn(move || worker_shared.worker())
            .map_err(|e| {
                log::error!("{}: failed to start worker thread: {}", name, e);
                Error::BusMisconfigured
            })?;

        log::info!(
            "{}: controller up, max {} Hz, toggle overhead {} ns",
            name,
            calibration.max_speed_hz,
            calibration.toggle_overhead_ns
        );

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Bus name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Validate `config` and claim its chip select
    ///
    /// The device's chip select, auxiliary and strobe lines are driven to
    /// their inactive levels.
    pub fn register_device(&self, config: DeviceConfig) -> Result<Device> {
        let name = &self.shared.name;
        let mut bus = lock(&self.shared.bus);
        let engine = bus.engine();

        let cs_line = engine.pins().cs_line(config.chip_select).ok_or_else(|| {
            log::error!(
                "{}: chip select {} out of range (bus has {})",
                name,
                config.chip_select,
                engine.pins().cs.len()
            );
            Error::InvalidChipSelect
        })?;

        match config.bits_per_word {
            8 => {}
            16 if engine.has_shift_register() => {}
            bits => {
                log::error!(
                    "{}: {} bits per word not supported on cs{}",
                    name,
                    bits,
                    config.chip_select
                );
                return Err(Error::UnsupportedMode);
            }
        }

        let unknown = config.mode.bits() & !Mode::all().bits();
        if unknown != 0 {
            log::error!("{}: unsupported mode bits {:#04x}", name, unknown);
            return Err(Error::UnsupportedMode);
        }

        let extra = config.aux_lines | config.strobe_lines;
        if extra.intersects(engine.pins().all()) {
            log::error!(
                "{}: aux/strobe lines {:#x} overlap the bus pins",
                name,
                extra.bits()
            );
            return Err(Error::BusMisconfigured);
        }

        {
            let mut state = lock(&self.shared.state);
            if state.registered.contains(&config.chip_select) {
                log::error!("{}: cs{} already registered", name, config.chip_select);
                return Err(Error::ChipSelectInUse);
            }
            state.registered.push(config.chip_select);
        }

        let dev = Device::new(config, cs_line);
        bus.park(&dev);
        log::debug!(
            "{}: registered {} mode {:?} at {} Hz",
            name,
            dev.chip_select(),
            dev.mode(),
            dev.max_speed_hz()
        );
        Ok(dev)
    }

    /// Queue `msg`; its completion callback runs on the worker thread
    pub fn submit(&self, msg: Message) {
        let mut state = lock(&self.shared.state);
        state.queue.push_back(msg);
        if !state.busy {
            state.busy = true;
            self.shared.wake.notify_one();
        }
    }

    /// Queue `msg` and block until it completes
    ///
    /// Any completion callback already set on `msg` is replaced.
    pub fn submit_and_wait(&self, msg: Message) -> Result<Message> {
        let (tx, rx) = mpsc::channel();
        self.submit(msg.with_completion(move |done| {
            let _ = tx.send(done);
        }));
        rx.recv().map_err(|_| {
            log::error!("{}: worker gone before completion", self.shared.name);
            Error::Cancelled
        })
    }

    /// Run `msg` on the calling thread, bypassing the queue
    ///
    /// If the worker is busy or another device holds the chip select, that
    /// chip select is released first. The finished Message is returned;
    /// its completion callback is not invoked.
    pub fn submit_atomic(&self, mut msg: Message) -> Message {
        let cs = msg.device().chip_select();
        let mut bus = lock(&self.shared.bus);

        let busy = lock(&self.shared.state).busy;
        let foreign = bus.held().is_some_and(|held| held != cs);
        if busy || foreign {
            log::warn!(
                "{}: atomic transfer for {} while {}, releasing {:?}",
                self.shared.name,
                cs,
                if busy { "queue busy" } else { "CS held" },
                bus.held()
            );
            bus.release();
        }

        let held = bus.process_message(&mut msg);
        lock(&self.shared.state).held = held;
        msg
    }

    /// No Message queued or in flight
    pub fn is_idle(&self) -> bool {
        let state = lock(&self.shared.state);
        !state.busy && state.queue.is_empty()
    }

    /// Chip select left asserted by the last Message
    pub fn held_chip_select(&self) -> Option<ChipSelect> {
        lock(&self.shared.state).held
    }
}

impl<G, D> Drop for Controller<G, D>
where
    G: GpioLines + Send + 'static,
    D: Delay + Send + 'static,
{
    fn drop(&mut self) {
        let cancelled: Vec<Message> = {
            let mut state = lock(&self.shared.state);
            state.shutdown = true;
            state.queue.drain(..).collect()
        };
        self.shared.wake.notify_all();

        if !cancelled.is_empty() {
            log::debug!(
                "{}: cancelling {} queued messages",
                self.shared.name,
                cancelled.len()
            );
        }
        for msg in cancelled {
            msg.cancel();
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("{}: worker thread panicked", self.shared.name);
            }
        }

        let mut bus = lock(&self.shared.bus);
        bus.release();
        lock(&self.shared.state).held = None;
    }
}
