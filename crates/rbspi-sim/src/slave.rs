//! Slave device models

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A device on the simulated bus, seen a byte at a time
///
/// The bus takes care of clock edges, phase and bit order; the device only
/// deals in whole bytes.
pub trait SlaveDevice: Send {
    /// Chip select went active
    fn select(&mut self) {}

    /// Byte to shift out on MISO next
    ///
    /// Called before the first clock of every byte. The byte received in
    /// the previous slot has already been passed to [`receive`].
    ///
    /// [`receive`]: SlaveDevice::receive
    fn next_out(&mut self) -> u8;

    /// A full byte arrived on MOSI
    fn receive(&mut self, byte: u8);

    /// Chip select went inactive
    fn deselect(&mut self) {}
}

impl<S: SlaveDevice + ?Sized> SlaveDevice for Box<S> {
    fn select(&mut self) {
        (**self).select()
    }

    fn next_out(&mut self) -> u8 {
        (**self).next_out()
    }

    fn receive(&mut self, byte: u8) {
        (**self).receive(byte)
    }

    fn deselect(&mut self) {
        (**self).deselect()
    }
}

#[derive(Debug, Default)]
struct Script {
    reply: Vec<u8>,
    pending: VecDeque<u8>,
    current: Option<Vec<u8>>,
    frames: Vec<Vec<u8>>,
}

/// Device that replays a fixed reply and records what it receives
///
/// Every selection starts the reply from the beginning; once exhausted the
/// device leaves MISO high (0xFF). Clones share the recording, so a test
/// can keep one and attach the other.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    script: Arc<Mutex<Script>>,
}

impl ScriptedDevice {
    /// Device answering `reply` on every selection
    pub fn new(reply: Vec<u8>) -> Self {
        let script = Script {
            reply,
            ..Default::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }

    /// Bytes received, one entry per completed selection
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    /// Bytes received in the selection still in progress
    pub fn current(&self) -> Option<Vec<u8>> {
        self.lock().current.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SlaveDevice for ScriptedDevice {
    fn select(&mut self) {
        let mut script = self.lock();
        script.pending = script.reply.iter().copied().collect();
        script.current = Some(Vec::new());
    }

    fn next_out(&mut self) -> u8 {
        self.lock().pending.pop_front().unwrap_or(0xFF)
    }

    fn receive(&mut self, byte: u8) {
        if let Some(frame) = self.lock().current.as_mut() {
            frame.push(byte);
        }
    }

    fn deselect(&mut self) {
        let mut script = self.lock();
        if let Some(frame) = script.current.take() {
            script.frames.push(frame);
        }
    }
}
