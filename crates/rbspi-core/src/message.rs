//! Messages and transfers
//!
//! A [`Message`] is the unit a driver submits: an ordered list of
//! [`Transfer`]s for one device, a completion callback and the result
//! fields the controller fills in.
//!
//! Buffer alignment inside a transfer of `len` bytes:
//!
//! - the transmit buffer starts at byte 0; bytes past its end are clocked
//!   out as zero
//! - the receive (or verify) buffer ends at byte `len - 1`, so a buffer
//!   shorter than the transfer captures the reply that follows a command

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::device::Device;
use crate::error::{Error, Result};

/// Completion callback; receives the finished Message back by value
pub type Completion = Box<dyn FnOnce(Message) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum RxBuf {
    None,
    Store(Vec<u8>),
    Verify(Vec<u8>),
}

/// One contiguous data movement within a Message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    tx: Option<Vec<u8>>,
    rx: RxBuf,
    len: usize,
    speed_hz: Option<u32>,
    cs_change: bool,
    delay_us: u32,
}

impl Transfer {
    /// Clock out `data`, discard what comes back
    pub fn write(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            tx: Some(data),
            rx: RxBuf::None,
            len,
            speed_hz: None,
            cs_change: false,
            delay_us: 0,
        }
    }

    /// Clock out `len` zero bytes and keep what comes back
    pub fn read(len: usize) -> Self {
        Self {
            tx: None,
            rx: RxBuf::Store(vec![0; len]),
            len,
            speed_hz: None,
            cs_change: false,
            delay_us: 0,
        }
    }

    /// Clock `len` bytes: `tx` from the start, `rx_len` bytes captured at the end
    ///
    /// `tx` and `rx_len` are truncated to `len`.
    pub fn full_duplex(mut tx: Vec<u8>, rx_len: usize, len: usize) -> Self {
        tx.truncate(len);
        Self {
            tx: Some(tx),
            rx: RxBuf::Store(vec![0; rx_len.min(len)]),
            len,
            speed_hz: None,
            cs_change: false,
            delay_us: 0,
        }
    }

    /// Clock out `tx` (or zeros) and compare what comes back with `expected`
    ///
    /// Stops at the first mismatch; the controller then reports a
    /// `TransferSizeMismatch` and the index reached as the length.
    pub fn verify(tx: Option<Vec<u8>>, expected: Vec<u8>) -> Self {
        let len = tx
            .as_ref()
            .map_or(expected.len(), |t| t.len().max(expected.len()));
        Self {
            tx,
            rx: RxBuf::Verify(expected),
            len,
            speed_hz: None,
            cs_change: false,
            delay_us: 0,
        }
    }

    /// Clock `len` zero bytes, discard what comes back
    pub fn dummy(len: usize) -> Self {
        Self {
            tx: None,
            rx: RxBuf::None,
            len,
            speed_hz: None,
            cs_change: false,
            delay_us: 0,
        }
    }

    /// Override the device speed for this transfer
    pub fn with_speed_hz(mut self, hz: u32) -> Self {
        self.speed_hz = Some(hz);
        self
    }

    /// Toggle CS after this transfer, or keep it held if this is the last one
    pub fn with_cs_change(mut self) -> Self {
        self.cs_change = true;
        self
    }

    /// Wait `us` after this transfer before any CS change
    pub fn with_delay_us(mut self, us: u32) -> Self {
        self.delay_us = us;
        self
    }

    /// Number of bytes clocked
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the transfer clocks no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Speed override
    pub fn speed_hz(&self) -> Option<u32> {
        self.speed_hz
    }

    /// CS change flag
    pub fn cs_change(&self) -> bool {
        self.cs_change
    }

    /// Post-transfer delay
    pub fn delay_us(&self) -> u32 {
        self.delay_us
    }

    /// Whether received bytes are compared instead of stored
    pub fn is_verify(&self) -> bool {
        matches!(self.rx, RxBuf::Verify(_))
    }

    /// Transmit buffer
    pub fn tx_buf(&self) -> Option<&[u8]> {
        self.tx.as_deref()
    }

    /// Receive buffer (the expected data in verify mode)
    pub fn rx_buf(&self) -> Option<&[u8]> {
        match &self.rx {
            RxBuf::None => None,
            RxBuf::Store(buf) | RxBuf::Verify(buf) => Some(buf),
        }
    }

    /// Take the receive buffer out of the transfer
    pub fn into_rx(self) -> Option<Vec<u8>> {
        match self.rx {
            RxBuf::Store(buf) => Some(buf),
            _ => None,
        }
    }

    /// Byte to clock out at `index`; `None` when there is no transmit data there
    #[inline]
    pub fn tx_byte(&self, index: usize) -> Option<u8> {
        self.tx.as_ref().and_then(|tx| tx.get(index).copied())
    }

    fn rx_offset(&self, buf: &[u8]) -> usize {
        self.len - buf.len().min(self.len)
    }

    /// Whether the byte received at `index` is stored or compared
    #[inline]
    pub fn wants_rx(&self, index: usize) -> bool {
        match &self.rx {
            RxBuf::None => false,
            RxBuf::Store(buf) | RxBuf::Verify(buf) => index >= self.rx_offset(buf),
        }
    }

    /// Hand the byte received at `index` to the transfer
    ///
    /// Returns false in verify mode when it differs from the expected byte.
    #[inline]
    pub fn accept_rx(&mut self, index: usize, byte: u8) -> bool {
        let offset = match &self.rx {
            RxBuf::None => return true,
            RxBuf::Store(buf) | RxBuf::Verify(buf) => self.rx_offset(buf),
        };
        if index < offset {
            return true;
        }
        match &mut self.rx {
            RxBuf::Store(buf) => {
                buf[index - offset] = byte;
                true
            }
            RxBuf::Verify(buf) => buf[index - offset] == byte,
            RxBuf::None => true,
        }
    }
}

/// A client-submitted unit of work
pub struct Message {
    device: Device,
    transfers: Vec<Transfer>,
    status: Result<()>,
    actual_length: usize,
    complete: Option<Completion>,
}

impl Message {
    /// Empty message for `device`
    ///
    /// Submitted without transfers it releases any chip select held on the bus.
    pub fn new(device: Device) -> Self {
        Self {
            device,
            transfers: Vec::new(),
            status: Ok(()),
            actual_length: 0,
            complete: None,
        }
    }

    /// Append a transfer
    pub fn with_transfer(mut self, transfer: Transfer) -> Self {
        self.transfers.push(transfer);
        self
    }

    /// Append a transfer in place
    pub fn push(&mut self, transfer: Transfer) {
        self.transfers.push(transfer);
    }

    /// Call `f` with the finished message
    pub fn with_completion<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Message) + Send + 'static,
    {
        self.complete = Some(Box::new(f));
        self
    }

    /// Target device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Transfers in order
    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    /// Take the transfers (and their receive buffers) out
    pub fn into_transfers(self) -> Vec<Transfer> {
        self.transfers
    }

    /// Result of the last run
    pub fn status(&self) -> Result<()> {
        self.status
    }

    /// Bytes moved in the last run
    pub fn actual_length(&self) -> usize {
        self.actual_length
    }

    /// Total bytes the transfers ask for
    pub fn total_len(&self) -> usize {
        self.transfers.iter().map(Transfer::len).sum()
    }

    pub(crate) fn begin(&mut self) {
        self.status = Ok(());
        self.actual_length = 0;
    }

    pub(crate) fn parts_mut(&mut self) -> (Device, &mut [Transfer]) {
        (self.device, &mut self.transfers)
    }

    pub(crate) fn finish(&mut self, actual_length: usize, status: Result<()>) {
        self.actual_length = actual_length;
        self.status = status;
    }

    /// Fire the completion callback, if any
    pub(crate) fn complete(mut self) {
        if let Some(f) = self.complete.take() {
            f(self);
        }
    }

    /// Complete with `Cancelled` without touching the bus
    pub(crate) fn cancel(mut self) {
        self.status = Err(Error::Cancelled);
        self.actual_length = 0;
        self.complete();
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("device", &self.device.chip_select())
            .field("transfers", &self.transfers.len())
            .field("status", &self.status)
            .field("actual_length", &self.actual_length)
            .field("has_completion", &self.complete.is_some())
            .finish()
    }
}
