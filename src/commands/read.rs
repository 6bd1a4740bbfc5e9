//! Read command implementation

use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use rbspi_core::{Device, Message, Transfer};

use crate::backend::{Bus, BusController};

/// Read data
const READ: u8 = 0x03;

/// Bytes per Message (4 KiB)
const READ_CHUNK_SIZE: usize = 4096;

/// Highest address a 3-byte READ can reach, plus one
const ADDRESS_SPACE: u64 = 1 << 24;

/// Messages reading `length` bytes from `offset` in one CS selection
///
/// Every Message but the last ends in a `cs_change` transfer, which keeps
/// CS asserted into the next Message.
pub fn read_messages(device: Device, offset: u32, length: usize) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut remaining = length;
    while remaining > 0 {
        let chunk = remaining.min(READ_CHUNK_SIZE);
        remaining -= chunk;

        let mut msg = Message::new(device);
        if messages.is_empty() {
            let [_, a2, a1, a0] = offset.to_be_bytes();
            msg.push(Transfer::write(vec![READ, a2, a1, a0]));
        }
        let data = Transfer::read(chunk);
        msg.push(if remaining > 0 { data.with_cs_change() } else { data });
        messages.push(msg);
    }
    messages
}

/// Read `length` bytes from `offset`, reporting the byte count after each chunk
pub fn read_flash<F>(
    ctrl: &BusController,
    device: Device,
    offset: u32,
    length: usize,
    mut progress: F,
) -> Result<Vec<u8>, Box<dyn Error>>
where
    F: FnMut(usize),
{
    if u64::from(offset) + length as u64 > ADDRESS_SPACE {
        return Err(format!(
            "range 0x{:06X}+0x{:X} exceeds the 3-byte address space",
            offset, length
        )
        .into());
    }

    let mut data = Vec::with_capacity(length);
    for msg in read_messages(device, offset, length) {
        let done = ctrl.submit_and_wait(msg)?;
        done.status()?;
        for transfer in done.into_transfers() {
            if let Some(rx) = transfer.into_rx() {
                data.extend_from_slice(&rx);
            }
        }
        progress(data.len());
    }
    Ok(data)
}

/// Run the read command
pub fn run_read(
    bus: &Bus,
    cs: u8,
    offset: u32,
    length: u32,
    output: &Path,
    speed: Option<u32>,
) -> Result<(), Box<dyn Error>> {
    let device = bus.register(cs, speed)?;

    let pb = ProgressBar::new(length as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("#>-"),
    );

    let data = read_flash(bus.controller(), device, offset, length as usize, |done| {
        pb.set_position(done as u64)
    })?;
    pb.finish_with_message("Read complete");

    let mut file = File::create(output)?;
    file.write_all(&data)?;

    println!("Wrote {} bytes to {:?}", data.len(), output);

    Ok(())
}
