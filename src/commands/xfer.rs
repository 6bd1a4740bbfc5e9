//! Raw transfer command implementation

use std::error::Error;

use rbspi_core::{Message, Transfer};

use crate::backend::Bus;

/// Parse "9f", "9F0000" or "03 00 10 00" into bytes
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .map(|tok| tok.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {:?}", s));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex byte at position {} in {:?}", i / 2, s))
        })
        .collect()
}

/// Format bytes as space separated hex
fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the Message for one raw transfer
pub fn xfer_message(
    device: rbspi_core::Device,
    tx: Vec<u8>,
    read: usize,
    speed: Option<u32>,
) -> Message {
    let len = tx.len() + read;
    let transfer = Transfer::full_duplex(tx, len, len);
    let transfer = match speed {
        Some(hz) => transfer.with_speed_hz(hz),
        None => transfer,
    };
    Message::new(device).with_transfer(transfer)
}

/// Run the xfer command
pub fn run_xfer(
    bus: &Bus,
    cs: u8,
    hex: &str,
    read: usize,
    speed: Option<u32>,
) -> Result<(), Box<dyn Error>> {
    let tx = parse_hex_bytes(hex)?;
    if tx.is_empty() && read == 0 {
        return Err("nothing to transfer".into());
    }
    let device = bus.register(cs, None)?;

    log::debug!("xfer: CS{} tx [{}] + {} read bytes", cs, format_hex(&tx), read);
    let done = bus
        .controller()
        .submit_and_wait(xfer_message(device, tx, read, speed))?;
    done.status()?;

    let rx = done
        .into_transfers()
        .into_iter()
        .next()
        .and_then(Transfer::into_rx)
        .unwrap_or_default();
    println!("{}", format_hex(&rx));
    Ok(())
}
