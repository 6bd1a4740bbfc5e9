//! Probe command implementation

use std::error::Error;

use rbspi_core::{Device, Message, Transfer};

use crate::backend::{Bus, BusController};

/// Read JEDEC ID
const RDID: u8 = 0x9F;

/// Read the JEDEC manufacturer and device ID of the flash on `device`
pub fn read_jedec_id(ctrl: &BusController, device: Device) -> Result<(u8, u16), Box<dyn Error>> {
    // Opcode, then three ID bytes captured at the end of the transfer
    let msg = Message::new(device).with_transfer(Transfer::full_duplex(vec![RDID], 3, 4));
    let done = ctrl.submit_and_wait(msg)?;
    done.status()?;

    let id = done
        .into_transfers()
        .into_iter()
        .next()
        .and_then(Transfer::into_rx)
        .unwrap_or_default();
    let &[manufacturer, hi, lo] = id.as_slice() else {
        return Err(format!("short JEDEC ID reply: {:02X?}", id).into());
    };
    if manufacturer == 0x00 || manufacturer == 0xFF {
        return Err(format!(
            "no flash chip responded on {} (ID {:02X} {:02X}{:02X})",
            device.chip_select(),
            manufacturer,
            hi,
            lo
        )
        .into());
    }
    Ok((manufacturer, u16::from_be_bytes([hi, lo])))
}

/// Probe the flash on chip select `cs`
pub fn run_probe(bus: &Bus, cs: u8) -> Result<(), Box<dyn Error>> {
    let device = bus.register(cs, None)?;
    match read_jedec_id(bus.controller(), device) {
        Ok((manufacturer, device_id)) => {
            println!("Found flash chip on CS{}:", cs);
            println!("  JEDEC ID: {:02X} {:04X}", manufacturer, device_id);
            Ok(())
        }
        Err(e) => {
            eprintln!("Probe failed: {}", e);
            Err(e)
        }
    }
}
