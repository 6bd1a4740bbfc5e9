//! In-memory SPI NOR flash on the simulated bus
//!
//! Understands the handful of commands a bring-up needs: JEDEC ID, status,
//! write enable/disable, read, fast read, page program and 4 KiB sector
//! erase, all with 3-byte addresses.

use crate::slave::SlaveDevice;

/// Command opcodes
pub mod opcodes {
    /// Read JEDEC ID
    pub const RDID: u8 = 0x9F;
    /// Read status register 1
    pub const RDSR: u8 = 0x05;
    /// Write enable
    pub const WREN: u8 = 0x06;
    /// Write disable
    pub const WRDI: u8 = 0x04;
    /// Read data
    pub const READ: u8 = 0x03;
    /// Read data with one dummy byte
    pub const FAST_READ: u8 = 0x0B;
    /// Page program
    pub const PP: u8 = 0x02;
    /// 4 KiB sector erase
    pub const SE_20: u8 = 0x20;
}

/// Status register: write enable latch
pub const STATUS_WEL: u8 = 0x02;

const SECTOR_SIZE: usize = 4096;

/// Configuration for the simulated flash
#[derive(Debug, Clone)]
pub struct FlashConfig {
    /// JEDEC manufacturer ID
    pub manufacturer_id: u8,
    /// JEDEC device ID
    pub device_id: u16,
    /// Size in bytes, a power of two
    pub size: usize,
    /// Page size for programming
    pub page_size: usize,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            manufacturer_id: 0xEF, // Winbond
            device_id: 0x4015,     // W25Q16
            size: 2 * 1024 * 1024,
            page_size: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for an opcode
    Opcode,
    /// Collecting address bytes for `op`
    Address { op: u8, got: u8 },
    /// One dummy byte before fast read data
    Dummy,
    /// Streaming data out from `addr`
    Read,
    /// Streaming out the JEDEC ID
    Id { index: usize },
    /// Streaming out the status register
    Status,
    /// Programming bytes at `addr`
    Program,
    /// Erase armed, runs on deselect
    Erase,
    /// Unknown command; ignore the rest of the selection
    Ignore,
}

/// Simulated flash chip
pub struct SimFlash {
    config: FlashConfig,
    data: Vec<u8>,
    phase: Phase,
    addr: u32,
    write_enabled: bool,
}

impl Default for SimFlash {
    fn default() -> Self {
        Self::new(FlashConfig::default())
    }
}

impl SimFlash {
    /// Erased flash
    pub fn new(config: FlashConfig) -> Self {
        let data = vec![0xFF; config.size];
        Self {
            config,
            data,
            phase: Phase::Opcode,
            addr: 0,
            write_enabled: false,
        }
    }

    /// Flash pre-filled from the start with `initial`
    pub fn with_data(config: FlashConfig, initial: &[u8]) -> Self {
        let mut flash = Self::new(config);
        let len = initial.len().min(flash.data.len());
        flash.data[..len].copy_from_slice(&initial[..len]);
        flash
    }

    /// Flash contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Configuration
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    fn mask(&self, addr: u32) -> usize {
        addr as usize & (self.config.size - 1)
    }

    fn status(&self) -> u8 {
        if self.write_enabled {
            STATUS_WEL
        } else {
            0
        }
    }

    fn opcode(&mut self, op: u8) -> Phase {
        match op {
            opcodes::RDID => Phase::Id { index: 0 },
            opcodes::RDSR => Phase::Status,
            opcodes::WREN => {
                self.write_enabled = true;
                Phase::Ignore
            }
            opcodes::WRDI => {
                self.write_enabled = false;
                Phase::Ignore
            }
            opcodes::READ | opcodes::FAST_READ | opcodes::PP | opcodes::SE_20 => {
                self.addr = 0;
                Phase::Address { op, got: 0 }
            }
            _ => {
                log::debug!("sim flash: unsupported opcode {:#04x}", op);
                Phase::Ignore
            }
        }
    }

    fn after_address(&self, op: u8) -> Phase {
        match op {
            opcodes::READ => Phase::Read,
            opcodes::FAST_READ => Phase::Dummy,
            opcodes::PP if self.write_enabled => Phase::Program,
            opcodes::SE_20 if self.write_enabled => Phase::Erase,
            _ => {
                log::debug!("sim flash: {:#04x} without write enable", op);
                Phase::Ignore
            }
        }
    }

    fn program(&mut self, byte: u8) {
        let page = self.config.page_size as u32;
        let at = self.mask(self.addr);
        // Programming only clears bits
        self.data[at] &= byte;
        // Wrap within the page
        self.addr = (self.addr & !(page - 1)) | (self.addr.wrapping_add(1) & (page - 1));
    }
}

impl SlaveDevice for SimFlash {
    fn select(&mut self) {
        self.phase = Phase::Opcode;
    }

    fn next_out(&mut self) -> u8 {
        match self.phase {
            Phase::Id { index } => {
                let id = [
                    self.config.manufacturer_id,
                    (self.config.device_id >> 8) as u8,
                    self.config.device_id as u8,
                ];
                self.phase = Phase::Id { index: index + 1 };
                id.get(index).copied().unwrap_or(0xFF)
            }
            Phase::Status => self.status(),
            Phase::Read => {
                let byte = self.data[self.mask(self.addr)];
                self.addr = self.addr.wrapping_add(1);
                byte
            }
            _ => 0xFF,
        }
    }

    fn receive(&mut self, byte: u8) {
        self.phase = match self.phase {
            Phase::Opcode => self.opcode(byte),
            Phase::Address { op, got } => {
                self.addr = self.addr << 8 | byte as u32;
                if got == 2 {
                    self.after_address(op)
                } else {
                    Phase::Address { op, got: got + 1 }
                }
            }
            Phase::Dummy => Phase::Read,
            Phase::Program => {
                self.program(byte);
                Phase::Program
            }
            phase => phase,
        };
    }

    fn deselect(&mut self) {
        match self.phase {
            Phase::Program => self.write_enabled = false,
            Phase::Erase => {
                let start = self.mask(self.addr) & !(SECTOR_SIZE - 1);
                let end = (start + SECTOR_SIZE).min(self.data.len());
                self.data[start..end].fill(0xFF);
                self.write_enabled = false;
            }
            _ => {}
        }
        self.phase = Phase::Opcode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run one selection byte by byte, the way the bus does
    fn exchange(flash: &mut SimFlash, tx: &[u8]) -> Vec<u8> {
        flash.select();
        let rx = tx
            .iter()
            .map(|&b| {
                let out = flash.next_out();
                flash.receive(b);
                out
            })
            .collect();
        flash.deselect();
        rx
    }

    #[test]
    fn test_read_jedec_id() {
        let mut flash = SimFlash::default();
        let rx = exchange(&mut flash, &[opcodes::RDID, 0, 0, 0]);
        assert_eq!(rx, vec![0xFF, 0xEF, 0x40, 0x15]);
    }

    #[test]
    fn test_read_and_fast_read() {
        let mut flash = SimFlash::with_data(FlashConfig::default(), &[0, 1, 2, 3, 4, 5, 6, 7]);
        let rx = exchange(&mut flash, &[opcodes::READ, 0, 0, 2, 0, 0, 0]);
        assert_eq!(&rx[4..], &[2, 3, 4]);

        let rx = exchange(&mut flash, &[opcodes::FAST_READ, 0, 0, 5, 0xFF, 0, 0]);
        assert_eq!(&rx[5..], &[5, 6]);
    }

    #[test]
    fn test_program_needs_write_enable() {
        let mut flash = SimFlash::default();
        exchange(&mut flash, &[opcodes::PP, 0, 0x10, 0, 0x12, 0x34]);
        assert_eq!(&flash.data()[0x1000..0x1002], &[0xFF, 0xFF]);

        exchange(&mut flash, &[opcodes::WREN]);
        assert_eq!(exchange(&mut flash, &[opcodes::RDSR, 0]), vec![0xFF, STATUS_WEL]);
        exchange(&mut flash, &[opcodes::PP, 0, 0x10, 0, 0x12, 0x34]);
        assert_eq!(&flash.data()[0x1000..0x1002], &[0x12, 0x34]);
        // Latch cleared by the program
        assert_eq!(exchange(&mut flash, &[opcodes::RDSR, 0]), vec![0xFF, 0]);
    }

    #[test]
    fn test_program_wraps_in_page() {
        let mut flash = SimFlash::default();
        exchange(&mut flash, &[opcodes::WREN]);
        exchange(&mut flash, &[opcodes::PP, 0, 0, 0xFF, 0xAA, 0xBB]);
        assert_eq!(flash.data()[0xFF], 0xAA);
        assert_eq!(flash.data()[0x00], 0xBB);
    }

    #[test]
    fn test_sector_erase() {
        let mut flash = SimFlash::with_data(FlashConfig::default(), &[0u8; 8192]);
        exchange(&mut flash, &[opcodes::WREN]);
        exchange(&mut flash, &[opcodes::SE_20, 0, 0x10, 0x20]);
        assert!(flash.data()[..4096].iter().all(|&b| b == 0));
        assert!(flash.data()[4096..8192].iter().all(|&b| b == 0xFF));
    }
}
