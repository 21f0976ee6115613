//! Flash driver injection
//!
//! For the larger chips the erase and program loops run on the target CPU
//! itself. A small CPU32 program is loaded into the internal RAM at
//! [`DRIVER_ADDR`]; each run leaves background mode, does one job and
//! returns with a status code in D0 (zero on success).
//!
//! The first run after loading erases the flash. Every later run programs
//! the [`DRIVER_BLOCK_LEN`] bytes staged at [`DRIVER_BUFFER`] and advances
//! the driver's own flash cursor.

use crate::bdm::{AccessSize, BdmPort, ADREG_D0, SYSREG_RPC};
use crate::clock::{Clock, Deadline};
use crate::error::{Error, Result};

/// Load address of the driver in target RAM
pub const DRIVER_ADDR: u32 = 0x0010_0000;
/// Staging buffer for the next block to program
pub const DRIVER_BUFFER: u32 = 0x0010_0700;
/// Bytes programmed per driver run
pub const DRIVER_BLOCK_LEN: usize = 256;
/// Time allowed for the erase run (zeroing plus erase of a T8 pair)
pub const ERASE_TIMEOUT_MS: u32 = 200_000;
/// Time allowed for one block run (25 pulses of 16 us per byte, with margin)
pub const BLOCK_TIMEOUT_MS: u32 = 200;
/// Consecutive "halted" samples required before the driver counts as done
pub const DEBOUNCE_SAMPLES: u32 = 5;

/// CPU32 flash driver
pub static FLASH_DRIVER: [u8; 1076] = [
    0x60, 0x00, 0x04, 0x0C, 0x7C, 0x2F, 0x2D, 0x5C, 0x2A, 0x0D, 0x00, 0x00,
    0x02, 0x03, 0x00, 0x03, 0x41, 0xFA, 0xFF, 0xF6, 0x10, 0xBB, 0x30, 0xEE,
    0x70, 0x01, 0x4A, 0xFA, 0x52, 0x43, 0x4E, 0x75, 0x20, 0x7C, 0x00, 0xFF,
    0xFA, 0x00, 0x08, 0x10, 0x00, 0x04, 0x66, 0x4E, 0xD0, 0xFC, 0x00, 0x04,
    0x10, 0xFC, 0x00, 0x7F, 0x08, 0x10, 0x00, 0x03, 0x67, 0xFA, 0xD0, 0xFC,
    0x00, 0x1C, 0x42, 0x10, 0xD0, 0xFC, 0x00, 0x23, 0x30, 0xBC, 0x3F, 0xFF,
    0xD0, 0xFC, 0x00, 0x04, 0x70, 0x07, 0x30, 0xC0, 0x30, 0xBC, 0x68, 0x70,
    0xD0, 0xFC, 0x00, 0x06, 0x30, 0xC0, 0x30, 0xFC, 0x30, 0x30, 0x30, 0xC0,
    0x30, 0xBC, 0x50, 0x30, 0xD0, 0xFC, 0x01, 0xBE, 0x70, 0x40, 0x30, 0xC0,
    0x30, 0x80, 0x30, 0x3C, 0x55, 0xF0, 0x4E, 0x71, 0x51, 0xC8, 0xFF, 0xFC,
    0x60, 0x18, 0xD0, 0xFC, 0x00, 0x08, 0x30, 0xFC, 0x69, 0x08, 0x08, 0x10,
    0x00, 0x09, 0x67, 0xFA, 0x31, 0x3C, 0x68, 0x08, 0xD0, 0xFC, 0x00, 0x48,
    0x42, 0x50, 0x4E, 0x75, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x2C, 0x3C, 0x00, 0x00, 0x55, 0x55, 0x2E, 0x3C, 0x00, 0x00,
    0xAA, 0xAA, 0x2A, 0x46, 0x53, 0x8D, 0x2C, 0x47, 0x45, 0xF8, 0x00, 0x00,
    0x47, 0xFA, 0xFF, 0xDE, 0x3C, 0x87, 0x3A, 0x86, 0x3C, 0xBC, 0x90, 0x90,
    0x36, 0xDA, 0x36, 0x92, 0x3C, 0x87, 0x3A, 0x86, 0x3C, 0xBC, 0xF0, 0xF0,
    0x20, 0x3A, 0xFF, 0xC6, 0x72, 0x02, 0x48, 0x41, 0x74, 0x01, 0x0C, 0x00,
    0x00, 0x25, 0x67, 0x50, 0x0C, 0x00, 0x00, 0xB8, 0x67, 0x4A, 0x74, 0x04,
    0x0C, 0x00, 0x00, 0x5D, 0x67, 0x42, 0x74, 0x01, 0xE3, 0x99, 0x0C, 0x00,
    0x00, 0xA7, 0x67, 0x38, 0x0C, 0x00, 0x00, 0xB4, 0x67, 0x32, 0x74, 0x02,
    0x0C, 0x00, 0x00, 0x20, 0x67, 0x2A, 0x0C, 0x00, 0x00, 0xA4, 0x67, 0x24,
    0x0C, 0x00, 0x00, 0xB5, 0x67, 0x1E, 0x74, 0x04, 0x0C, 0x00, 0x00, 0xD5,
    0x67, 0x16, 0x74, 0x03, 0xE3, 0x99, 0x0C, 0x00, 0x00, 0x23, 0x67, 0x0C,
    0xE3, 0x99, 0x0C, 0x00, 0x00, 0x81, 0x67, 0x04, 0x72, 0x00, 0x74, 0x00,
    0x47, 0xFA, 0xFF, 0x6A, 0x26, 0x81, 0x47, 0xFA, 0xFF, 0x68, 0x16, 0x82,
    0x4E, 0x75, 0x45, 0x72, 0x61, 0x73, 0x69, 0x6E, 0x67, 0x20, 0x46, 0x4C,
    0x41, 0x53, 0x48, 0x20, 0x63, 0x68, 0x69, 0x70, 0x73, 0x0D, 0x0A, 0x00,
    0x41, 0xFA, 0xFF, 0xE8, 0x70, 0x01, 0x4A, 0xFA, 0x12, 0x3A, 0xFF, 0x42,
    0x53, 0x01, 0x67, 0x16, 0x53, 0x01, 0x67, 0x00, 0x00, 0xB8, 0x53, 0x01,
    0x67, 0x00, 0x01, 0x0A, 0x53, 0x01, 0x67, 0x00, 0x01, 0x3A, 0x60, 0x00,
    0x01, 0x3A, 0x4B, 0xF8, 0x00, 0x00, 0x24, 0x3A, 0xFF, 0x1C, 0x26, 0x02,
    0x3A, 0xBC, 0xFF, 0xFF, 0x3A, 0xBC, 0xFF, 0xFF, 0x42, 0x55, 0x4A, 0x35,
    0x28, 0xFF, 0x67, 0x28, 0x7A, 0x19, 0x1B, 0xBC, 0x00, 0x40, 0x28, 0xFF,
    0x42, 0x35, 0x28, 0xFF, 0x72, 0x15, 0x4E, 0x71, 0x51, 0xC9, 0xFF, 0xFC,
    0x1B, 0xBC, 0x00, 0xC0, 0x28, 0xFF, 0x72, 0x0C, 0x4E, 0x71, 0x51, 0xC9,
    0xFF, 0xFC, 0x4A, 0x35, 0x28, 0xFF, 0x66, 0x06, 0x53, 0x82, 0x66, 0xCC,
    0x60, 0x04, 0x53, 0x45, 0x66, 0xD0, 0x42, 0x55, 0x4A, 0x55, 0x4A, 0x05,
    0x67, 0x00, 0x00, 0xE4, 0x24, 0x03, 0x50, 0xC4, 0x2A, 0x3C, 0x03, 0xE8,
    0x03, 0xE8, 0x72, 0x20, 0x1B, 0x81, 0x28, 0xFF, 0x1B, 0x81, 0x28, 0xFF,
    0x32, 0x3C, 0x55, 0xF0, 0x4E, 0x71, 0x51, 0xC9, 0xFF, 0xFC, 0x4E, 0xBA,
    0xFE, 0x20, 0x1B, 0xBC, 0x00, 0xA0, 0x28, 0xFF, 0x72, 0x0C, 0x4E, 0x71,
    0x51, 0xC9, 0xFF, 0xFC, 0xB8, 0x35, 0x28, 0xFF, 0x66, 0x08, 0x48, 0x45,
    0x53, 0x82, 0x66, 0xE6, 0x60, 0x04, 0x53, 0x45, 0x66, 0xC8, 0x42, 0x55,
    0x4A, 0x55, 0x4A, 0x45, 0x67, 0x00, 0x00, 0x98, 0x60, 0x00, 0x00, 0x90,
    0x70, 0x01, 0x42, 0x83, 0x1D, 0x87, 0x08, 0x00, 0x1B, 0x86, 0x08, 0x00,
    0x1D, 0xBC, 0x00, 0x80, 0x08, 0x00, 0x1D, 0x87, 0x08, 0x00, 0x1B, 0x86,
    0x08, 0x00, 0x1D, 0xBC, 0x00, 0x10, 0x08, 0x00, 0x2A, 0x00, 0x4E, 0xBA,
    0xFD, 0xCC, 0x20, 0x05, 0x1A, 0x30, 0x09, 0x90, 0x08, 0x05, 0x00, 0x07,
    0x66, 0x20, 0x08, 0x05, 0x00, 0x05, 0x67, 0xE8, 0x1A, 0x30, 0x09, 0x90,
    0x08, 0x05, 0x00, 0x07, 0x66, 0x10, 0x1D, 0x87, 0x08, 0x00, 0x1B, 0x86,
    0x08, 0x00, 0x1D, 0xBC, 0x00, 0xF0, 0x08, 0x00, 0x60, 0x40, 0x53, 0x80,
    0x67, 0xAE, 0x60, 0x36, 0x42, 0x83, 0x3C, 0x87, 0x3A, 0x86, 0x3C, 0xBC,
    0x00, 0x80, 0x3C, 0x87, 0x3A, 0x86, 0x3C, 0xBC, 0x00, 0x10, 0x4E, 0xBA,
    0xFD, 0x84, 0x3A, 0x15, 0x08, 0x05, 0x00, 0x07, 0x66, 0x18, 0x08, 0x05,
    0x00, 0x05, 0x67, 0xEE, 0x3A, 0x15, 0x08, 0x05, 0x00, 0x07, 0x66, 0x0A,
    0x3C, 0x87, 0x3A, 0x86, 0x3C, 0xBC, 0x00, 0xF0, 0x60, 0x04, 0x42, 0x80,
    0x60, 0x02, 0x70, 0x01, 0x4E, 0x75, 0x47, 0xFB, 0x01, 0x70, 0x00, 0x00,
    0x04, 0x4C, 0x28, 0x49, 0x24, 0x3C, 0x00, 0x00, 0x01, 0x00, 0x12, 0x3A,
    0xFD, 0xD8, 0x53, 0x01, 0x67, 0x14, 0x53, 0x01, 0x67, 0x5A, 0x53, 0x01,
    0x67, 0x00, 0x00, 0xBC, 0x53, 0x01, 0x67, 0x00, 0x01, 0x00, 0x60, 0x00,
    0x01, 0x2E, 0x10, 0x33, 0x28, 0xFF, 0x0C, 0x00, 0x00, 0xFF, 0x67, 0x28,
    0x7A, 0x19, 0x19, 0xBC, 0x00, 0x40, 0x28, 0xFF, 0x19, 0x80, 0x28, 0xFF,
    0x72, 0x15, 0x4E, 0x71, 0x51, 0xC9, 0xFF, 0xFC, 0x19, 0xBC, 0x00, 0xC0,
    0x28, 0xFF, 0x72, 0x0C, 0x4E, 0x71, 0x51, 0xC9, 0xFF, 0xFC, 0xB0, 0x34,
    0x28, 0xFF, 0x66, 0x06, 0x53, 0x82, 0x66, 0xCA, 0x60, 0x04, 0x53, 0x05,
    0x66, 0xD0, 0x42, 0x55, 0x4A, 0x55, 0x4A, 0x05, 0x67, 0x00, 0x00, 0xE8,
    0x60, 0x00, 0x00, 0xE0, 0x20, 0x0C, 0xD0, 0x82, 0xC0, 0xBC, 0x00, 0x00,
    0x00, 0x01, 0x08, 0x40, 0x00, 0x00, 0x16, 0x33, 0x28, 0xFF, 0x0C, 0x03,
    0x00, 0xFF, 0x67, 0x48, 0x1D, 0x87, 0x08, 0x00, 0x1B, 0x86, 0x08, 0x00,
    0x1D, 0xBC, 0x00, 0xA0, 0x08, 0x00, 0x19, 0x83, 0x28, 0xFF, 0xC6, 0x3C,
    0x00, 0x80, 0x18, 0x34, 0x28, 0xFF, 0x1A, 0x04, 0xC8, 0x3C, 0x00, 0x80,
    0xB8, 0x03, 0x67, 0x24, 0x08, 0x05, 0x00, 0x05, 0x67, 0xEC, 0x18, 0x34,
    0x28, 0xFF, 0xC8, 0x3C, 0x00, 0x80, 0xB8, 0x03, 0x67, 0x12, 0x1D, 0x87,
    0x08, 0x00, 0x1B, 0x86, 0x08, 0x00, 0x1D, 0xBC, 0x00, 0xF0, 0x08, 0x00,
    0x60, 0x00, 0x00, 0x84, 0x53, 0x82, 0x66, 0xA6, 0x60, 0x78, 0x36, 0x33,
    0x28, 0xFE, 0x0C, 0x43, 0xFF, 0xFF, 0x67, 0x3A, 0x3C, 0x87, 0x3A, 0x86,
    0x3C, 0xBC, 0x00, 0xA0, 0x39, 0x83, 0x28, 0xFE, 0xC6, 0x7C, 0x00, 0x80,
    0x38, 0x34, 0x28, 0xFE, 0x3A, 0x04, 0xC8, 0x7C, 0x00, 0x80, 0xB8, 0x43,
    0x67, 0x1C, 0x08, 0x05, 0x00, 0x05, 0x67, 0xEC, 0x38, 0x34, 0x28, 0xFE,
    0xC8, 0x7C, 0x00, 0x80, 0xB8, 0x43, 0x67, 0x0A, 0x3C, 0x87, 0x3A, 0x86,
    0x3C, 0xBC, 0x00, 0xF0, 0x60, 0x38, 0x55, 0x82, 0x66, 0xB8, 0x60, 0x2E,
    0x3C, 0x87, 0x3A, 0x86, 0x3C, 0xBC, 0xA0, 0xA0, 0x39, 0xB3, 0x28, 0xFE,
    0x28, 0xFE, 0x55, 0x82, 0x66, 0xF6, 0x32, 0x3C, 0x55, 0xF0, 0x4E, 0x71,
    0x51, 0xC9, 0xFF, 0xFC, 0x34, 0x3C, 0x01, 0x00, 0x36, 0x33, 0x28, 0xFE,
    0xB6, 0x74, 0x28, 0xFE, 0x66, 0x08, 0x55, 0x82, 0x66, 0xF2, 0x42, 0x80,
    0x60, 0x02, 0x70, 0x01, 0x4E, 0x75, 0x4F, 0xFB, 0x01, 0x70, 0x00, 0x00,
    0x02, 0xF0, 0x4E, 0xBA, 0xFC, 0x08, 0x4E, 0xBA, 0xFC, 0x82, 0x4E, 0xBA,
    0xFD, 0x30, 0x4A, 0xFA, 0x42, 0x80, 0x22, 0x40, 0x4E, 0xBA, 0xFE, 0x88,
    0x4A, 0xFA, 0xD2, 0xFC, 0x01, 0x00, 0x60, 0xF4,
];

/// Copy the driver into target RAM and point the PC at it
pub fn load_driver<P: BdmPort + ?Sized>(port: &mut P) -> Result<()> {
    port.write_sysreg(SYSREG_RPC, DRIVER_ADDR)?;
    for (addr, byte) in (DRIVER_ADDR..).zip(FLASH_DRIVER.iter()) {
        port.write_byte(addr, *byte)?;
    }
    log::debug!(
        "driver: loaded {} bytes at 0x{:06X}",
        FLASH_DRIVER.len(),
        DRIVER_ADDR
    );
    Ok(())
}

/// Copy one block into the staging buffer
///
/// The block is written as long words, with `FILL` for everything after
/// the first one. A short final block is padded with 0xFF.
pub fn stage_block<P: BdmPort + ?Sized>(port: &mut P, data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() > DRIVER_BLOCK_LEN {
        return Err(Error::BufferTooSmall);
    }

    let mut block = [0xFFu8; DRIVER_BLOCK_LEN];
    block[..data.len()].copy_from_slice(data);

    for (i, long) in block.chunks_exact(4).enumerate() {
        let value = u32::from_be_bytes([long[0], long[1], long[2], long[3]]);
        if i == 0 {
            port.write_long(DRIVER_BUFFER, value)?;
        } else {
            port.fill(AccessSize::Long, value)?;
        }
    }
    Ok(())
}

/// Resume the driver and wait for it to return to background mode
///
/// T5 ECUs glitch between "running" and "halted" while the CPU changes
/// state, so the halted state must be seen [`DEBOUNCE_SAMPLES`] times in a
/// row, 1 us apart.
pub fn run_driver<P, C>(port: &mut P, clock: &C, max_ms: u32) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
{
    port.run(None)?;
    let deadline = Deadline::after_ms(clock, max_ms as u64);

    let mut halted = 0;
    while halted < DEBOUNCE_SAMPLES {
        if port.is_running()? {
            halted = 0;
            if deadline.expired(clock) {
                log::warn!("driver: did not return to BDM mode within {} ms", max_ms);
                let _ = port.stop();
                return Err(Error::DriverTimeout);
            }
            continue;
        }
        halted += 1;
        clock.delay_us(1);
    }

    let result = port.read_adreg(ADREG_D0)?;
    if result != 0 {
        log::debug!("driver: D0 = 0x{:08X}", result);
        return Err(Error::DriverFailed { result });
    }
    Ok(())
}

/// Erase the whole flash with the loaded driver
pub fn erase_with_driver<P, C>(port: &mut P, clock: &C) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
{
    run_driver(port, clock, ERASE_TIMEOUT_MS)
}

/// Stage one block and let the driver program it
pub fn program_block<P, C>(port: &mut P, clock: &C, data: &[u8]) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
{
    stage_block(port, data)?;
    run_driver(port, clock, BLOCK_TIMEOUT_MS)
}
