//! AM28Fxxx erase and program algorithms
//!
//! The 28F parts have no embedded algorithms: the host issues timed
//! program and erase pulses and checks each result with a verify command.
//! The two 8-bit chips of a word are driven independently, so a lane that
//! already holds the right byte is masked out of further program pulses.

use crate::bdm::BdmPort;
use crate::clock::Clock;
use crate::error::{EraseFailure, Error, Result};

const CMD_READ: u16 = 0x0000;
const CMD_RESET: u16 = 0xffff;
const CMD_PROGRAM: u16 = 0x4040;
const CMD_PROGRAM_VERIFY: u16 = 0xc0c0;
const CMD_ERASE: u8 = 0x20;
const CMD_ERASE_VERIFY: u8 = 0xa0;

/// Maximum number of erase pulses
pub const ERASE_MAX_PULSES: u16 = 1000;
/// Maximum number of program pulses per word
pub const PROGRAM_MAX_PULSES: u8 = 25;
/// Length of one erase pulse
pub const ERASE_PULSE_MS: u32 = 10;

/// Return both chips to read-array mode
///
/// Two reset cycles are required by the datasheet.
pub fn reset<P: BdmPort + ?Sized>(port: &mut P) -> Result<()> {
    port.write_word(0, CMD_RESET)?;
    port.write_word(0, CMD_RESET)
}

/// Program one word with up to [`PROGRAM_MAX_PULSES`] pulses
pub fn program_word<P: BdmPort + ?Sized>(port: &mut P, addr: u32, value: u16) -> Result<()> {
    let failed = Error::ProgramFailed { addr };

    port.write_word(addr, CMD_READ).map_err(|_| failed)?;
    let mut current = port.read_word(addr).map_err(|_| failed)?;
    if current == value {
        return Ok(());
    }

    let mut mask: u16 = 0xffff;
    for _ in 1..PROGRAM_MAX_PULSES {
        // Lanes that already verify get a read command instead of a pulse
        if current & 0x00ff == value & 0x00ff {
            mask &= 0xff00;
        }
        if current & 0xff00 == value & 0xff00 {
            mask &= 0x00ff;
        }

        if port.write_word(addr, CMD_PROGRAM & mask).is_err()
            || port.write_word(addr, value).is_err()
            || port.write_word(addr, CMD_PROGRAM_VERIFY & mask).is_err()
        {
            break;
        }
        current = match port.read_word(addr) {
            Ok(v) => v,
            Err(_) => break,
        };
        if current == value {
            return Ok(());
        }
    }

    log::debug!(
        "am28: 0x{:06X} reads 0x{:04X}, wanted 0x{:04X}",
        addr,
        current,
        value
    );
    let _ = reset(port);
    Err(failed)
}

/// Erase `start..end`
///
/// Every word is first programmed to 0x0000, then erase pulses are issued
/// until every byte of the range verifies as 0xFF or the pulse budget runs
/// out.
pub fn erase<P, C>(port: &mut P, clock: &C, start: u32, end: u32) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
{
    if start >= end {
        return Err(Error::AddressOutOfBounds);
    }

    reset(port)?;

    log::info!("am28: zeroing 0x{:06X}..0x{:06X}", start, end);
    let mut addr = start;
    while addr < end {
        program_word(port, addr, 0x0000)?;
        addr += 2;
    }

    log::info!("am28: erasing");
    addr = start;
    let mut pulse: u16 = 0;
    loop {
        pulse += 1;
        if pulse >= ERASE_MAX_PULSES || addr >= end {
            break;
        }
        if port.write_byte(addr, CMD_ERASE).is_err() || port.write_byte(addr, CMD_ERASE).is_err() {
            break;
        }
        clock.delay_ms(ERASE_PULSE_MS);

        // Resume verifying where the previous pulse stopped
        while addr < end {
            if port.write_byte(addr, CMD_ERASE_VERIFY).is_err() {
                break;
            }
            match port.read_byte(addr) {
                Ok(0xff) => addr += 1,
                _ => break,
            }
        }
    }
    log::debug!("am28: {} erase pulses", pulse - 1);

    let _ = port.write_byte(start, CMD_READ as u8);
    let _ = reset(port);

    if addr == end {
        Ok(())
    } else {
        Err(Error::EraseError(EraseFailure::VerifyFailed { addr }))
    }
}
