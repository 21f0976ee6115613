//! AM29Fxxx erase and program algorithms
//!
//! These chips run the erase and program operations internally once the
//! unlock cycles have been written; the host only polls for completion.

use crate::bdm::BdmPort;
use crate::chip::{MemPair, AM29_ERASE, AM29_RESET, AM29_WRITE};
use crate::clock::{Clock, Deadline};
use crate::error::{EraseFailure, Error, Result};

/// Upper bound for a chip erase, including the internal pre-programming
/// (Am29BL802C: 27 s worst-case programming plus 3x 45 s typical erase)
pub const ERASE_TIMEOUT_SECS: u64 = 200;

/// Upper bound for a single word program (Am29BL802C maximum is 360 us)
pub const PROGRAM_TIMEOUT_US: u64 = 500;

fn write_sequence<P: BdmPort + ?Sized>(port: &mut P, seq: &[MemPair]) -> Result<()> {
    for pair in seq {
        port.write_word(pair.addr, pair.value)?;
    }
    Ok(())
}

/// Return the chip to read-array mode
pub fn reset<P: BdmPort + ?Sized>(port: &mut P) -> Result<()> {
    write_sequence(port, AM29_RESET)
}

/// Erase the whole chip and wait for it to read back as 0xFFFF
///
/// The chip is reset before returning, whatever the outcome.
pub fn erase_chip<P, C>(port: &mut P, clock: &C) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
{
    reset(port)?;

    log::info!("am29: erasing chip, this can take up to a minute on T8");
    for pair in AM29_ERASE {
        if port.write_word(pair.addr, pair.value).is_err() {
            let _ = reset(port);
            return Err(Error::EraseError(EraseFailure::CommandFailed {
                addr: pair.addr,
            }));
        }
    }

    let deadline = Deadline::after_secs(clock, ERASE_TIMEOUT_SECS);
    let result = loop {
        if deadline.expired(clock) {
            break Err(Error::EraseError(EraseFailure::Timeout));
        }
        if port.read_word(0) == Ok(0xFFFF) {
            break Ok(());
        }
    };

    match result {
        Ok(()) => log::info!(
            "am29: erase done in {} ms",
            deadline.elapsed_us(clock) / 1000
        ),
        Err(_) => log::warn!("am29: erase timed out"),
    }

    if reset(port).is_err() {
        log::warn!("am29: reset after erase failed");
    }
    result
}

/// Program one word and poll until it reads back
///
/// On any failure the chip is reset and [`Error::ProgramFailed`] is
/// returned.
pub fn program_word<P, C>(port: &mut P, clock: &C, addr: u32, value: u16) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
{
    if write_sequence(port, AM29_WRITE).is_err() || port.write_word(addr, value).is_err() {
        let _ = reset(port);
        return Err(Error::ProgramFailed { addr });
    }

    let deadline = Deadline::after_us(clock, PROGRAM_TIMEOUT_US);
    while !deadline.expired(clock) {
        if port.read_word(addr) == Ok(value) {
            return Ok(());
        }
    }

    log::debug!("am29: verify timeout at 0x{:06X}", addr);
    let _ = reset(port);
    Err(Error::ProgramFailed { addr })
}
