//! Flash chip command protocols
//!
//! This module drives the flash chips of a halted target through the
//! [`BdmPort`] primitives. Chip identification is shared by both command
//! sets; erase and program live in [`am29`] and [`am28`].

pub mod am28;
pub mod am29;

#[cfg(test)]
pub(crate) mod mock;

use crate::bdm::BdmPort;
use crate::chip::{find_by_code, FlashChip, AM29_ID};
use crate::error::{Error, Result};

/// Result of a successful identification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashId {
    /// Manufacturer byte
    pub make: u8,
    /// Device type byte
    pub code: u8,
    /// Matching database entry
    pub chip: &'static FlashChip,
}

/// Put the chip into autoselect mode and read the raw id
///
/// Returns `(make, code)`. The chip is left in autoselect mode; callers
/// must reset it before reading the array.
pub fn read_id<P: BdmPort + ?Sized>(port: &mut P) -> Result<(u8, u8)> {
    for pair in AM29_ID {
        port.write_word(pair.addr, pair.value)?;
    }
    let id = port.read_long(0)?;
    Ok(((id >> 16) as u8, id as u8))
}

/// Identify the flash chip and look it up in the database
pub fn identify<P: BdmPort + ?Sized>(port: &mut P) -> Result<FlashId> {
    let (make, code) = read_id(port)?;
    log::debug!("flash id: make 0x{:02X}, type 0x{:02X}", make, code);

    let chip = find_by_code(code).ok_or(Error::ChipNotFound { make, code })?;
    log::info!(
        "found {} {} ({}, {})",
        chip.vendor,
        chip.name,
        chip.family,
        chip.ecu
    );
    Ok(FlashId { make, code, chip })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{Ecu, FlashFamily};
    use mock::{MockPort, Op};

    #[test]
    fn test_identify_am29f010() {
        let mut port = MockPort::new();
        port.long_reads.push_back(0x0101_2020);
        let id = identify(&mut port).unwrap();
        assert_eq!(id.make, 0x01);
        assert_eq!(id.code, 0x20);
        assert_eq!(id.chip.family, FlashFamily::Am29);
        assert_eq!(id.chip.ecu, Ecu::T55);
        assert_eq!(port.ops[2], Op::WriteWord(0xaaaa, 0x9090));
        assert_eq!(port.ops[3], Op::ReadLong(0));
    }

    #[test]
    fn test_identify_t8() {
        let mut port = MockPort::new();
        port.long_reads.push_back(0x0101_8181);
        let id = identify(&mut port).unwrap();
        assert_eq!(id.chip.flash_size(), 0x100000);
        assert_eq!(id.chip.signature(), 0x0010_0C00);
    }

    #[test]
    fn test_identify_unknown() {
        let mut port = MockPort::new();
        port.long_reads.push_back(0x0C0C_7777);
        assert_eq!(
            identify(&mut port),
            Err(Error::ChipNotFound {
                make: 0x0C,
                code: 0x77
            })
        );
    }
}
