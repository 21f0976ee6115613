//! Built-in database of Trionic flash chips

use super::types::{Ecu, FlashChip, FlashFamily, ProgramMethod};

/// AMD Am29BL802C (T8)
pub const AMD29BL802C: u8 = 0x81;
/// AMD Am29F400B (bottom boot)
pub const AMD29F400B: u8 = 0xAB;
/// AMD Am29F400T (top boot, T7)
pub const AMD29F400T: u8 = 0x23;
/// AMD Am29F010
pub const AMD29F010: u8 = 0x20;
/// SST 39SF010
pub const SST39SF010: u8 = 0xB5;
/// AMIC A29010L
pub const AMICA29010L: u8 = 0xA4;
/// Atmel AT29C010
pub const ATMEL29C010: u8 = 0xD5;
/// AMD Am28F010
pub const AMD28F010: u8 = 0xA7;
/// Intel 28F010
pub const INTEL28F010: u8 = 0xB4;
/// AMD Am28F512
pub const AMD28F512: u8 = 0x25;
/// Intel 28F512
pub const INTEL28F512: u8 = 0xB8;
/// Atmel AT29C512
pub const ATMEL29C512: u8 = 0x5D;

const fn chip(
    code: u8,
    vendor: &'static str,
    name: &'static str,
    family: FlashFamily,
    ecu: Ecu,
    method: ProgramMethod,
) -> FlashChip {
    FlashChip {
        code,
        vendor,
        name,
        family,
        ecu,
        method,
        programmable: true,
        needs_erase: true,
    }
}

// Atmel 29C parts are page-write EEPROM style: no erase, no word program
const fn atmel(code: u8, name: &'static str, ecu: Ecu) -> FlashChip {
    FlashChip {
        programmable: false,
        needs_erase: false,
        ..chip(code, "Atmel", name, FlashFamily::Am29, ecu, ProgramMethod::Driver)
    }
}

use Ecu::*;
use FlashFamily::*;
use ProgramMethod::*;

/// All chips known to fit Trionic ECUs
pub static CHIPS: &[FlashChip] = &[
    chip(AMD29BL802C, "AMD", "Am29BL802C", Am29, T8, Driver),
    chip(AMD29F400B, "AMD", "Am29F400B", Am29, T7, Word),
    chip(AMD29F400T, "AMD", "Am29F400T", Am29, T7, Driver),
    chip(AMD29F010, "AMD", "Am29F010", Am29, T55, Word),
    chip(SST39SF010, "SST", "39SF010", Am29, T55, Word),
    chip(AMICA29010L, "AMIC", "A29010L", Am29, T55, Word),
    atmel(ATMEL29C010, "AT29C010", T55),
    chip(AMD28F010, "AMD", "Am28F010", Am28, T55, Word),
    chip(INTEL28F010, "Intel", "28F010", Am28, T55, Word),
    chip(AMD28F512, "AMD", "Am28F512", Am28, T52, Word),
    chip(INTEL28F512, "Intel", "28F512", Am28, T52, Word),
    atmel(ATMEL29C512, "AT29C512", T52),
];

/// Find a chip by its device type byte
pub fn find_by_code(code: u8) -> Option<&'static FlashChip> {
    CHIPS.iter().find(|c| c.code == code)
}

/// Find a chip by name (case-insensitive)
pub fn find_by_name(name: &str) -> Option<&'static FlashChip> {
    CHIPS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}
