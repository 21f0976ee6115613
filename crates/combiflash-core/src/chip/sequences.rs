//! AM29 unlock sequences
//!
//! AM28 chips ignore the first two cycles, which is why the identify
//! sequence works for both families.

use super::types::MemPair;

/// Word program
pub const AM29_WRITE: &[MemPair] = &[
    MemPair::new(0xaaaa, 0xaaaa),
    MemPair::new(0x5554, 0x5555),
    MemPair::new(0xaaaa, 0xa0a0),
];

/// Chip erase
pub const AM29_ERASE: &[MemPair] = &[
    MemPair::new(0xaaaa, 0xaaaa),
    MemPair::new(0x5554, 0x5555),
    MemPair::new(0xaaaa, 0x8080),
    MemPair::new(0xaaaa, 0xaaaa),
    MemPair::new(0x5554, 0x5555),
    MemPair::new(0xaaaa, 0x1010),
];

/// Return to read-array mode
pub const AM29_RESET: &[MemPair] = &[
    MemPair::new(0xaaaa, 0xaaaa),
    MemPair::new(0x5554, 0x5555),
    MemPair::new(0xaaaa, 0xf0f0),
];

/// Autoselect (manufacturer and device id)
pub const AM29_ID: &[MemPair] = &[
    MemPair::new(0xaaaa, 0xaaaa),
    MemPair::new(0x5554, 0x5555),
    MemPair::new(0xaaaa, 0x9090),
];
