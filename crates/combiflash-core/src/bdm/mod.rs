//! Background debug mode access to the target CPU
//!
//! The engine does not drive the BDM pins itself. It talks to the target
//! through the [`BdmPort`] trait, which an adapter implements on top of
//! its BDM driver (or which the emulator in `combiflash-dummy` implements
//! in memory).

mod traits;

pub use traits::*;

/// CPU32 system register holding the program counter
pub const SYSREG_RPC: u8 = 0x00;
/// CPU32 source function code register
pub const SYSREG_SFC: u8 = 0x0e;
/// CPU32 destination function code register
pub const SYSREG_DFC: u8 = 0x0f;
/// Address/data register file index of D0
pub const ADREG_D0: u8 = 0x00;
