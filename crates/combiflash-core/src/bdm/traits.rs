//! BDM port trait definitions

use crate::error::Result;
use bitflags::bitflags;

bitflags! {
    /// Target pin state as seen by the BDM interface
    ///
    /// Reported to the host by the pin-state command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TargetStatus: u8 {
        /// Target supply is present
        const POWERED = 1 << 0;
        /// FREEZE is asserted: CPU halted in background mode
        const FROZEN  = 1 << 1;
        /// RESET line is asserted
        const RESET   = 1 << 2;
        /// CPU is executing code
        const RUNNING = 1 << 3;
    }
}

impl Default for TargetStatus {
    fn default() -> Self {
        TargetStatus::empty()
    }
}

/// Width of a single BDM memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSize {
    /// 8-bit access
    Byte,
    /// 16-bit access
    Word,
    /// 32-bit access
    Long,
}

impl AccessSize {
    /// Decode a width in bytes (1, 2 or 4)
    pub fn from_width(width: u8) -> Option<Self> {
        match width {
            1 => Some(Self::Byte),
            2 => Some(Self::Word),
            4 => Some(Self::Long),
            _ => None,
        }
    }

    /// Width in bytes
    pub const fn width(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Long => 4,
        }
    }
}

/// BDM port trait
///
/// Primitive accesses to a CPU32 target halted in background mode. Every
/// method maps to one BDM command (or a short fixed sequence of them) and
/// reports failure as [`Error::BdmError`](crate::Error::BdmError) or a more
/// specific error. The flash algorithms in [`crate::protocol`] only use
/// these primitives.
///
/// Addresses are 24-bit CPU32 addresses carried in a `u32`.
pub trait BdmPort {
    /// Read a byte from target memory
    fn read_byte(&mut self, addr: u32) -> Result<u8>;

    /// Read a word from target memory
    fn read_word(&mut self, addr: u32) -> Result<u16>;

    /// Read a long word from target memory
    fn read_long(&mut self, addr: u32) -> Result<u32>;

    /// Continue reading after the last access
    ///
    /// Reads the next `size` bytes following the address of the previous
    /// read (the BDM `DUMP` command). Cheaper than an addressed read.
    fn read_next(&mut self, size: AccessSize) -> Result<u32>;

    /// Write a byte to target memory
    fn write_byte(&mut self, addr: u32, value: u8) -> Result<()>;

    /// Write a word to target memory
    fn write_word(&mut self, addr: u32, value: u16) -> Result<()>;

    /// Write a long word to target memory
    fn write_long(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Continue writing after the last access (the BDM `FILL` command)
    fn fill(&mut self, size: AccessSize, value: u32) -> Result<()>;

    /// Read a CPU system register
    fn read_sysreg(&mut self, reg: u8) -> Result<u32>;

    /// Write a CPU system register
    fn write_sysreg(&mut self, reg: u8, value: u32) -> Result<()>;

    /// Read an address or data register (0-7 = D0-D7, 8-15 = A0-A7)
    fn read_adreg(&mut self, reg: u8) -> Result<u32>;

    /// Write an address or data register
    fn write_adreg(&mut self, reg: u8, value: u32) -> Result<()>;

    /// Halt the target and enter background mode
    fn stop(&mut self) -> Result<()>;

    /// Reset the target and let it run
    fn reset(&mut self) -> Result<()>;

    /// Reset the target and halt it in background mode
    fn restart(&mut self) -> Result<()>;

    /// Execute a single instruction
    fn step(&mut self) -> Result<()>;

    /// Leave background mode
    ///
    /// With `Some(pc)` execution starts at `pc`, with `None` it resumes at
    /// the current program counter.
    fn run(&mut self, pc: Option<u32>) -> Result<()>;

    /// Sample the target pin state
    fn status(&mut self) -> Result<TargetStatus>;

    /// Check whether the target CPU is executing
    ///
    /// The signal may glitch while the CPU changes state; callers that need
    /// a stable answer must debounce it.
    fn is_running(&mut self) -> Result<bool> {
        Ok(self.status()?.contains(TargetStatus::RUNNING))
    }

    /// Read `size` bytes at `addr` zero-extended to a `u32`
    fn read(&mut self, size: AccessSize, addr: u32) -> Result<u32> {
        match size {
            AccessSize::Byte => self.read_byte(addr).map(u32::from),
            AccessSize::Word => self.read_word(addr).map(u32::from),
            AccessSize::Long => self.read_long(addr),
        }
    }

    /// Write the low `size` bytes of `value` at `addr`
    fn write(&mut self, size: AccessSize, addr: u32, value: u32) -> Result<()> {
        match size {
            AccessSize::Byte => self.write_byte(addr, value as u8),
            AccessSize::Word => self.write_word(addr, value as u16),
            AccessSize::Long => self.write_long(addr, value),
        }
    }
}
