//! Flash chip type definitions

use crate::bdm::BdmPort;
use crate::clock::Clock;
use crate::error::Result;
use crate::protocol::{am28, am29};

/// An address/value pair of an unlock sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemPair {
    /// Target address
    pub addr: u32,
    /// Word written at `addr`
    pub value: u16,
}

impl MemPair {
    /// Create a new pair
    pub const fn new(addr: u32, value: u16) -> Self {
        Self { addr, value }
    }
}

/// Flash command set
///
/// Both families are wired as a pair of 8-bit chips on a 16-bit bus, so
/// every command byte is written to both halves of a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashFamily {
    /// AMD 29Fxxx style: JEDEC unlock cycles, embedded erase and program
    Am29,
    /// AMD 28Fxxx style: host-timed erase and program pulses
    Am28,
}

impl FlashFamily {
    /// Tag used in flash command payloads
    pub const fn tag(self) -> &'static [u8; 6] {
        match self {
            Self::Am29 => b"29f010",
            Self::Am28 => b"28f010",
        }
    }

    /// Look up a family from a flash command tag
    pub fn from_tag(tag: &[u8; 6]) -> Option<Self> {
        match tag {
            b"29f010" | b"29f400" => Some(Self::Am29),
            b"28f010" => Some(Self::Am28),
            _ => None,
        }
    }

    /// Short family name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Am29 => "AM29",
            Self::Am28 => "AM28",
        }
    }

    /// Put the chip back into read-array mode
    pub fn reset<P: BdmPort + ?Sized>(self, port: &mut P) -> Result<()> {
        match self {
            Self::Am29 => am29::reset(port),
            Self::Am28 => am28::reset(port),
        }
    }

    /// Program one word and verify it
    pub fn program<P, C>(self, port: &mut P, clock: &C, addr: u32, value: u16) -> Result<()>
    where
        P: BdmPort + ?Sized,
        C: Clock + ?Sized,
    {
        match self {
            Self::Am29 => am29::program_word(port, clock, addr, value),
            Self::Am28 => am28::program_word(port, addr, value),
        }
    }

    /// Erase `start..end`
    ///
    /// AM29 chips only support a whole-chip erase, the range is ignored.
    pub fn erase<P, C>(self, port: &mut P, clock: &C, start: u32, end: u32) -> Result<()>
    where
        P: BdmPort + ?Sized,
        C: Clock + ?Sized,
    {
        match self {
            Self::Am29 => am29::erase_chip(port, clock),
            Self::Am28 => am28::erase(port, clock, start, end),
        }
    }
}

impl core::fmt::Display for FlashFamily {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Trionic ECU generation, told apart by flash size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ecu {
    /// Trionic 5.2, 128 KiB
    T52,
    /// Trionic 5.5, 256 KiB
    T55,
    /// Trionic 7, 512 KiB
    T7,
    /// Trionic 8, 1 MiB
    T8,
}

/// Initial stack pointer of Trionic 5 images
pub const T5_POINTER: u32 = 0xFFFF_F7FC;
/// Initial stack pointer of Trionic 7 images
pub const T7_POINTER: u32 = 0xFFFF_EFFC;
/// Initial stack pointer of Trionic 8 images
pub const T8_POINTER: u32 = 0x0010_0C00;

impl Ecu {
    /// Total flash size in bytes
    pub const fn flash_size(self) -> u32 {
        match self {
            Self::T52 => 0x2_0000,
            Self::T55 => 0x4_0000,
            Self::T7 => 0x8_0000,
            Self::T8 => 0x10_0000,
        }
    }

    /// First long word of a valid image
    pub const fn signature(self) -> u32 {
        match self {
            Self::T52 | Self::T55 => T5_POINTER,
            Self::T7 => T7_POINTER,
            Self::T8 => T8_POINTER,
        }
    }

    /// Display name
    pub const fn name(self) -> &'static str {
        match self {
            Self::T52 => "T5.2",
            Self::T55 => "T5.5",
            Self::T7 => "T7",
            Self::T8 => "T8",
        }
    }
}

impl core::fmt::Display for Ecu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a whole image is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramMethod {
    /// Erase and program through a driver running on the target CPU
    Driver,
    /// Erase and program word by word over BDM
    Word,
}

/// Flash chip definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashChip {
    /// Device type byte returned by identification
    pub code: u8,
    /// Vendor name
    pub vendor: &'static str,
    /// Chip name
    pub name: &'static str,
    /// Command set
    pub family: FlashFamily,
    /// ECU this chip is fitted to
    pub ecu: Ecu,
    /// Image programming method
    pub method: ProgramMethod,
    /// Chip supports the BDM word program routine of its family
    pub programmable: bool,
    /// Chip must be erased before programming
    pub needs_erase: bool,
}

impl FlashChip {
    /// Total flash size in bytes
    pub const fn flash_size(&self) -> u32 {
        self.ecu.flash_size()
    }

    /// Expected first long word of an image for this chip
    pub const fn signature(&self) -> u32 {
        self.ecu.signature()
    }
}
