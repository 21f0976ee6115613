//! Error types for combiflash-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.

use core::fmt;

/// Details about an erase failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseFailure {
    /// Writing the erase command sequence failed
    CommandFailed {
        /// Address of the command write that failed
        addr: u32,
    },
    /// Erase verification failed - flash not erased to 0xFF
    VerifyFailed {
        /// Address where verification stopped
        addr: u32,
    },
    /// The chip never reported an erased array
    Timeout,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Transport errors
    /// The byte channel reported an error
    TransportError,
    /// The channel ran out of bytes in the middle of a packet
    UnexpectedEof,
    /// Packet body is longer than the codec accepts
    PayloadTooLarge {
        /// Length announced in the header
        len: usize,
    },
    /// Packet terminator was neither ACK nor NACK
    BadTerminator(u8),
    /// Packet was terminated with NACK
    Nack,
    /// Packet payload does not match the layout of its command
    InvalidPayload,
    /// Command code is not handled
    UnknownCommand(u8),

    // Target errors
    /// A BDM transfer to the target failed
    BdmError,
    /// The target must be halted in background mode for this operation
    TargetNotHalted,

    // Chip errors
    /// Identification returned a type code missing from the database
    ChipNotFound {
        /// Manufacturer byte
        make: u8,
        /// Device type byte
        code: u8,
    },
    /// Flash chip is known but the requested operation is not available
    ChipNotSupported,

    // Operation errors
    /// Erase operation failed
    EraseError(EraseFailure),
    /// Word programming failed
    ProgramFailed {
        /// First address that could not be programmed
        addr: u32,
    },
    /// Operation timed out
    Timeout,
    /// Injected driver did not return to background mode in time
    DriverTimeout,
    /// Injected driver returned a failure code in D0
    DriverFailed {
        /// Value read back from D0
        result: u32,
    },

    // Image errors
    /// Image size does not match the flash size
    ImageSizeMismatch {
        /// Expected size in bytes
        expected: u32,
        /// Actual image size in bytes
        found: u32,
    },
    /// Image does not start with the reset vector of the detected ECU
    SignatureMismatch {
        /// Expected first long word
        expected: u32,
        /// First long word of the image
        found: u32,
    },

    // Host errors
    /// Host aborted the transfer
    Aborted,

    // Address/size errors
    /// Address range is empty, reversed or beyond the flash
    AddressOutOfBounds,
    /// Provided buffer is too small for the operation
    BufferTooSmall,

    // I/O errors
    /// Writing to the dump sink failed
    IoError,
}

impl fmt::Display for EraseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandFailed { addr } => {
                write!(f, "erase command write failed at address 0x{:08X}", addr)
            }
            Self::VerifyFailed { addr } => {
                write!(f, "erase verify failed at 0x{:08X}", addr)
            }
            Self::Timeout => write!(f, "erase did not complete in time"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportError => write!(f, "transport error"),
            Self::UnexpectedEof => write!(f, "unexpected end of packet"),
            Self::PayloadTooLarge { len } => write!(f, "packet payload too large: {} bytes", len),
            Self::BadTerminator(t) => write!(f, "invalid packet terminator 0x{:02X}", t),
            Self::Nack => write!(f, "NACK received"),
            Self::InvalidPayload => write!(f, "invalid command payload"),
            Self::UnknownCommand(cmd) => write!(f, "unknown command 0x{:02X}", cmd),
            Self::BdmError => write!(f, "BDM transfer failed"),
            Self::TargetNotHalted => write!(f, "target is not in background mode"),
            Self::ChipNotFound { make, code } => write!(
                f,
                "unknown flash chip (make 0x{:02X}, type 0x{:02X})",
                make, code
            ),
            Self::ChipNotSupported => write!(f, "operation not supported by this flash chip"),
            Self::EraseError(failure) => write!(f, "{}", failure),
            Self::ProgramFailed { addr } => write!(f, "programming failed at 0x{:08X}", addr),
            Self::Timeout => write!(f, "operation timed out"),
            Self::DriverTimeout => write!(f, "flash driver did not return to BDM mode"),
            Self::DriverFailed { result } => {
                write!(f, "flash driver reported failure (D0 = 0x{:08X})", result)
            }
            Self::ImageSizeMismatch { expected, found } => write!(
                f,
                "image size 0x{:X} does not match flash size 0x{:X}",
                found, expected
            ),
            Self::SignatureMismatch { expected, found } => write!(
                f,
                "image reset vector 0x{:08X} does not match expected 0x{:08X}",
                found, expected
            ),
            Self::Aborted => write!(f, "transfer aborted by host"),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
