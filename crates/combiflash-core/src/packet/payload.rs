//! Command payload layouts

use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::bdm::AccessSize;
use crate::chip::FlashFamily;
use crate::error::{Error, Result};

/// Parse a 4-byte big-endian value (run address, CAN bitrate)
pub fn parse_be_u32(data: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = data.try_into().map_err(|_| Error::InvalidPayload)?;
    Ok(u32::from_be_bytes(bytes))
}

/// Decoded memory read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemReadRequest {
    /// Access width
    pub size: AccessSize,
    /// `None` continues after the previous access
    pub addr: Option<u32>,
}

impl MemReadRequest {
    /// Parse `[width][mode][addr BE; 4 if mode != 0]`
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::InvalidPayload);
        }
        let size = AccessSize::from_width(data[0]).ok_or(Error::InvalidPayload)?;
        let addr = if data[1] == 0 {
            None
        } else {
            Some(parse_be_u32(data.get(2..6).ok_or(Error::InvalidPayload)?)?)
        };
        Ok(Self { size, addr })
    }
}

/// Decoded memory write request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemWriteRequest {
    /// Access width
    pub size: AccessSize,
    /// Target address
    pub addr: u32,
    /// Value, right-aligned
    pub value: u32,
}

impl MemWriteRequest {
    /// Parse `[width][addr BE; 4][value BE; width]`
    pub fn parse(data: &[u8]) -> Result<Self> {
        let size = AccessSize::from_width(*data.first().ok_or(Error::InvalidPayload)?)
            .ok_or(Error::InvalidPayload)?;
        if data.len() != 5 + size.width() {
            return Err(Error::InvalidPayload);
        }
        let addr = parse_be_u32(&data[1..5])?;
        let value = data[5..]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        Ok(Self { size, addr, value })
    }
}

/// Decoded register write request: `[reg][value BE; 4]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    /// Register index
    pub reg: u8,
    /// New value
    pub value: u32,
}

impl RegisterWrite {
    /// Parse a register write payload
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != 5 {
            return Err(Error::InvalidPayload);
        }
        Ok(Self {
            reg: data[0],
            value: parse_be_u32(&data[1..5])?,
        })
    }
}

/// Length of a flash read/erase/write command payload
pub const FLASH_COMMAND_LEN: usize = 14;

/// Decoded flash read/erase/write command
///
/// Layout: `[tag; 6][start BE; 4][end; 4]`. The tag is the chip type name
/// ("29f010", "29f400", "28f010") and selects the flash family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashCommand {
    /// Raw chip type tag
    pub tag: [u8; 6],
    /// First address
    pub start: u32,
    /// Address one past the end
    pub end: u32,
}

impl FlashCommand {
    /// Parse a 14-byte flash command payload
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != FLASH_COMMAND_LEN {
            return Err(Error::InvalidPayload);
        }
        let mut tag = [0u8; 6];
        tag.copy_from_slice(&data[0..6]);
        let start = parse_be_u32(&data[6..10])?;
        // Existing host tools assemble the end address in this order
        let end = u32::from(data[13])
            | (u32::from(data[10]) << 24)
            | (u32::from(data[11]) << 16)
            | (u32::from(data[12]) << 8);
        Ok(Self { tag, start, end })
    }

    /// Build a command payload
    pub fn encode(&self) -> [u8; FLASH_COMMAND_LEN] {
        let mut out = [0u8; FLASH_COMMAND_LEN];
        out[0..6].copy_from_slice(&self.tag);
        out[6..10].copy_from_slice(&self.start.to_be_bytes());
        out[10] = (self.end >> 24) as u8;
        out[11] = (self.end >> 16) as u8;
        out[12] = (self.end >> 8) as u8;
        out[13] = self.end as u8;
        out
    }

    /// Create a command for `family` covering `start..end`
    pub fn new(family: FlashFamily, start: u32, end: u32) -> Self {
        Self {
            tag: *family.tag(),
            start,
            end,
        }
    }

    /// Flash family named by the tag
    pub fn family(&self) -> Option<FlashFamily> {
        FlashFamily::from_tag(&self.tag)
    }

    /// Check that the range is non-empty and word aligned
    pub fn validate_range(&self) -> Result<()> {
        if self.start >= self.end || self.start % 2 != 0 || self.end % 2 != 0 {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(())
    }
}

/// Length of a CAN frame payload
pub const CAN_FRAME_LEN: usize = 15;

/// CAN frame as carried in [`CMD_CAN_FRAME`](super::CMD_CAN_FRAME) and
/// [`CMD_CAN_TXFRAME`](super::CMD_CAN_TXFRAME) payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct CanFrame {
    /// Identifier, little-endian on the wire
    pub id: U32,
    /// Data bytes, only the first `len` are meaningful
    pub data: [u8; 8],
    /// Data length code
    pub len: u8,
    /// Nonzero for a 29-bit identifier
    pub is_extended: u8,
    /// Nonzero for a remote frame
    pub is_remote: u8,
}

impl CanFrame {
    /// Create a data frame
    pub fn new(id: u32, data: &[u8], extended: bool) -> Result<Self> {
        if data.len() > 8 {
            return Err(Error::InvalidPayload);
        }
        let mut bytes = [0u8; 8];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Self {
            id: U32::new(id),
            data: bytes,
            len: data.len() as u8,
            is_extended: extended as u8,
            is_remote: 0,
        })
    }

    /// Parse a 15-byte frame payload
    pub fn parse(data: &[u8]) -> Result<Self> {
        let frame = Self::read_from_bytes(data).map_err(|_| Error::InvalidPayload)?;
        if frame.len > 8 {
            return Err(Error::InvalidPayload);
        }
        Ok(frame)
    }

    /// Frame identifier
    pub fn id(&self) -> u32 {
        self.id.get()
    }

    /// Meaningful data bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len.min(8))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mem_read() {
        let req = MemReadRequest::parse(&[4, 1, 0x00, 0x10, 0x07, 0x00]).unwrap();
        assert_eq!(req.size, AccessSize::Long);
        assert_eq!(req.addr, Some(0x0010_0700));

        let req = MemReadRequest::parse(&[2, 0]).unwrap();
        assert_eq!(req.size, AccessSize::Word);
        assert_eq!(req.addr, None);

        assert_eq!(MemReadRequest::parse(&[2]), Err(Error::InvalidPayload));
        assert_eq!(MemReadRequest::parse(&[3, 0]), Err(Error::InvalidPayload));
        assert_eq!(MemReadRequest::parse(&[1, 1, 0xFF]), Err(Error::InvalidPayload));
    }

    #[test]
    fn test_parse_mem_write() {
        let req = MemWriteRequest::parse(&[2, 0x00, 0xFF, 0xFA, 0x04, 0x7F, 0x00]).unwrap();
        assert_eq!(req.size, AccessSize::Word);
        assert_eq!(req.addr, 0x00FF_FA04);
        assert_eq!(req.value, 0x7F00);

        assert_eq!(
            MemWriteRequest::parse(&[4, 0, 0, 0, 0, 1, 2]),
            Err(Error::InvalidPayload)
        );
    }

    #[test]
    fn test_parse_flash_command() {
        let data = [
            b'2', b'8', b'f', b'0', b'1', b'0', // tag
            0x00, 0x00, 0x01, 0x00, // start
            0x00, 0x04, 0x00, 0x00, // end
        ];
        let cmd = FlashCommand::parse(&data).unwrap();
        assert_eq!(cmd.start, 0x100);
        assert_eq!(cmd.end, 0x0004_0000);
        assert_eq!(cmd.family(), Some(FlashFamily::Am28));
        assert_eq!(cmd.encode(), data);

        let data = [0x32, 0x39, 0x66, 0x34, 0x30, 0x30, 0, 0, 0, 0, 0x12, 0x34, 0x56, 0x78];
        let cmd = FlashCommand::parse(&data).unwrap();
        assert_eq!(cmd.end, 0x1234_5678);
        assert_eq!(cmd.family(), Some(FlashFamily::Am29));

        assert_eq!(FlashCommand::parse(&data[..13]), Err(Error::InvalidPayload));
    }

    #[test]
    fn test_flash_command_range() {
        assert!(FlashCommand::new(FlashFamily::Am29, 0, 0x100).validate_range().is_ok());
        assert!(FlashCommand::new(FlashFamily::Am29, 0x100, 0x100).validate_range().is_err());
        assert!(FlashCommand::new(FlashFamily::Am29, 1, 0x100).validate_range().is_err());
    }

    #[test]
    fn test_can_frame_layout() {
        let frame = CanFrame::new(0x7E0, &[0x02, 0x10, 0x03], false).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), CAN_FRAME_LEN);
        assert_eq!(&bytes[0..4], &[0xE0, 0x07, 0x00, 0x00]);
        assert_eq!(&bytes[4..7], &[0x02, 0x10, 0x03]);
        assert_eq!(bytes[12], 3);
        assert_eq!(bytes[13], 0);

        let parsed = CanFrame::parse(bytes).unwrap();
        assert_eq!(parsed.id(), 0x7E0);
        assert_eq!(parsed.payload(), &[0x02, 0x10, 0x03]);
    }

    #[test]
    fn test_can_frame_rejects_bad_length() {
        assert!(CanFrame::parse(&[0u8; 14]).is_err());
        let mut bytes = [0u8; CAN_FRAME_LEN];
        bytes[12] = 9;
        assert!(CanFrame::parse(&bytes).is_err());
        assert!(CanFrame::new(0x100, &[0; 9], false).is_err());
    }
}
