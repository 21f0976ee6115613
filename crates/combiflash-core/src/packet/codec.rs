//! Packet framing
//!
//! Wire format: `[cmd][len_hi][len_lo][payload; len][term]`, where `term`
//! is [`TERM_ACK`] or [`TERM_NACK`].

use embedded_io::{Read, ReadExactError, ReadReady, Write};
use heapless::Vec;

use super::commands::{command_name, TERM_ACK, TERM_NACK};
use crate::error::{Error, Result};

/// Header size: command plus big-endian length
pub const HEADER_LEN: usize = 3;
/// Largest payload the codec accepts
pub const MAX_PAYLOAD: usize = 256;
/// Largest encoded frame
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD + 1;

/// A single framed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command code
    pub command: u8,
    /// Message body
    pub payload: Vec<u8, MAX_PAYLOAD>,
    /// ACK or NACK
    pub terminator: u8,
}

impl Packet {
    /// Create an empty ACK packet
    pub fn new(command: u8) -> Self {
        Self {
            command,
            payload: Vec::new(),
            terminator: TERM_ACK,
        }
    }

    /// Create an ACK packet carrying `data`
    pub fn with_payload(command: u8, data: &[u8]) -> Result<Self> {
        let payload =
            Vec::from_slice(data).map_err(|_| Error::PayloadTooLarge { len: data.len() })?;
        Ok(Self {
            command,
            payload,
            terminator: TERM_ACK,
        })
    }

    /// Create an empty NACK packet
    pub fn nack(command: u8) -> Self {
        Self {
            terminator: TERM_NACK,
            ..Self::new(command)
        }
    }

    /// Value of the length field
    pub fn data_len(&self) -> u16 {
        self.payload.len() as u16
    }

    /// Check whether the packet is ACK-terminated
    pub fn is_ack(&self) -> bool {
        self.terminator == TERM_ACK
    }

    /// Whether [`send`] puts the payload bytes on the wire
    ///
    /// A payload whose first byte is zero is treated as absent. The length
    /// field still carries the full payload length.
    pub fn carries_payload(&self) -> bool {
        self.payload.first().is_some_and(|&b| b != 0)
    }

    /// Encode the packet as [`send`] does
    ///
    /// Returns the number of bytes written to `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.encode_frame(buf, self.carries_payload())
    }

    /// Encode the packet with its payload regardless of content
    pub fn encode_block(&self, buf: &mut [u8]) -> Result<usize> {
        self.encode_frame(buf, !self.payload.is_empty())
    }

    fn encode_frame(&self, buf: &mut [u8], with_payload: bool) -> Result<usize> {
        let body = if with_payload { self.payload.len() } else { 0 };
        let total = HEADER_LEN + body + 1;
        if buf.len() < total {
            return Err(Error::BufferTooSmall);
        }

        let [len_hi, len_lo] = self.data_len().to_be_bytes();
        buf[0] = self.command;
        buf[1] = len_hi;
        buf[2] = len_lo;
        buf[HEADER_LEN..HEADER_LEN + body].copy_from_slice(&self.payload[..body]);
        buf[HEADER_LEN + body] = self.terminator;
        Ok(total)
    }

    /// Decode one packet from the start of `bytes`
    ///
    /// Returns the packet and the number of bytes consumed. Packets that
    /// are not ACK-terminated are rejected.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::UnexpectedEof);
        }
        let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        if len > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge { len });
        }
        let total = HEADER_LEN + len + 1;
        if bytes.len() < total {
            return Err(Error::UnexpectedEof);
        }

        let terminator = bytes[total - 1];
        check_terminator(terminator)?;

        let payload = Vec::from_slice(&bytes[HEADER_LEN..HEADER_LEN + len])
            .map_err(|_| Error::PayloadTooLarge { len })?;
        Ok((
            Self {
                command: bytes[0],
                payload,
                terminator,
            },
            total,
        ))
    }
}

fn check_terminator(terminator: u8) -> Result<()> {
    match terminator {
        TERM_ACK => Ok(()),
        TERM_NACK => Err(Error::Nack),
        other => Err(Error::BadTerminator(other)),
    }
}

fn read_error<E>(e: ReadExactError<E>) -> Error {
    match e {
        ReadExactError::UnexpectedEof => Error::UnexpectedEof,
        ReadExactError::Other(_) => Error::TransportError,
    }
}

/// A receive failure, with the command byte when the header got through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameError {
    /// Command of the broken packet, if its header was read
    pub command: Option<u8>,
    /// What went wrong
    pub error: Error,
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        e.error
    }
}

/// Receive one packet
///
/// Returns `Ok(None)` without consuming anything when the channel has no
/// data ready. Otherwise reads the header, the payload and the terminator;
/// a short read fails with [`Error::UnexpectedEof`] and a packet that is not
/// ACK-terminated fails with [`Error::Nack`] or [`Error::BadTerminator`].
pub fn receive<C>(channel: &mut C) -> Result<Option<Packet>>
where
    C: Read + ReadReady + ?Sized,
{
    receive_frame(channel).map_err(Error::from)
}

/// Like [`receive`], but a failure after the header keeps the command
///
/// An oversized packet is read to its end and discarded, so the next
/// packet starts on a frame boundary.
pub fn receive_frame<C>(channel: &mut C) -> core::result::Result<Option<Packet>, FrameError>
where
    C: Read + ReadReady + ?Sized,
{
    let fail = |command, error| FrameError { command, error };

    if !channel
        .read_ready()
        .map_err(|_| fail(None, Error::TransportError))?
    {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_LEN];
    channel
        .read_exact(&mut header)
        .map_err(|e| fail(None, read_error(e)))?;
    let command = header[0];
    let len = u16::from_be_bytes([header[1], header[2]]) as usize;
    let fail = |error| FrameError {
        command: Some(command),
        error,
    };

    if len > MAX_PAYLOAD {
        discard(channel, len + 1).map_err(|e| fail(read_error(e)))?;
        return Err(fail(Error::PayloadTooLarge { len }));
    }

    let mut payload = Vec::new();
    payload
        .resize(len, 0)
        .map_err(|_| fail(Error::PayloadTooLarge { len }))?;
    channel
        .read_exact(&mut payload)
        .map_err(|e| fail(read_error(e)))?;

    let mut term = [0u8; 1];
    channel
        .read_exact(&mut term)
        .map_err(|e| fail(read_error(e)))?;

    log::trace!(
        "combi: rx {} (0x{:02X}) len {} term 0x{:02X}",
        command_name(command),
        command,
        len,
        term[0]
    );
    check_terminator(term[0]).map_err(fail)?;

    Ok(Some(Packet {
        command,
        payload,
        terminator: term[0],
    }))
}

/// Read and drop `n` bytes
fn discard<C: Read + ?Sized>(
    channel: &mut C,
    mut n: usize,
) -> core::result::Result<(), ReadExactError<C::Error>> {
    let mut scratch = [0u8; 64];
    while n > 0 {
        let chunk = n.min(scratch.len());
        channel.read_exact(&mut scratch[..chunk])?;
        n -= chunk;
    }
    Ok(())
}

fn write_frame<C: Write + ?Sized>(channel: &mut C, frame: &[u8]) -> Result<()> {
    channel
        .write_all(frame)
        .map_err(|_| Error::TransportError)?;
    channel.flush().map_err(|_| Error::TransportError)
}

/// Send a packet
///
/// The whole frame is assembled first and handed to the channel in one
/// write. See [`Packet::carries_payload`] for when the payload is omitted.
pub fn send<C: Write + ?Sized>(channel: &mut C, packet: &Packet) -> Result<()> {
    let mut frame = [0u8; MAX_FRAME_LEN];
    let n = packet.encode(&mut frame)?;
    log::trace!(
        "combi: tx {} (0x{:02X}) len {} term 0x{:02X}",
        command_name(packet.command),
        packet.command,
        packet.payload.len(),
        packet.terminator
    );
    write_frame(channel, &frame[..n])
}

/// Send a data block packet
///
/// Like [`send`], but the payload always goes on the wire. Used for
/// streamed flash contents, which may begin with a zero byte.
pub fn send_block<C: Write + ?Sized>(channel: &mut C, packet: &Packet) -> Result<()> {
    let mut frame = [0u8; MAX_FRAME_LEN];
    let n = packet.encode_block(&mut frame)?;
    write_frame(channel, &frame[..n])
}

/// Reply to `source` with `data` and `terminator`
///
/// The reply carries the command code of `source`. Returns the packet that
/// was sent.
pub fn send_reply<C: Write + ?Sized>(
    channel: &mut C,
    source: &Packet,
    data: &[u8],
    terminator: u8,
) -> Result<Packet> {
    let mut reply = Packet::with_payload(source.command, data)?;
    reply.terminator = terminator;
    send(channel, &reply)?;
    Ok(reply)
}
