//! Shared packet output
//!
//! The command dispatcher and the CAN relay both send packets on the same
//! link. Every packet goes through one [`PacketWriter`], which holds the
//! link for the duration of a single frame.

use std::sync::{Arc, Mutex, MutexGuard};

use combiflash_core::packet::{self, Packet, TERM_ACK};
use embedded_io::Write;

use crate::error::Result;

/// Cloneable handle serializing packet writes to one link
pub struct PacketWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for PacketWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Write> PacketWriter<W> {
    /// Wrap the write half of a link
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Lock the underlying writer
    ///
    /// A writer whose previous holder panicked is still usable: frames are
    /// written whole, so no half-written state is left behind.
    pub fn lock(&self) -> MutexGuard<'_, W> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a packet (see [`packet::send`])
    pub fn send(&self, packet: &Packet) -> Result<()> {
        packet::send(&mut *self.lock(), packet)?;
        Ok(())
    }

    /// Send a packet with its payload always on the wire
    pub fn send_block(&self, packet: &Packet) -> Result<()> {
        packet::send_block(&mut *self.lock(), packet)?;
        Ok(())
    }

    /// Reply to `source` (see [`packet::send_reply`])
    pub fn send_reply(&self, source: &Packet, data: &[u8], terminator: u8) -> Result<Packet> {
        Ok(packet::send_reply(&mut *self.lock(), source, data, terminator)?)
    }

    /// ACK `source` with a data payload that always goes on the wire
    ///
    /// Used for replies carrying values, which may begin with a zero byte.
    pub fn reply_data(&self, source: &Packet, data: &[u8]) -> Result<Packet> {
        let mut reply = Packet::with_payload(source.command, data)?;
        reply.terminator = TERM_ACK;
        self.send_block(&reply)?;
        Ok(reply)
    }
}
