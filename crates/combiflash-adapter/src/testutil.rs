//! Scripted host link for the dispatcher and stream tests

use std::collections::VecDeque;

use combiflash_core::packet::{Packet, MAX_FRAME_LEN};
use embedded_io::{ErrorType, Read, ReadReady};

/// Host side of the link, scripted up front
#[derive(Default)]
pub struct Script {
    pub rx: VecDeque<u8>,
}

impl Script {
    pub fn push(&mut self, packet: &Packet) {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let n = packet.encode_block(&mut buf).unwrap();
        self.rx.extend(&buf[..n]);
    }
}

impl ErrorType for Script {
    type Error = core::convert::Infallible;
}

impl Read for Script {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = buf.len().min(self.rx.len());
        for (dst, src) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl ReadReady for Script {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx.is_empty())
    }
}

/// Split a byte log into packets, NACK-terminated ones included
pub fn decode_all(mut bytes: &[u8]) -> Vec<Packet> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        let total = 3 + len + 1;
        let mut p = Packet::with_payload(bytes[0], &bytes[3..3 + len]).unwrap();
        p.terminator = bytes[total - 1];
        out.push(p);
        bytes = &bytes[total..];
    }
    out
}
