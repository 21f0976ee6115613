//! Host side of the combi adapter protocol
//!
//! [`Client`] sends commands to an adapter and waits for the replies.
//! Unsolicited CAN frames that arrive in between are queued. The client
//! also implements [`BdmPort`] over the memory and register commands, so
//! the flash engine can drive a remote target.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use combiflash_core::bdm::{AccessSize, BdmPort, TargetStatus};
use combiflash_core::chip::FlashFamily;
use combiflash_core::flash::{AbortSignal, Progress, BLOCK_LEN};
use combiflash_core::packet::{self, *};
use combiflash_core::Error;

use crate::error::{AdapterError, Result};
use crate::transport::{Channel, Transport};

/// How long to wait for a flash erase to be acknowledged
pub const ERASE_REPLY_TIMEOUT: Duration = Duration::from_secs(210);

/// Connection to an adapter
pub struct Client<T> {
    channel: Channel<T>,
    frames: VecDeque<CanFrame>,
    last_addr: u32,
}

impl<T: Transport> Client<T> {
    /// Talk to an adapter over `transport`
    pub fn new(transport: T) -> Self {
        Self {
            channel: Channel::new(transport),
            frames: VecDeque::new(),
            last_addr: 0,
        }
    }

    /// Get the underlying channel
    pub fn channel_mut(&mut self) -> &mut Channel<T> {
        &mut self.channel
    }

    fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.channel.timeout_ms() as u64)
    }

    /// Send a packet with its payload always on the wire
    fn send(&mut self, packet: &Packet) -> Result<()> {
        packet::send_block(&mut self.channel, packet)?;
        Ok(())
    }

    /// Wait for the next packet that is not a relayed CAN frame
    fn receive(&mut self, command: u8, timeout: Duration) -> Result<Packet> {
        let start = Instant::now();
        loop {
            match packet::receive(&mut self.channel) {
                Ok(Some(p)) if p.command == CMD_CAN_FRAME => match CanFrame::parse(&p.payload) {
                    Ok(frame) => self.frames.push_back(frame),
                    Err(_) => log::warn!("client: dropped malformed CAN frame"),
                },
                Ok(Some(p)) => return Ok(p),
                Ok(None) if start.elapsed() > timeout => return Err(AdapterError::Timeout),
                Ok(None) => {}
                Err(Error::Nack) => return Err(AdapterError::Nack(command)),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn expect_reply(&mut self, command: u8, timeout: Duration) -> Result<Packet> {
        let reply = self.receive(command, timeout)?;
        if reply.command != command {
            return Err(AdapterError::UnexpectedReply {
                command,
                reply: reply.command,
            });
        }
        Ok(reply)
    }

    fn request(&mut self, command: u8, data: &[u8]) -> Result<Packet> {
        self.send(&Packet::with_payload(command, data)?)?;
        let timeout = self.reply_timeout();
        self.expect_reply(command, timeout)
    }

    fn request_value(&mut self, command: u8, data: &[u8], width: usize) -> Result<u32> {
        let reply = self.request(command, data)?;
        if reply.payload.len() != width {
            return Err(AdapterError::MalformedReply(command));
        }
        Ok(reply
            .payload
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
    }

    /// Query the firmware version as (major, minor)
    pub fn version(&mut self) -> Result<(u8, u8)> {
        let reply = self.request(CMD_BRD_FWVERSION, &[])?;
        match reply.payload[..] {
            [major, minor] => Ok((major, minor)),
            _ => Err(AdapterError::MalformedReply(CMD_BRD_FWVERSION)),
        }
    }

    /// Read the exhaust gas thermocouple
    pub fn egt(&mut self) -> Result<Option<f32>> {
        let reply = self.request(CMD_BRD_EGT, &[])?;
        match reply.payload[..] {
            [valid, a, b, c, d] => Ok((valid != 0).then(|| f32::from_le_bytes([a, b, c, d]))),
            _ => Err(AdapterError::MalformedReply(CMD_BRD_EGT)),
        }
    }

    /// Halt the target in background mode
    pub fn stop_chip(&mut self) -> Result<()> {
        self.request(CMD_BDM_STOP_CHIP, &[]).map(drop)
    }

    /// Reset the target and let it run
    pub fn reset_chip(&mut self) -> Result<()> {
        self.request(CMD_BDM_RESET_CHIP, &[]).map(drop)
    }

    /// Reset the target into background mode
    pub fn restart_chip(&mut self) -> Result<()> {
        self.request(CMD_BDM_RESTART_CHIP, &[]).map(drop)
    }

    /// Single-step the target
    pub fn step_chip(&mut self) -> Result<()> {
        self.request(CMD_BDM_STEP_CHIP, &[]).map(drop)
    }

    /// Leave background mode at `addr`
    pub fn run_chip(&mut self, addr: u32) -> Result<()> {
        self.request(CMD_BDM_RUN_CHIP, &addr.to_be_bytes()).map(drop)
    }

    /// Read target memory; `None` continues after the previous access
    pub fn read_memory(&mut self, size: AccessSize, addr: Option<u32>) -> Result<u32> {
        let mut data = vec![size.width() as u8];
        match addr {
            Some(addr) => {
                data.push(1);
                data.extend_from_slice(&addr.to_be_bytes());
            }
            None => data.push(0),
        }
        self.request_value(CMD_BDM_MEM_READ, &data, size.width())
    }

    /// Write target memory
    pub fn write_memory(&mut self, size: AccessSize, addr: u32, value: u32) -> Result<()> {
        let mut data = vec![size.width() as u8];
        data.extend_from_slice(&addr.to_be_bytes());
        data.extend_from_slice(&value.to_be_bytes()[4 - size.width()..]);
        self.request(CMD_BDM_MEM_WRITE, &data).map(drop)
    }

    /// Read a CPU system register
    pub fn read_system_register(&mut self, reg: u8) -> Result<u32> {
        self.request_value(CMD_BDM_SYSREG_READ, &[reg], 4)
    }

    /// Write a CPU system register
    pub fn write_system_register(&mut self, reg: u8, value: u32) -> Result<()> {
        let mut data = vec![reg];
        data.extend_from_slice(&value.to_be_bytes());
        self.request(CMD_BDM_SYSREG_WRITE, &data).map(drop)
    }

    /// Read an address or data register
    pub fn read_register(&mut self, reg: u8) -> Result<u32> {
        self.request_value(CMD_BDM_ADREG_READ, &[reg], 4)
    }

    /// Write an address or data register
    pub fn write_register(&mut self, reg: u8, value: u32) -> Result<()> {
        let mut data = vec![reg];
        data.extend_from_slice(&value.to_be_bytes());
        self.request(CMD_BDM_ADREG_WRITE, &data).map(drop)
    }

    /// Sample the BDM pin state
    pub fn pin_state(&mut self) -> Result<TargetStatus> {
        let value = self.request_value(CMD_BDM_PINSTATE, &[], 1)?;
        Ok(TargetStatus::from_bits_truncate(value as u8))
    }

    /// Stream `start..end` of the flash into `sink`
    ///
    /// When `abort` fires the adapter is told to stop; the call then fails
    /// with [`Error::Aborted`].
    pub fn read_flash<S, A, R>(
        &mut self,
        family: FlashFamily,
        start: u32,
        end: u32,
        sink: &mut S,
        abort: &A,
        progress: &mut R,
    ) -> Result<()>
    where
        S: std::io::Write + ?Sized,
        A: AbortSignal + ?Sized,
        R: Progress + ?Sized,
    {
        let cmd = FlashCommand::new(family, start, end);
        cmd.validate_range()?;
        self.send(&Packet::with_payload(CMD_BDM_READ_FLASH, &cmd.encode())?)?;

        let total = end - start;
        let timeout = self.reply_timeout();
        let mut received = 0u32;
        progress.reading(total);

        while received < total {
            if abort.is_aborted() {
                return self.abort(CMD_BDM_READ_FLASH);
            }
            let block = self.expect_reply(CMD_BDM_READ_FLASH, timeout)?;
            if block.payload.is_empty() || received + block.payload.len() as u32 > total {
                return Err(AdapterError::MalformedReply(CMD_BDM_READ_FLASH));
            }
            sink.write_all(&block.payload)?;
            received += block.payload.len() as u32;
            progress.read_progress(received);
        }

        // Completion ACK
        let done = self.expect_reply(CMD_BDM_READ_FLASH, timeout)?;
        if !done.payload.is_empty() {
            return Err(AdapterError::MalformedReply(CMD_BDM_READ_FLASH));
        }
        progress.complete();
        Ok(())
    }

    /// Tell the adapter to stop a transfer and wait for its NACK
    fn abort(&mut self, command: u8) -> Result<()> {
        log::info!("client: aborting transfer");
        self.send(&Packet::nack(command))?;
        let timeout = self.reply_timeout();
        loop {
            match self.receive(command, timeout) {
                // The transfer finished before the NACK got there
                Ok(p) if p.payload.is_empty() => return Err(Error::Aborted.into()),
                // Blocks already in flight
                Ok(_) => continue,
                Err(AdapterError::Nack(_)) => return Err(Error::Aborted.into()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Erase the flash
    ///
    /// AM29 chips are erased whole; AM28 chips erase `start..end`.
    pub fn erase_flash(&mut self, family: FlashFamily, start: u32, end: u32) -> Result<()> {
        let cmd = FlashCommand::new(family, start, end);
        self.send(&Packet::with_payload(CMD_BDM_ERASE_FLASH, &cmd.encode())?)?;
        self.expect_reply(CMD_BDM_ERASE_FLASH, ERASE_REPLY_TIMEOUT)
            .map(drop)
    }

    /// Program `data` at `start`
    ///
    /// The flash must already be erased.
    pub fn write_flash<R>(
        &mut self,
        family: FlashFamily,
        start: u32,
        data: &[u8],
        progress: &mut R,
    ) -> Result<()>
    where
        R: Progress + ?Sized,
    {
        if data.len() % 2 != 0 {
            return Err(AdapterError::InvalidParameter(
                "image length must be even".into(),
            ));
        }
        let end = start + data.len() as u32;
        let mut cmd = FlashCommand::new(family, start, end);
        // The 29f010 tag makes the adapter start at address 0
        if family == FlashFamily::Am29 && start != 0 {
            cmd.tag = *b"29f400";
        }
        cmd.validate_range()?;

        self.send(&Packet::with_payload(CMD_BDM_WRITE_FLASH, &cmd.encode())?)?;
        let timeout = self.reply_timeout();
        self.expect_reply(CMD_BDM_WRITE_FLASH, timeout)?;

        progress.writing(data.len() as u32);
        let mut written = 0u32;
        for chunk in data.chunks(BLOCK_LEN) {
            self.send(&Packet::with_payload(CMD_BDM_WRITE_FLASH, chunk)?)?;
            self.expect_reply(CMD_BDM_WRITE_FLASH, timeout)?;
            written += chunk.len() as u32;
            progress.write_progress(written);
        }

        // Completion ACK after the final reset
        self.expect_reply(CMD_BDM_WRITE_FLASH, timeout)?;
        progress.complete();
        Ok(())
    }

    /// Open or close the CAN interface
    pub fn can_open(&mut self, open: bool) -> Result<()> {
        self.request(CMD_CAN_OPEN, &[u8::from(open)]).map(drop)
    }

    /// Set the CAN bitrate
    pub fn can_set_bitrate(&mut self, bitrate: u32) -> Result<()> {
        self.request(CMD_CAN_BITRATE, &bitrate.to_be_bytes()).map(drop)
    }

    /// Transmit a CAN frame
    pub fn can_send(&mut self, frame: &CanFrame) -> Result<()> {
        use zerocopy::IntoBytes;
        self.request(CMD_CAN_TXFRAME, frame.as_bytes()).map(drop)
    }

    /// Next received CAN frame, waiting up to `timeout`
    pub fn can_receive(&mut self, timeout: Duration) -> Result<Option<CanFrame>> {
        let start = Instant::now();
        while self.frames.is_empty() && start.elapsed() < timeout {
            match packet::receive(&mut self.channel) {
                Ok(Some(p)) if p.command == CMD_CAN_FRAME => {
                    self.frames.push_back(CanFrame::parse(&p.payload)?);
                }
                Ok(Some(p)) => {
                    log::warn!("client: unexpected packet 0x{:02X}", p.command);
                }
                Ok(None) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.frames.pop_front())
    }
}

impl<T: Transport> BdmPort for Client<T> {
    fn read_byte(&mut self, addr: u32) -> combiflash_core::Result<u8> {
        self.last_addr = addr;
        Ok(self.read_memory(AccessSize::Byte, Some(addr))? as u8)
    }

    fn read_word(&mut self, addr: u32) -> combiflash_core::Result<u16> {
        self.last_addr = addr;
        Ok(self.read_memory(AccessSize::Word, Some(addr))? as u16)
    }

    fn read_long(&mut self, addr: u32) -> combiflash_core::Result<u32> {
        self.last_addr = addr;
        Ok(self.read_memory(AccessSize::Long, Some(addr))?)
    }

    fn read_next(&mut self, size: AccessSize) -> combiflash_core::Result<u32> {
        self.last_addr = self.last_addr.wrapping_add(size.width() as u32);
        Ok(self.read_memory(size, None)?)
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> combiflash_core::Result<()> {
        self.last_addr = addr;
        Ok(self.write_memory(AccessSize::Byte, addr, value.into())?)
    }

    fn write_word(&mut self, addr: u32, value: u16) -> combiflash_core::Result<()> {
        self.last_addr = addr;
        Ok(self.write_memory(AccessSize::Word, addr, value.into())?)
    }

    fn write_long(&mut self, addr: u32, value: u32) -> combiflash_core::Result<()> {
        self.last_addr = addr;
        Ok(self.write_memory(AccessSize::Long, addr, value)?)
    }

    fn fill(&mut self, size: AccessSize, value: u32) -> combiflash_core::Result<()> {
        // The protocol has no fill command; write at the next address
        let addr = self.last_addr.wrapping_add(size.width() as u32);
        self.last_addr = addr;
        Ok(self.write_memory(size, addr, value)?)
    }

    fn read_sysreg(&mut self, reg: u8) -> combiflash_core::Result<u32> {
        Ok(self.read_system_register(reg)?)
    }

    fn write_sysreg(&mut self, reg: u8, value: u32) -> combiflash_core::Result<()> {
        Ok(self.write_system_register(reg, value)?)
    }

    fn read_adreg(&mut self, reg: u8) -> combiflash_core::Result<u32> {
        Ok(self.read_register(reg)?)
    }

    fn write_adreg(&mut self, reg: u8, value: u32) -> combiflash_core::Result<()> {
        Ok(self.write_register(reg, value)?)
    }

    fn stop(&mut self) -> combiflash_core::Result<()> {
        Ok(self.stop_chip()?)
    }

    fn reset(&mut self) -> combiflash_core::Result<()> {
        Ok(self.reset_chip()?)
    }

    fn restart(&mut self) -> combiflash_core::Result<()> {
        Ok(self.restart_chip()?)
    }

    fn step(&mut self) -> combiflash_core::Result<()> {
        Ok(self.step_chip()?)
    }

    fn run(&mut self, pc: Option<u32>) -> combiflash_core::Result<()> {
        let addr = match pc {
            Some(pc) => pc,
            None => self.read_system_register(combiflash_core::bdm::SYSREG_RPC)?,
        };
        Ok(self.run_chip(addr)?)
    }

    fn status(&mut self) -> combiflash_core::Result<TargetStatus> {
        Ok(self.pin_state()?)
    }
}
