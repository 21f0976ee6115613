//! Streamed flash transfers between host and target
//!
//! The host names the flash family with the tag of a [`FlashCommand`]; no
//! identification is done here. Reads are sent as a run of data blocks,
//! writes are received block by block with an ACK after each one. While a
//! transfer runs, a host packet terminated with NACK aborts it.

use combiflash_core::bdm::{AccessSize, BdmPort};
use combiflash_core::chip::FlashFamily;
use combiflash_core::clock::{Clock, Deadline};
use combiflash_core::flash::{TransferSession, BLOCK_LEN};
use combiflash_core::packet::{
    self, FlashCommand, Packet, CMD_BDM_READ_FLASH, CMD_BDM_WRITE_FLASH, TERM_ACK,
};
use combiflash_core::Error;
use embedded_io::{Read, ReadReady, Write};

use crate::error::Result;
use crate::writer::PacketWriter;

/// How long a write stream waits for the next block
pub const BLOCK_WAIT_MS: u64 = 5000;

fn family_of(cmd: &FlashCommand) -> Result<FlashFamily> {
    cmd.family().ok_or_else(|| {
        log::warn!(
            "stream: unknown flash tag {:?}",
            String::from_utf8_lossy(&cmd.tag)
        );
        Error::ChipNotSupported.into()
    })
}

/// Poll the link for an abort request
fn check_abort<R: Read + ReadReady + ?Sized>(rx: &mut R) -> Result<()> {
    match packet::receive(rx) {
        Ok(None) => Ok(()),
        Ok(Some(p)) => {
            log::warn!("stream: ignoring command 0x{:02X} during transfer", p.command);
            Ok(())
        }
        Err(Error::Nack) => Err(Error::Aborted.into()),
        Err(e) => Err(e.into()),
    }
}

/// Read `buf.len()` bytes at `addr` as big-endian words
///
/// One addressed long read, then "continue" reads. A trailing word is read
/// with its own address, since a word-sized continue read would only
/// advance by two bytes.
fn read_block<P: BdmPort + ?Sized>(port: &mut P, addr: u32, buf: &mut [u8]) -> Result<()> {
    for (i, chunk) in buf.chunks_mut(4).enumerate() {
        let value = match (i, chunk.len()) {
            (0, 4) => port.read_long(addr)?,
            (_, 4) => port.read_next(AccessSize::Long)?,
            (_, 2) => u32::from(port.read_word(addr + (i * 4) as u32)?),
            _ => return Err(Error::AddressOutOfBounds.into()),
        };
        let bytes = value.to_be_bytes();
        chunk.copy_from_slice(&bytes[4 - chunk.len()..]);
    }
    Ok(())
}

fn send_blocks<P, R, W>(
    port: &mut P,
    rx: &mut R,
    writer: &PacketWriter<W>,
    session: &mut TransferSession,
) -> Result<()>
where
    P: BdmPort + ?Sized,
    R: Read + ReadReady + ?Sized,
    W: Write,
{
    while !session.is_done() {
        check_abort(rx)?;

        let len = session.next_len(BLOCK_LEN);
        read_block(port, session.current, &mut session.block[..len])?;
        let block = Packet::with_payload(CMD_BDM_READ_FLASH, &session.block[..len])?;
        writer.send_block(&block)?;
        session.advance(len as u32);
    }
    Ok(())
}

/// Stream `cmd.start..cmd.end` to the host
///
/// Each block goes out as a `read_flash` packet of up to [`BLOCK_LEN`]
/// bytes. The chip is reset on the way out, also after an abort.
pub fn read_flash<P, C, R, W>(
    port: &mut P,
    clock: &C,
    rx: &mut R,
    writer: &PacketWriter<W>,
    cmd: &FlashCommand,
) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
    R: Read + ReadReady + ?Sized,
    W: Write,
{
    cmd.validate_range()?;
    let family = family_of(cmd)?;
    family.reset(port)?;

    let mut session = TransferSession::new(clock, cmd.start, cmd.end)?;
    log::info!(
        "stream: reading 0x{:06X}..0x{:06X} ({})",
        cmd.start,
        cmd.end,
        family
    );

    let result = send_blocks(port, rx, writer, &mut session);
    let reset = family.reset(port);
    if let Err(e) = &result {
        log::warn!("stream: read stopped at 0x{:06X}: {}", session.current, e);
    }
    result?;
    reset?;

    log::info!(
        "stream: read 0x{:X} bytes in {} ms",
        cmd.end - cmd.start,
        session.elapsed_ms(clock)
    );
    Ok(())
}

/// Erase the flash named by `cmd`
///
/// AM29 chips are erased whole; AM28 chips erase `cmd.start..cmd.end`.
pub fn erase_flash<P, C>(port: &mut P, clock: &C, cmd: &FlashCommand) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
{
    let family = family_of(cmd)?;
    log::info!("stream: erasing {}", family);
    match family {
        FlashFamily::Am29 => family.erase(port, clock, 0, 0)?,
        FlashFamily::Am28 => {
            cmd.validate_range()?;
            family.erase(port, clock, cmd.start, cmd.end)?;
        }
    }
    Ok(())
}

fn wait_block<R, C>(rx: &mut R, clock: &C) -> Result<Packet>
where
    R: Read + ReadReady + ?Sized,
    C: Clock + ?Sized,
{
    let deadline = Deadline::after_ms(clock, BLOCK_WAIT_MS);
    loop {
        match packet::receive(rx) {
            Ok(Some(p)) => return Ok(p),
            Ok(None) if deadline.expired(clock) => return Err(Error::Timeout.into()),
            Ok(None) => clock.delay_us(100),
            Err(Error::Nack) => return Err(Error::Aborted.into()),
            Err(e) => return Err(e.into()),
        }
    }
}

fn program_blocks<P, C, R, W>(
    port: &mut P,
    clock: &C,
    rx: &mut R,
    writer: &PacketWriter<W>,
    family: FlashFamily,
    session: &mut TransferSession,
) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
    R: Read + ReadReady + ?Sized,
    W: Write,
{
    while !session.is_done() {
        let block = wait_block(rx, clock)?;
        if block.command != CMD_BDM_WRITE_FLASH {
            log::warn!("stream: expected a data block, got 0x{:02X}", block.command);
            return Err(Error::InvalidPayload.into());
        }
        let data = &block.payload;
        if data.is_empty() || data.len() % 2 != 0 {
            return Err(Error::InvalidPayload.into());
        }
        if data.len() as u32 > session.remaining() {
            return Err(Error::AddressOutOfBounds.into());
        }

        for (i, pair) in data.chunks_exact(2).enumerate() {
            let value = u16::from_be_bytes([pair[0], pair[1]]);
            if value != 0xFFFF {
                family.program(port, clock, session.current + (i * 2) as u32, value)?;
            }
        }
        session.advance(data.len() as u32);
        writer.send_reply(&block, &[], TERM_ACK)?;
    }
    Ok(())
}

/// Receive an image from the host and program it
///
/// After the "ready" ACK the host sends `write_flash` blocks of big-endian
/// words; each block is programmed and acknowledged. The chip is reset on
/// the way out, also after a failure.
pub fn write_flash<P, C, R, W>(
    port: &mut P,
    clock: &C,
    rx: &mut R,
    writer: &PacketWriter<W>,
    request: &Packet,
    cmd: &FlashCommand,
) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
    R: Read + ReadReady + ?Sized,
    W: Write,
{
    cmd.validate_range()?;
    let family = family_of(cmd)?;
    // Host tools send the file offset for this tag, not the chip address
    let start = if &cmd.tag == b"29f010" { 0 } else { cmd.start };
    let mut session = TransferSession::new(clock, start, cmd.end)?;

    family.reset(port)?;
    writer.send_reply(request, &[], TERM_ACK)?;
    log::info!(
        "stream: writing 0x{:06X}..0x{:06X} ({})",
        session.current,
        session.end,
        family
    );

    let result = program_blocks(port, clock, rx, writer, family, &mut session);
    let reset = family.reset(port);
    if let Err(e) = &result {
        log::warn!("stream: write stopped at 0x{:06X}: {}", session.current, e);
    }
    result?;
    reset?;

    log::info!(
        "stream: wrote 0x{:X} bytes in {} ms",
        session.end - start,
        session.elapsed_ms(clock)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use combiflash_core::chip::AMD28F010;
    use combiflash_core::packet::TERM_NACK;
    use crate::testutil::{decode_all, Script};
    use combiflash_dummy::{DummyConfig, DummyTarget, FlashTiming, ManualClock};

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 13 + 5) as u8).collect()
    }

    #[test]
    fn test_read_stream_blocks() {
        let data = image(0x4_0000);
        let mut target = DummyTarget::with_image(DummyConfig::default(), &data);
        let clock = ManualClock::new();
        let writer = PacketWriter::new(Vec::new());
        let mut script = Script::default();

        let cmd = FlashCommand::new(FlashFamily::Am29, 0x100, 0x306);
        read_flash(&mut target, &clock, &mut script, &writer, &cmd).unwrap();

        let packets = decode_all(&writer.lock());
        let lens: Vec<_> = packets.iter().map(|p| p.payload.len()).collect();
        assert_eq!(lens, [256, 256, 6]);
        let streamed: Vec<u8> = packets.iter().flat_map(|p| p.payload.clone()).collect();
        assert_eq!(streamed, &data[0x100..0x306]);
    }

    #[test]
    fn test_read_stream_abort() {
        let mut target = DummyTarget::new(DummyConfig::default());
        let clock = ManualClock::new();
        let writer = PacketWriter::new(Vec::new());
        let mut script = Script::default();
        script.push(&Packet::nack(CMD_BDM_READ_FLASH));

        let cmd = FlashCommand::new(FlashFamily::Am29, 0, 0x1000);
        let err = read_flash(&mut target, &clock, &mut script, &writer, &cmd).unwrap_err();
        assert!(matches!(err, crate::AdapterError::Core(Error::Aborted)));
        assert!(writer.lock().is_empty());
        // Three-cycle AM29 reset on entry and again on the way out
        assert_eq!(target.stats().writes, 6);
    }

    /// Link that counts how often it is checked for incoming data
    #[derive(Default)]
    struct PolledLink {
        script: Script,
        polls: usize,
    }

    impl embedded_io::ErrorType for PolledLink {
        type Error = core::convert::Infallible;
    }

    impl Read for PolledLink {
        fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
            self.script.read(buf)
        }
    }

    impl ReadReady for PolledLink {
        fn read_ready(&mut self) -> core::result::Result<bool, Self::Error> {
            self.polls += 1;
            self.script.read_ready()
        }
    }

    #[test]
    fn test_read_stream_whole_blocks() {
        const LEN: u32 = 0x1000;
        let data = image(0x4_0000);
        let mut target = DummyTarget::with_image(DummyConfig::default(), &data);
        let clock = ManualClock::new();
        let writer = PacketWriter::new(Vec::new());
        let mut link = PolledLink::default();

        let mut session = TransferSession::new(&clock, 0, LEN).unwrap();
        send_blocks(&mut target, &mut link, &writer, &mut session).unwrap();

        let blocks = (LEN as usize) / BLOCK_LEN;
        let packets = decode_all(&writer.lock());
        assert_eq!(packets.len(), blocks);
        assert!(packets
            .iter()
            .all(|p| p.command == CMD_BDM_READ_FLASH && p.payload.len() == BLOCK_LEN));
        // One abort check ahead of every block
        assert_eq!(link.polls, blocks);
        assert_eq!(session.current, LEN);

        let streamed: Vec<u8> = packets.iter().flat_map(|p| p.payload.clone()).collect();
        assert_eq!(streamed, &data[..LEN as usize]);
    }

    #[test]
    fn test_read_rejects_unknown_tag() {
        let mut target = DummyTarget::new(DummyConfig::default());
        let clock = ManualClock::new();
        let writer = PacketWriter::new(Vec::new());
        let cmd = FlashCommand {
            tag: *b"39sf01",
            start: 0,
            end: 0x100,
        };
        let err = read_flash(&mut target, &clock, &mut Script::default(), &writer, &cmd);
        assert!(matches!(
            err,
            Err(crate::AdapterError::Core(Error::ChipNotSupported))
        ));
    }

    #[test]
    fn test_write_stream_programs_and_acks() {
        let mut target = DummyTarget::new(DummyConfig::for_chip(AMD28F010));
        target.flash_mut().fill(0xFF);
        let clock = ManualClock::new();
        let writer = PacketWriter::new(Vec::new());

        let data = image(0x300);
        let mut script = Script::default();
        for chunk in data.chunks(BLOCK_LEN) {
            script.push(&Packet::with_payload(CMD_BDM_WRITE_FLASH, chunk).unwrap());
        }

        let request = Packet::new(CMD_BDM_WRITE_FLASH);
        let cmd = FlashCommand::new(FlashFamily::Am28, 0x1000, 0x1300);
        write_flash(&mut target, &clock, &mut script, &writer, &request, &cmd).unwrap();

        assert_eq!(&target.flash()[0x1000..0x1300], &data[..]);
        // Ready plus one ACK per block
        let replies = decode_all(&writer.lock());
        assert_eq!(replies.len(), 4);
        assert!(replies
            .iter()
            .all(|p| p.command == CMD_BDM_WRITE_FLASH && p.is_ack()));
    }

    #[test]
    fn test_write_stream_29f010_starts_at_zero() {
        let mut target = DummyTarget::new(DummyConfig::default());
        target.flash_mut().fill(0xFF);
        let clock = ManualClock::new();
        let writer = PacketWriter::new(Vec::new());

        let mut script = Script::default();
        script.push(&Packet::with_payload(CMD_BDM_WRITE_FLASH, &[0x12, 0x34, 0x56, 0x78]).unwrap());
        assert_eq!(FlashFamily::Am29.tag(), b"29f010");

        let request = Packet::new(CMD_BDM_WRITE_FLASH);
        let cmd = FlashCommand::new(FlashFamily::Am29, 0x2, 0x4);
        write_flash(&mut target, &clock, &mut script, &writer, &request, &cmd).unwrap();
        assert_eq!(&target.flash()[0..4], &[0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_write_stream_abort_resets_chip() {
        let mut target = DummyTarget::new(DummyConfig::default());
        target.flash_mut().fill(0xFF);
        let clock = ManualClock::new();
        let writer = PacketWriter::new(Vec::new());

        let mut script = Script::default();
        script.push(&Packet::with_payload(CMD_BDM_WRITE_FLASH, &[0xAB, 0xCD]).unwrap());
        let mut abort = Packet::new(CMD_BDM_WRITE_FLASH);
        abort.terminator = TERM_NACK;
        script.push(&abort);

        let request = Packet::new(CMD_BDM_WRITE_FLASH);
        let cmd = FlashCommand::new(FlashFamily::Am29, 0, 0x100);
        let err = write_flash(&mut target, &clock, &mut script, &writer, &request, &cmd).unwrap_err();
        assert!(matches!(err, crate::AdapterError::Core(Error::Aborted)));
        assert_eq!(&target.flash()[0..2], &[0xAB, 0xCD]);
        // Chip is back in read-array mode
        assert_eq!(target.read_word(2).unwrap(), 0xFFFF);
    }

    #[test]
    fn test_write_stream_rejects_odd_block() {
        let mut target = DummyTarget::new(DummyConfig::default());
        let clock = ManualClock::new();
        let writer = PacketWriter::new(Vec::new());
        let mut script = Script::default();
        script.push(&Packet::with_payload(CMD_BDM_WRITE_FLASH, &[1, 2, 3]).unwrap());

        let request = Packet::new(CMD_BDM_WRITE_FLASH);
        let cmd = FlashCommand::new(FlashFamily::Am29, 0, 0x100);
        let err = write_flash(&mut target, &clock, &mut script, &writer, &request, &cmd);
        assert!(matches!(
            err,
            Err(crate::AdapterError::Core(Error::InvalidPayload))
        ));
    }

    #[test]
    fn test_erase_am28_range() {
        let mut target = DummyTarget::new(DummyConfig::for_chip(AMD28F010));
        target.flash_mut().fill(0x00);
        let clock = ManualClock::new();

        let cmd = FlashCommand::new(FlashFamily::Am28, 0, 0x4_0000);
        erase_flash(&mut target, &clock, &cmd).unwrap();
        assert!(target.flash().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_erase_am28_slow_chip() {
        let mut config = DummyConfig::for_chip(AMD28F010);
        config.timing = FlashTiming {
            erase_pulses: 3,
            ..FlashTiming::default()
        };
        let mut target = DummyTarget::new(config);
        target.flash_mut().fill(0x3C);
        let clock = ManualClock::new();

        let cmd = FlashCommand::new(FlashFamily::Am28, 0, 0x2000);
        erase_flash(&mut target, &clock, &cmd).unwrap();
        assert!(target.flash()[..0x2000].iter().all(|&b| b == 0xFF));
        // Three pulses on each of the two chips
        let pulses = target.stats().flash.erase_pulses;
        assert_eq!(pulses, 6);
        assert!(pulses < 1000);
    }

    #[test]
    fn test_erase_am29_chip() {
        let mut target = DummyTarget::new(DummyConfig::default());
        target.flash_mut().fill(0x5A);
        let clock = ManualClock::new();

        let cmd = FlashCommand::new(FlashFamily::Am29, 0, 0);
        erase_flash(&mut target, &clock, &cmd).unwrap();
        assert!(target.flash().iter().all(|&b| b == 0xFF));
    }
}
