//! Command dispatcher
//!
//! Receives packets from the host, routes them by command group to the
//! board, BDM and CAN handlers, and answers each one. A handler that fails
//! for any reason is answered with an empty NACK carrying the same command
//! code; the loop then carries on with the next packet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use combiflash_core::bdm::{AccessSize, BdmPort};
use combiflash_core::clock::Clock;
use combiflash_core::packet::{self, *};
use combiflash_core::Error;
use embedded_io::{Read, ReadReady, Write};

use crate::can::{CanBus, CanRelay};
use crate::error::Result;
use crate::stream;
use crate::writer::PacketWriter;

/// Thermocouple reading reported when no sensor is fitted
pub const EGT_INVALID: f32 = -99.0;

/// Board sensors answered by the board commands
pub trait Sensors: Send {
    /// Exhaust gas temperature in degrees Celsius
    fn egt(&mut self) -> Option<f32>;

    /// Voltage on an ADC channel
    fn adc(&mut self, channel: u8) -> Option<f32>;
}

/// Sensors with preset readings
#[derive(Debug, Clone, Default)]
pub struct FixedSensors {
    /// Thermocouple reading
    pub egt: Option<f32>,
    /// ADC readings by channel
    pub adc: Vec<f32>,
}

impl Sensors for FixedSensors {
    fn egt(&mut self) -> Option<f32> {
        self.egt
    }

    fn adc(&mut self, channel: u8) -> Option<f32> {
        self.adc.get(usize::from(channel)).copied()
    }
}

/// What a successful handler sends back
enum Reply {
    /// Empty ACK
    Ack,
    /// ACK with constant information
    Info(&'static [u8]),
    /// ACK with a value that must reach the host intact
    Data(Vec<u8>),
}

/// The adapter: a target behind a BDM port, a CAN bus and a host link
pub struct Dispatcher<P, C, B, W> {
    port: P,
    clock: C,
    can: CanRelay<B>,
    sensors: Box<dyn Sensors>,
    writer: PacketWriter<W>,
    shutdown: Arc<AtomicBool>,
}

impl<P, C, B, W> Dispatcher<P, C, B, W>
where
    P: BdmPort,
    C: Clock,
    B: CanBus + 'static,
    W: Write + Send + 'static,
{
    /// Create a dispatcher answering through `writer`
    pub fn new(port: P, clock: C, bus: B, writer: PacketWriter<W>) -> Self {
        Self {
            port,
            clock,
            can: CanRelay::new(bus),
            sensors: Box::new(FixedSensors::default()),
            writer,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use `sensors` for the board commands
    pub fn with_sensors(mut self, sensors: impl Sensors + 'static) -> Self {
        self.sensors = Box::new(sensors);
        self
    }

    /// Get the target port
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get the target port mutably
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Give back the target port
    pub fn into_port(self) -> P {
        self.port
    }

    /// Get the CAN interface
    pub fn can(&self) -> &CanRelay<B> {
        &self.can
    }

    /// Flag that makes [`serve`](Self::serve) return
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Answer packets from `rx` until the link closes or shutdown is
    /// requested
    ///
    /// A malformed packet is answered with NACK once its command is known.
    /// The CAN relay is stopped on return.
    pub fn serve<R: Read + ReadReady + ?Sized>(&mut self, rx: &mut R) -> Result<()> {
        log::info!("combi: adapter ready (firmware {}.{})", FW_VERSION[0], FW_VERSION[1]);
        let result = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break Ok(());
            }
            match packet::receive_frame(rx) {
                Ok(Some(p)) => {
                    if let Err(e) = self.handle(rx, &p) {
                        break Err(e);
                    }
                }
                Ok(None) => {}
                Err(FrameError {
                    error: Error::TransportError,
                    ..
                }) => {
                    log::info!("combi: host link closed");
                    break Ok(());
                }
                Err(e) => {
                    if let Err(e) = self.reject(e) {
                        break Err(e);
                    }
                }
            }
        };
        if let Err(e) = self.can.stop() {
            log::warn!("combi: closing CAN failed: {}", e);
        }
        result
    }

    /// Answer a packet that could not be received
    ///
    /// A NACK-terminated packet outside a transfer is a late abort and is
    /// dropped silently, as is a packet whose header was lost.
    fn reject(&mut self, e: FrameError) -> Result<()> {
        match e {
            FrameError {
                error: Error::Nack, ..
            } => {
                log::debug!("combi: abort outside a transfer ignored");
            }
            FrameError {
                command: Some(command),
                error,
            } => {
                log::warn!("combi: malformed {} packet: {}", command_name(command), error);
                self.writer.send_reply(&Packet::new(command), &[], TERM_NACK)?;
            }
            FrameError {
                command: None,
                error,
            } => log::warn!("combi: dropped packet: {}", error),
        }
        Ok(())
    }

    /// Execute one command and send its reply
    ///
    /// Only a failure to send the reply is returned; handler failures are
    /// answered with NACK.
    pub fn handle<R: Read + ReadReady + ?Sized>(&mut self, rx: &mut R, packet: &Packet) -> Result<()> {
        log::debug!(
            "combi: {} (0x{:02X}) len {}",
            command_name(packet.command),
            packet.command,
            packet.payload.len()
        );

        let result = match CommandGroup::of(packet.command) {
            Some(CommandGroup::Board) => self.exec_board(packet),
            Some(CommandGroup::Bdm) => self.exec_bdm(rx, packet),
            Some(CommandGroup::Can) => self.exec_can(packet),
            None => Err(Error::UnknownCommand(packet.command).into()),
        };

        match result {
            Ok(Reply::Ack) => {
                self.writer.send_reply(packet, &[], TERM_ACK)?;
            }
            Ok(Reply::Info(data)) => {
                self.writer.send_reply(packet, data, TERM_ACK)?;
            }
            Ok(Reply::Data(data)) => {
                self.writer.reply_data(packet, &data)?;
            }
            Err(e) => {
                log::debug!("combi: {} failed: {}", command_name(packet.command), e);
                self.writer.send_reply(packet, &[], TERM_NACK)?;
            }
        }
        Ok(())
    }

    fn exec_board(&mut self, packet: &Packet) -> Result<Reply> {
        match packet.command {
            CMD_BRD_FWVERSION => Ok(Reply::Info(&FW_VERSION)),
            CMD_BRD_ADCFILTER => Ok(Reply::Ack),
            CMD_BRD_ADC => {
                let channel = packet.payload.first().copied().unwrap_or(0);
                Ok(match self.sensors.adc(channel) {
                    Some(volts) => Reply::Data(volts.to_le_bytes().to_vec()),
                    None => Reply::Ack,
                })
            }
            CMD_BRD_EGT => {
                let (valid, temp) = match self.sensors.egt() {
                    Some(t) => (1u8, t),
                    None => (0u8, EGT_INVALID),
                };
                let mut data = vec![valid];
                data.extend_from_slice(&temp.to_le_bytes());
                Ok(Reply::Data(data))
            }
            other => Err(Error::UnknownCommand(other).into()),
        }
    }

    fn exec_bdm<R: Read + ReadReady + ?Sized>(
        &mut self,
        rx: &mut R,
        packet: &Packet,
    ) -> Result<Reply> {
        let data = &packet.payload[..];
        match packet.command {
            CMD_BDM_STOP_CHIP => self.port.stop()?,
            CMD_BDM_RESET_CHIP => self.port.reset()?,
            CMD_BDM_RUN_CHIP => {
                let addr = parse_be_u32(data)?;
                self.port.run(Some(addr))?;
            }
            CMD_BDM_STEP_CHIP => self.port.step()?,
            CMD_BDM_RESTART_CHIP => self.port.restart()?,
            CMD_BDM_MEM_READ => {
                let req = MemReadRequest::parse(data)?;
                let value = match req.addr {
                    Some(addr) => self.port.read(req.size, addr)?,
                    None => self.port.read_next(req.size)?,
                };
                return Ok(Reply::Data(be_value(value, req.size)));
            }
            CMD_BDM_MEM_WRITE => {
                let req = MemWriteRequest::parse(data)?;
                self.port.write(req.size, req.addr, req.value)?;
            }
            CMD_BDM_SYSREG_READ => {
                let value = self.port.read_sysreg(register_index(data)?)?;
                return Ok(Reply::Data(value.to_be_bytes().to_vec()));
            }
            CMD_BDM_SYSREG_WRITE => {
                let req = RegisterWrite::parse(data)?;
                self.port.write_sysreg(req.reg, req.value)?;
            }
            CMD_BDM_ADREG_READ => {
                let value = self.port.read_adreg(register_index(data)?)?;
                return Ok(Reply::Data(value.to_be_bytes().to_vec()));
            }
            CMD_BDM_ADREG_WRITE => {
                let req = RegisterWrite::parse(data)?;
                self.port.write_adreg(req.reg, req.value)?;
            }
            CMD_BDM_READ_FLASH => {
                let cmd = FlashCommand::parse(data)?;
                stream::read_flash(&mut self.port, &self.clock, rx, &self.writer, &cmd)?;
            }
            CMD_BDM_ERASE_FLASH => {
                let cmd = FlashCommand::parse(data)?;
                stream::erase_flash(&mut self.port, &self.clock, &cmd)?;
            }
            CMD_BDM_WRITE_FLASH => {
                let cmd = FlashCommand::parse(data)?;
                stream::write_flash(&mut self.port, &self.clock, rx, &self.writer, packet, &cmd)?;
            }
            CMD_BDM_PINSTATE => {
                let status = self.port.status()?;
                return Ok(Reply::Data(vec![status.bits()]));
            }
            other => return Err(Error::UnknownCommand(other).into()),
        }
        Ok(Reply::Ack)
    }

    fn exec_can(&mut self, packet: &Packet) -> Result<Reply> {
        let data = &packet.payload[..];
        match packet.command {
            CMD_CAN_OPEN => match data {
                [1] => self.can.start(self.writer.clone())?,
                [_] => self.can.stop()?,
                _ => return Err(Error::InvalidPayload.into()),
            },
            CMD_CAN_BITRATE => self.can.set_bitrate(parse_be_u32(data)?)?,
            CMD_CAN_TXFRAME => {
                let frame = CanFrame::parse(data)?;
                self.can.send(&frame)?;
            }
            CMD_CAN_ECUCONNECT | CMD_CAN_READFLASH | CMD_CAN_WRITEFLASH => {
                log::debug!("combi: GMLAN reflashing is not available");
                return Err(Error::UnknownCommand(packet.command).into());
            }
            other => return Err(Error::UnknownCommand(other).into()),
        }
        Ok(Reply::Ack)
    }
}

fn register_index(data: &[u8]) -> Result<u8> {
    match data {
        [reg] => Ok(*reg),
        _ => Err(Error::InvalidPayload.into()),
    }
}

/// `value` as `size.width()` big-endian bytes
fn be_value(value: u32, size: AccessSize) -> Vec<u8> {
    value.to_be_bytes()[4 - size.width()..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::LoopbackBus;
    use crate::testutil::{decode_all, Script};
    use combiflash_core::bdm::TargetStatus;
    use combiflash_dummy::{DummyConfig, DummyTarget, ManualClock, RAM_BASE};
    use std::time::{Duration, Instant};

    type TestDispatcher = Dispatcher<DummyTarget, ManualClock, LoopbackBus, Vec<u8>>;

    fn dispatcher() -> (TestDispatcher, PacketWriter<Vec<u8>>) {
        let writer = PacketWriter::new(Vec::new());
        let target = DummyTarget::new(DummyConfig::default());
        let d = Dispatcher::new(target, ManualClock::new(), LoopbackBus::new(), writer.clone());
        (d, writer)
    }

    fn exchange(d: &mut TestDispatcher, writer: &PacketWriter<Vec<u8>>, p: Packet) -> Vec<Packet> {
        writer.lock().clear();
        d.handle(&mut Script::default(), &p).unwrap();
        decode_all(&writer.lock())
    }

    fn request(command: u8, data: &[u8]) -> Packet {
        Packet::with_payload(command, data).unwrap()
    }

    #[test]
    fn test_fwversion() {
        let (mut d, writer) = dispatcher();
        d.handle(&mut Script::default(), &Packet::new(CMD_BRD_FWVERSION))
            .unwrap();
        assert_eq!(*writer.lock(), [0x20, 0x00, 0x02, 0x03, 0x01, TERM_ACK]);
    }

    #[test]
    fn test_unknown_group_is_nacked() {
        let (mut d, writer) = dispatcher();
        for cmd in [0x00, 0x60, 0xC0, 0x4F, 0x24] {
            let replies = exchange(&mut d, &writer, Packet::new(cmd));
            assert_eq!(replies.len(), 1);
            assert_eq!(replies[0].command, cmd);
            assert_eq!(replies[0].terminator, TERM_NACK);
            assert!(replies[0].payload.is_empty());
        }
    }

    #[test]
    fn test_memory_write_then_read() {
        let (mut d, writer) = dispatcher();
        let mut write = vec![4];
        write.extend_from_slice(&RAM_BASE.to_be_bytes());
        write.extend_from_slice(&[0x00, 0x11, 0x22, 0x33]);
        let replies = exchange(&mut d, &writer, request(CMD_BDM_MEM_WRITE, &write));
        assert!(replies[0].is_ack());

        let mut read = vec![2, 1];
        read.extend_from_slice(&RAM_BASE.to_be_bytes());
        let replies = exchange(&mut d, &writer, request(CMD_BDM_MEM_READ, &read));
        assert_eq!(&replies[0].payload[..], &[0x00, 0x11]);

        // Continue read after the word
        let replies = exchange(&mut d, &writer, request(CMD_BDM_MEM_READ, &[2, 0]));
        assert_eq!(&replies[0].payload[..], &[0x22, 0x33]);
    }

    #[test]
    fn test_failing_handler_is_nacked() {
        let (mut d, writer) = dispatcher();
        let replies = exchange(&mut d, &writer, Packet::new(CMD_BDM_RESET_CHIP));
        assert!(replies[0].is_ack());

        // Memory access needs a halted CPU
        let mut read = vec![4, 1];
        read.extend_from_slice(&RAM_BASE.to_be_bytes());
        let replies = exchange(&mut d, &writer, request(CMD_BDM_MEM_READ, &read));
        assert_eq!(replies[0].terminator, TERM_NACK);

        let replies = exchange(&mut d, &writer, Packet::new(CMD_BDM_STOP_CHIP));
        assert!(replies[0].is_ack());
        let replies = exchange(&mut d, &writer, request(CMD_BDM_MEM_READ, &read));
        assert!(replies[0].is_ack());
    }

    #[test]
    fn test_bad_payloads_are_nacked() {
        let (mut d, writer) = dispatcher();
        let cases = [
            request(CMD_BDM_RUN_CHIP, &[0x10, 0x00]),
            request(CMD_BDM_MEM_READ, &[3, 0]),
            request(CMD_BDM_SYSREG_READ, &[]),
            request(CMD_BDM_READ_FLASH, &[0; 13]),
            request(CMD_CAN_OPEN, &[]),
            request(CMD_CAN_TXFRAME, &[0; 14]),
        ];
        for p in cases {
            let replies = exchange(&mut d, &writer, p.clone());
            assert_eq!(replies[0].terminator, TERM_NACK, "command 0x{:02X}", p.command);
        }
    }

    #[test]
    fn test_registers() {
        let (mut d, writer) = dispatcher();
        let replies = exchange(
            &mut d,
            &writer,
            request(CMD_BDM_ADREG_WRITE, &[0x00, 0x00, 0x00, 0x00, 0x2A]),
        );
        assert!(replies[0].is_ack());
        let replies = exchange(&mut d, &writer, request(CMD_BDM_ADREG_READ, &[0x00]));
        assert_eq!(&replies[0].payload[..], &[0x00, 0x00, 0x00, 0x2A]);
    }

    #[test]
    fn test_pinstate() {
        let (mut d, writer) = dispatcher();
        let replies = exchange(&mut d, &writer, Packet::new(CMD_BDM_PINSTATE));
        let status = TargetStatus::from_bits_truncate(replies[0].payload[0]);
        assert!(status.contains(TargetStatus::FROZEN));
    }

    #[test]
    fn test_egt_reply() {
        let (d, writer) = dispatcher();
        let mut d = d.with_sensors(FixedSensors {
            egt: Some(412.5),
            adc: vec![1.25],
        });
        let replies = exchange(&mut d, &writer, Packet::new(CMD_BRD_EGT));
        let payload = &replies[0].payload;
        assert_eq!(payload[0], 1);
        assert_eq!(f32::from_le_bytes(payload[1..5].try_into().unwrap()), 412.5);

        let replies = exchange(&mut d, &writer, request(CMD_BRD_ADC, &[0]));
        assert_eq!(&replies[0].payload[..], &1.25f32.to_le_bytes());
    }

    #[test]
    fn test_egt_without_sensor() {
        let (mut d, writer) = dispatcher();
        let replies = exchange(&mut d, &writer, Packet::new(CMD_BRD_EGT));
        let payload = &replies[0].payload;
        assert_eq!(payload.len(), 5);
        assert_eq!(payload[0], 0);
        assert_eq!(f32::from_le_bytes(payload[1..5].try_into().unwrap()), EGT_INVALID);
    }

    #[test]
    fn test_gmlan_is_nacked() {
        let (mut d, writer) = dispatcher();
        for cmd in [CMD_CAN_ECUCONNECT, CMD_CAN_READFLASH, CMD_CAN_WRITEFLASH] {
            let replies = exchange(&mut d, &writer, Packet::new(cmd));
            assert_eq!(replies[0].terminator, TERM_NACK);
        }
    }

    #[test]
    fn test_can_frames_are_relayed() {
        let (mut d, writer) = dispatcher();
        let replies = exchange(&mut d, &writer, request(CMD_CAN_BITRATE, &500_000u32.to_be_bytes()));
        assert!(replies[0].is_ack());
        let replies = exchange(&mut d, &writer, request(CMD_CAN_OPEN, &[1]));
        assert!(replies[0].is_ack());
        assert!(d.can().is_running());
        assert_eq!(d.can().bus().bitrate(), 500_000);

        writer.lock().clear();
        let frame = CanFrame::new(0x7E8, &[0x02, 0x50, 0x01], false).unwrap();
        let mut script = Script::default();
        d.handle(&mut script, &request(CMD_CAN_TXFRAME, zerocopy::IntoBytes::as_bytes(&frame)))
            .unwrap();

        let start = Instant::now();
        while writer.lock().len() < 4 + 19 && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let packets = decode_all(&writer.lock());
        let relayed = packets
            .iter()
            .find(|p| p.command == CMD_CAN_FRAME)
            .expect("no relayed frame");
        assert_eq!(CanFrame::parse(&relayed.payload).unwrap(), frame);

        let replies = exchange(&mut d, &writer, request(CMD_CAN_OPEN, &[0]));
        assert!(replies[0].is_ack());
        assert!(!d.can().is_running());
    }

    #[test]
    fn test_read_flash_stream_then_ack() {
        let (mut d, writer) = dispatcher();
        d.port_mut().flash_mut()[..8].copy_from_slice(&[0, 1, 2, 3, 4, 5, 6, 7]);

        let cmd = FlashCommand::new(combiflash_core::chip::FlashFamily::Am29, 0, 0x200);
        let replies = exchange(&mut d, &writer, request(CMD_BDM_READ_FLASH, &cmd.encode()));
        assert_eq!(replies.len(), 3);
        assert_eq!(&replies[0].payload[..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(replies[1].payload.len(), 256);
        // Completion
        assert!(replies[2].is_ack());
        assert!(replies[2].payload.is_empty());
    }

    /// Serve `script` until `replies` packets were sent
    fn serve_script(
        mut d: TestDispatcher,
        writer: PacketWriter<Vec<u8>>,
        script: &mut Script,
        replies: usize,
    ) -> Vec<Packet> {
        let shutdown = d.shutdown_handle();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            while decode_all(&writer.lock()).len() < replies
                && start.elapsed() < Duration::from_secs(5)
            {
                std::thread::sleep(Duration::from_millis(1));
            }
            shutdown.store(true, Ordering::Relaxed);
            writer
        });
        d.serve(script).unwrap();
        let writer = handle.join().unwrap();
        let packets = decode_all(&writer.lock());
        packets
    }

    #[test]
    fn test_malformed_packets_are_nacked() {
        let (d, writer) = dispatcher();
        let mut script = Script::default();
        // Bad terminator
        script.rx.extend([CMD_BDM_STOP_CHIP, 0x00, 0x00, 0x55]);
        // Oversized payload, skipped as a whole
        script.rx.extend([CMD_BDM_WRITE_FLASH, 0x01, 0x01]);
        script.rx.extend([0u8; 257 + 1]);
        // Stale abort, no reply
        script.push(&Packet::nack(CMD_BDM_READ_FLASH));
        script.push(&Packet::new(CMD_BRD_FWVERSION));

        let replies = serve_script(d, writer, &mut script, 3);
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].command, CMD_BDM_STOP_CHIP);
        assert_eq!(replies[0].terminator, TERM_NACK);
        assert_eq!(replies[1].command, CMD_BDM_WRITE_FLASH);
        assert_eq!(replies[1].terminator, TERM_NACK);
        assert_eq!(replies[2].command, CMD_BRD_FWVERSION);
        assert!(replies[2].is_ack());
    }

    #[test]
    fn test_serve_until_shutdown() {
        let (mut d, writer) = dispatcher();
        let mut script = Script::default();
        script.push(&Packet::new(CMD_BRD_FWVERSION));
        script.push(&Packet::new(CMD_BDM_STOP_CHIP));

        let shutdown = d.shutdown_handle();
        // Script never closes, so stop once both packets are answered
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            while writer.lock().len() < 10 && start.elapsed() < Duration::from_secs(5) {
                std::thread::sleep(Duration::from_millis(1));
            }
            shutdown.store(true, Ordering::Relaxed);
            writer
        });
        d.serve(&mut script).unwrap();
        let writer = handle.join().unwrap();
        let replies = decode_all(&writer.lock());
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[1].command, CMD_BDM_STOP_CHIP);
    }
}
