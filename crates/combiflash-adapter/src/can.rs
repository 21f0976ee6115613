//! CAN bus access and the receive relay
//!
//! While the CAN interface is open, every frame received on the bus is
//! forwarded to the host as an unsolicited `can_frame` packet. A reader
//! thread polls the bus and hands frames over a channel to a sender thread
//! that writes them through the shared [`PacketWriter`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use combiflash_core::packet::{CanFrame, Packet, CMD_CAN_FRAME};
use embedded_io::Write;
use zerocopy::IntoBytes;

use crate::error::{AdapterError, Result};
use crate::writer::PacketWriter;

/// Timeout for transmitting a frame requested by the host
pub const TX_TIMEOUT_MS: u32 = 500;

/// Pause between bus polls when nothing was received
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// CAN controller
pub trait CanBus: Send {
    /// Enable the controller
    fn open(&mut self) -> Result<()>;

    /// Disable the controller
    fn close(&mut self) -> Result<()>;

    /// Set the bus bitrate in bit/s
    fn set_bitrate(&mut self, bitrate: u32) -> Result<()>;

    /// Transmit a frame, waiting up to `timeout_ms` for a free mailbox
    fn send(&mut self, frame: &CanFrame, timeout_ms: u32) -> Result<()>;

    /// Take one received frame, if any
    fn receive(&mut self) -> Result<Option<CanFrame>>;
}

/// Bus in loopback mode: every transmitted frame is received back
#[derive(Debug, Default)]
pub struct LoopbackBus {
    open: bool,
    bitrate: u32,
    rx: VecDeque<CanFrame>,
}

impl LoopbackBus {
    /// Create a closed bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Current bitrate
    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    /// Whether the controller is enabled
    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl CanBus for LoopbackBus {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        self.rx.clear();
        Ok(())
    }

    fn set_bitrate(&mut self, bitrate: u32) -> Result<()> {
        if bitrate == 0 {
            return Err(AdapterError::InvalidParameter("bitrate 0".into()));
        }
        self.bitrate = bitrate;
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame, _timeout_ms: u32) -> Result<()> {
        if !self.open {
            return Err(AdapterError::InvalidParameter("CAN bus is closed".into()));
        }
        self.rx.push_back(*frame);
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<CanFrame>> {
        if !self.open {
            return Ok(None);
        }
        Ok(self.rx.pop_front())
    }
}

/// CAN interface with its relay threads
pub struct CanRelay<B> {
    bus: Arc<Mutex<B>>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl<B: CanBus + 'static> CanRelay<B> {
    /// Wrap a bus; the relay is not running
    pub fn new(bus: B) -> Self {
        Self {
            bus: Arc::new(Mutex::new(bus)),
            stop: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        }
    }

    /// Lock the bus
    pub fn bus(&self) -> MutexGuard<'_, B> {
        self.bus.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the relay threads are running
    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    /// Open the bus and start forwarding received frames to `writer`
    pub fn start<W>(&mut self, writer: PacketWriter<W>) -> Result<()>
    where
        W: Write + Send + 'static,
    {
        if self.is_running() {
            log::debug!("can: relay already running");
            return Ok(());
        }
        self.bus().open()?;
        self.stop.store(false, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel::<CanFrame>();

        let bus = Arc::clone(&self.bus);
        let stop = Arc::clone(&self.stop);
        let reader = thread::Builder::new()
            .name("can-rx".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let received = bus.lock().unwrap_or_else(|e| e.into_inner()).receive();
                    match received {
                        Ok(Some(frame)) => {
                            if tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Ok(None) => thread::sleep(POLL_INTERVAL),
                        Err(e) => {
                            log::warn!("can: receive failed: {}", e);
                            thread::sleep(POLL_INTERVAL);
                        }
                    }
                }
                log::debug!("can: reader stopped");
            })?;

        let sender = thread::Builder::new()
            .name("can-tx".into())
            .spawn(move || {
                // Ends when the reader drops its end of the channel
                for frame in rx {
                    let packet = match Packet::with_payload(CMD_CAN_FRAME, frame.as_bytes()) {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    if let Err(e) = writer.send_block(&packet) {
                        log::warn!("can: forwarding frame 0x{:X} failed: {}", frame.id(), e);
                        break;
                    }
                }
                log::debug!("can: sender stopped");
            })?;

        self.threads.push(reader);
        self.threads.push(sender);
        log::info!("can: relay started");
        Ok(())
    }

    /// Stop the relay threads and close the bus
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return self.bus().close();
        }
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::warn!("can: relay thread panicked");
            }
        }
        log::info!("can: relay stopped");
        self.bus().close()
    }

    /// Set the bus bitrate
    pub fn set_bitrate(&self, bitrate: u32) -> Result<()> {
        log::debug!("can: bitrate {}", bitrate);
        self.bus().set_bitrate(bitrate)
    }

    /// Transmit a frame
    pub fn send(&self, frame: &CanFrame) -> Result<()> {
        self.bus().send(frame, TX_TIMEOUT_MS)
    }
}

impl<B> Drop for CanRelay<B> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
