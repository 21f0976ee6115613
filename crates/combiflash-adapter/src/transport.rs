//! Transport layer abstraction for the host link
//!
//! This module provides a unified interface for serial, TCP and in-process
//! transports, and [`Channel`], which exposes any transport through the
//! `embedded_io` traits the packet codec is written against.

use crate::error::{AdapterError, Result};

/// Default link timeout
pub const DEFAULT_TIMEOUT_MS: u32 = 5000;

/// How long [`Channel`] waits when asked whether data is ready
pub const DEFAULT_POLL_MS: u32 = 1;

/// Transport trait for reading and writing bytes
pub trait Transport {
    /// Write all bytes to the transport
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read with timeout
    ///
    /// Reads up to `buf.len()` bytes, waiting up to `timeout_ms` milliseconds.
    /// Returns the number of bytes read, or 0 on timeout. A closed link is
    /// [`AdapterError::Disconnected`].
    fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize>;

    /// Flush any buffered data
    fn flush(&mut self) -> Result<()>;

    /// Open a second handle on the same link
    ///
    /// Used to give the receive loop and the packet writer their own
    /// handles.
    fn try_clone(&self) -> Result<Self>
    where
        Self: Sized;
}

#[cfg(feature = "serial")]
pub mod serial {
    //! Serial port transport implementation

    use super::*;
    use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};
    use std::time::Duration;

    /// Default baud rate of the adapter's CDC port
    pub const DEFAULT_BAUD: u32 = 115200;

    /// Serial port transport
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Open a serial port with the specified baud rate
        pub fn open(device: &str, baud: Option<u32>) -> Result<Self> {
            let baud_rate = baud.unwrap_or(DEFAULT_BAUD);

            let port = serialport::new(device, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS as u64))
                .open()?;

            log::info!("Opened serial port {} at {} baud", device, baud_rate);

            Ok(Self { port })
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            Ok(())
        }

        fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
            let old_timeout = self.port.timeout();
            self.port
                .set_timeout(Duration::from_millis(timeout_ms as u64))?;

            let result = match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(AdapterError::from(e)),
            };

            self.port.set_timeout(old_timeout)?;
            result
        }

        fn flush(&mut self) -> Result<()> {
            self.port.flush()?;
            Ok(())
        }

        fn try_clone(&self) -> Result<Self> {
            Ok(Self {
                port: self.port.try_clone()?,
            })
        }
    }
}

pub mod tcp {
    //! TCP socket transport implementation

    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    /// TCP socket transport
    pub struct TcpTransport {
        stream: TcpStream,
    }

    impl TcpTransport {
        /// Connect to an adapter at the specified host and port
        pub fn connect(host: &str, port: u16) -> Result<Self> {
            let addr = format!("{}:{}", host, port);
            log::info!("Connecting to adapter at {}", addr);

            let stream = TcpStream::connect(&addr)
                .map_err(|e| AdapterError::ConnectionFailed(e.to_string()))?;
            let transport = Self::from_stream(stream)?;

            log::info!("Connected to adapter at {}", addr);
            Ok(transport)
        }

        /// Wait for one host to connect to `listener`
        pub fn accept(listener: &TcpListener) -> Result<Self> {
            let (stream, peer) = listener.accept()?;
            log::info!("Host connected from {}", peer);
            Self::from_stream(stream)
        }

        fn from_stream(stream: TcpStream) -> Result<Self> {
            // Set TCP_NODELAY to reduce latency
            stream.set_nodelay(true).map_err(|e| {
                AdapterError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
            })?;
            stream
                .set_write_timeout(Some(Duration::from_millis(DEFAULT_TIMEOUT_MS as u64)))
                .map_err(|e| {
                    AdapterError::ConnectionFailed(format!("Failed to set write timeout: {}", e))
                })?;
            Ok(Self { stream })
        }
    }

    impl Transport for TcpTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.stream.write_all(data)?;
            Ok(())
        }

        fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
            // A zero duration is rejected by set_read_timeout
            let timeout = Duration::from_millis(timeout_ms.max(1) as u64);
            self.stream.set_read_timeout(Some(timeout))?;

            match self.stream.read(buf) {
                Ok(0) if !buf.is_empty() => Err(AdapterError::Disconnected),
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(AdapterError::from(e)),
            }
        }

        fn flush(&mut self) -> Result<()> {
            self.stream.flush()?;
            Ok(())
        }

        fn try_clone(&self) -> Result<Self> {
            Ok(Self {
                stream: self.stream.try_clone()?,
            })
        }
    }
}

pub mod pipe {
    //! In-process transport
    //!
    //! A connected pair of transports backed by channels. Used to run the
    //! adapter and a client in the same process.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct PipeRx {
        rx: Receiver<Vec<u8>>,
        pending: VecDeque<u8>,
    }

    /// One end of an in-process link
    pub struct PipeTransport {
        tx: Sender<Vec<u8>>,
        rx: Arc<Mutex<PipeRx>>,
    }

    /// Create two connected ends
    pub fn pair() -> (PipeTransport, PipeTransport) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (PipeTransport::new(a_tx, a_rx), PipeTransport::new(b_tx, b_rx))
    }

    impl PipeTransport {
        fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
            Self {
                tx,
                rx: Arc::new(Mutex::new(PipeRx {
                    rx,
                    pending: VecDeque::new(),
                })),
            }
        }
    }

    impl Transport for PipeTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.tx
                .send(data.to_vec())
                .map_err(|_| AdapterError::Disconnected)
        }

        fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
            let mut rx = self.rx.lock().map_err(|_| AdapterError::Disconnected)?;
            if rx.pending.is_empty() {
                match rx.rx.recv_timeout(Duration::from_millis(timeout_ms as u64)) {
                    Ok(chunk) => rx.pending.extend(chunk),
                    Err(RecvTimeoutError::Timeout) => return Ok(0),
                    Err(RecvTimeoutError::Disconnected) => return Err(AdapterError::Disconnected),
                }
            }
            let n = buf.len().min(rx.pending.len());
            for (dst, src) in buf.iter_mut().zip(rx.pending.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn try_clone(&self) -> Result<Self> {
            Ok(Self {
                tx: self.tx.clone(),
                rx: Arc::clone(&self.rx),
            })
        }
    }
}

/// A [`Transport`] seen through the `embedded_io` traits
///
/// Readiness is checked by reading one byte ahead with a short timeout.
/// Reads block for at most the link timeout.
pub struct Channel<T> {
    transport: T,
    peeked: Option<u8>,
    poll_ms: u32,
    timeout_ms: u32,
}

impl<T: Transport> Channel<T> {
    /// Wrap a transport with the default timeouts
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            peeked: None,
            poll_ms: DEFAULT_POLL_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Set the link timeout
    pub fn set_timeout_ms(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    /// Set how long a readiness check waits
    pub fn set_poll_ms(&mut self, poll_ms: u32) {
        self.poll_ms = poll_ms;
    }

    /// Link timeout
    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    /// Open a second channel on the same link
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            transport: self.transport.try_clone()?,
            peeked: None,
            poll_ms: self.poll_ms,
            timeout_ms: self.timeout_ms,
        })
    }
}

impl<T> embedded_io::ErrorType for Channel<T> {
    type Error = AdapterError;
}

impl<T: Transport> embedded_io::Read for Channel<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(b) = self.peeked.take() {
            buf[0] = b;
            return Ok(1);
        }
        match self.transport.read_nonblock(buf, self.timeout_ms)? {
            0 => Err(AdapterError::Timeout),
            n => Ok(n),
        }
    }
}

impl<T: Transport> embedded_io::ReadReady for Channel<T> {
    fn read_ready(&mut self) -> Result<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        let mut b = [0u8; 1];
        if self.transport.read_nonblock(&mut b, self.poll_ms)? == 1 {
            self.peeked = Some(b[0]);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl<T: Transport> embedded_io::Write for Channel<T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.transport.write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        self.transport.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::pipe::pair;
    use super::*;
    use embedded_io::{Read, ReadReady, Write};

    #[test]
    fn test_pipe_pair() {
        let (mut a, mut b) = pair();
        a.write(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(b.read_nonblock(&mut buf, 10).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(b.read_nonblock(&mut buf, 10).unwrap(), 1);
        assert_eq!(b.read_nonblock(&mut buf, 1).unwrap(), 0);

        drop(a);
        assert!(matches!(
            b.read_nonblock(&mut buf, 1),
            Err(AdapterError::Disconnected)
        ));
    }

    #[test]
    fn test_channel_peek_keeps_byte() {
        let (a, b) = pair();
        let mut tx = Channel::new(a);
        let mut rx = Channel::new(b);

        assert!(!rx.read_ready().unwrap());
        tx.write_all(&[0x20, 0x00, 0x00, 0x00]).unwrap();
        assert!(rx.read_ready().unwrap());
        assert!(rx.read_ready().unwrap());

        let mut buf = [0u8; 4];
        rx.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0x20, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_channel_read_times_out() {
        let (_a, b) = pair();
        let mut rx = Channel::new(b);
        rx.set_timeout_ms(1);
        let mut buf = [0u8; 1];
        assert!(matches!(rx.read(&mut buf), Err(AdapterError::Timeout)));
    }

    #[test]
    fn test_clone_shares_link() {
        let (a, b) = pair();
        let mut tx = Channel::new(a);
        let rx = Channel::new(b);
        let mut rx2 = rx.try_clone().unwrap();
        tx.write_all(&[7]).unwrap();
        let mut buf = [0u8; 1];
        rx2.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [7]);
    }
}
