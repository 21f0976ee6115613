//! combiflash-adapter - the combi adapter on both ends of the host link
//!
//! The device side answers host packets: [`Dispatcher`] routes each command
//! to the board, BDM or CAN handlers, [`stream`] runs the streamed flash
//! transfers and [`CanRelay`] forwards received CAN frames. The host side is
//! [`Client`], which speaks the same protocol to a real or emulated adapter.
//!
//! # Supported Transports
//!
//! - Serial port (`serial` feature): `dev=/dev/ttyACM0`, `dev=COM3:115200`
//! - TCP socket: `ip=host:port`
//! - In-process pipe, for tests and the built-in emulator
//!
//! # Example
//!
//! ```no_run
//! use combiflash_adapter::{open, AdapterConnection, Client};
//!
//! let conn = AdapterConnection::parse("ip=127.0.0.1:6116")?;
//! let mut client = Client::new(open(&conn)?);
//! let (major, minor) = client.version()?;
//! println!("firmware {}.{}", major, minor);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod can;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod stream;
pub mod transport;
pub mod writer;

#[cfg(test)]
mod testutil;

// Re-exports
pub use can::{CanBus, CanRelay, LoopbackBus};
pub use client::Client;
pub use config::AdapterConfig;
pub use dispatcher::{Dispatcher, FixedSensors, Sensors};
pub use error::{AdapterError, Result};
pub use transport::pipe::PipeTransport;
#[cfg(feature = "serial")]
pub use transport::serial::SerialTransport;
pub use transport::tcp::TcpTransport;
pub use transport::{Channel, Transport};
pub use writer::PacketWriter;

/// Connection options for an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterConnection {
    /// Serial port connection
    Serial {
        /// Device path (e.g., "/dev/ttyACM0" or "COM3")
        device: String,
        /// Baud rate (None for the default)
        baud: Option<u32>,
    },
    /// TCP socket connection
    Tcp {
        /// Hostname or IP address
        host: String,
        /// Port number
        port: u16,
    },
}

impl AdapterConnection {
    /// Parse a connection string
    ///
    /// Formats:
    /// - `dev=/dev/ttyACM0` - Serial with default baud
    /// - `dev=/dev/ttyACM0:115200` - Serial with specified baud
    /// - `ip=host:port` - TCP connection
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        if let Some(dev) = s.strip_prefix("dev=") {
            match dev.rsplit_once(':') {
                Some((device, baud_str)) if !device.is_empty() => {
                    let baud = baud_str
                        .parse()
                        .map_err(|_| format!("Invalid baud rate: {}", baud_str))?;
                    Ok(Self::Serial {
                        device: device.to_string(),
                        baud: Some(baud),
                    })
                }
                _ => Ok(Self::Serial {
                    device: dev.to_string(),
                    baud: None,
                }),
            }
        } else if let Some(ip) = s.strip_prefix("ip=") {
            let (host, port_str) = ip
                .rsplit_once(':')
                .ok_or_else(|| "Missing port in ip= parameter".to_string())?;
            let port = port_str
                .parse()
                .map_err(|_| format!("Invalid port: {}", port_str))?;
            Ok(Self::Tcp {
                host: host.to_string(),
                port,
            })
        } else {
            Err(format!(
                "Invalid adapter connection string: {}. Use dev=... or ip=...",
                s
            ))
        }
    }
}

impl std::fmt::Display for AdapterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial { device, baud: None } => write!(f, "dev={}", device),
            Self::Serial {
                device,
                baud: Some(baud),
            } => write!(f, "dev={}:{}", device, baud),
            Self::Tcp { host, port } => write!(f, "ip={}:{}", host, port),
        }
    }
}

/// Any of the supported transports
pub enum AnyTransport {
    /// TCP socket
    Tcp(TcpTransport),
    /// Serial port
    #[cfg(feature = "serial")]
    Serial(SerialTransport),
    /// In-process pipe
    Pipe(PipeTransport),
}

impl Transport for AnyTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(t) => t.write(data),
            #[cfg(feature = "serial")]
            Self::Serial(t) => t.write(data),
            Self::Pipe(t) => t.write(data),
        }
    }

    fn read_nonblock(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
        match self {
            Self::Tcp(t) => t.read_nonblock(buf, timeout_ms),
            #[cfg(feature = "serial")]
            Self::Serial(t) => t.read_nonblock(buf, timeout_ms),
            Self::Pipe(t) => t.read_nonblock(buf, timeout_ms),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Self::Tcp(t) => t.flush(),
            #[cfg(feature = "serial")]
            Self::Serial(t) => t.flush(),
            Self::Pipe(t) => t.flush(),
        }
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(match self {
            Self::Tcp(t) => Self::Tcp(t.try_clone()?),
            #[cfg(feature = "serial")]
            Self::Serial(t) => Self::Serial(t.try_clone()?),
            Self::Pipe(t) => Self::Pipe(t.try_clone()?),
        })
    }
}

/// Open the transport for a connection
pub fn open(conn: &AdapterConnection) -> Result<AnyTransport> {
    match conn {
        AdapterConnection::Tcp { host, port } => {
            Ok(AnyTransport::Tcp(TcpTransport::connect(host, *port)?))
        }
        #[cfg(feature = "serial")]
        AdapterConnection::Serial { device, baud } => {
            Ok(AnyTransport::Serial(SerialTransport::open(device, *baud)?))
        }
        #[cfg(not(feature = "serial"))]
        AdapterConnection::Serial { device, .. } => Err(AdapterError::ConnectionFailed(format!(
            "{}: built without serial port support",
            device
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serial() {
        assert_eq!(
            AdapterConnection::parse("dev=/dev/ttyACM0").unwrap(),
            AdapterConnection::Serial {
                device: "/dev/ttyACM0".into(),
                baud: None
            }
        );
        assert_eq!(
            AdapterConnection::parse("dev=COM3:115200").unwrap(),
            AdapterConnection::Serial {
                device: "COM3".into(),
                baud: Some(115200)
            }
        );
        assert!(AdapterConnection::parse("dev=/dev/ttyACM0:fast").is_err());
    }

    #[test]
    fn test_parse_tcp() {
        let conn = AdapterConnection::parse("ip=127.0.0.1:6116").unwrap();
        assert_eq!(
            conn,
            AdapterConnection::Tcp {
                host: "127.0.0.1".into(),
                port: 6116
            }
        );
        assert_eq!(conn.to_string(), "ip=127.0.0.1:6116");
        assert!(AdapterConnection::parse("ip=localhost").is_err());
        assert!(AdapterConnection::parse("usb").is_err());
    }

    #[test]
    fn test_tcp_link() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let mut t = TcpTransport::accept(&listener).unwrap();
            let mut buf = [0u8; 4];
            let mut got = 0;
            while got < 4 {
                got += t.read_nonblock(&mut buf[got..], 1000).unwrap();
            }
            t.write(&buf).unwrap();
        });

        let conn = AdapterConnection::Tcp {
            host: "127.0.0.1".into(),
            port,
        };
        let mut t = open(&conn).unwrap();
        t.write(&[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        let mut got = 0;
        while got < 4 {
            got += t.read_nonblock(&mut buf[got..], 1000).unwrap();
        }
        assert_eq!(buf, [1, 2, 3, 4]);
        server.join().unwrap();
    }
}
