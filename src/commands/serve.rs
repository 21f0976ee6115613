//! Emulated adapter
//!
//! Serves the combi protocol for an emulated ECU, over TCP or a serial
//! port. The ECU keeps its flash contents across TCP connections.

use combiflash_adapter::{
    open, AdapterConnection, AnyTransport, Channel, Dispatcher, FixedSensors, LoopbackBus,
    PacketWriter, TcpTransport, Transport,
};
use combiflash_core::clock::StdClock;
use combiflash_dummy::DummyTarget;
use std::net::TcpListener;

/// Answer one host link until it closes; returns the target
pub fn serve_link<T>(
    transport: T,
    target: DummyTarget,
    sensors: FixedSensors,
) -> Result<DummyTarget, Box<dyn std::error::Error>>
where
    T: Transport + Send + 'static,
{
    let mut rx = Channel::new(transport);
    let writer = PacketWriter::new(rx.try_clone()?);

    let mut adapter = Dispatcher::new(target, StdClock::new(), LoopbackBus::new(), writer)
        .with_sensors(sensors);
    adapter.serve(&mut rx)?;
    Ok(adapter.into_port())
}

/// Accept TCP connections one after the other
pub fn run_tcp(
    listen: &str,
    mut target: DummyTarget,
    sensors: FixedSensors,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(listen).map_err(|e| format!("{}: {}", listen, e))?;
    println!("Emulated adapter listening on {}", listener.local_addr()?);

    loop {
        let transport = TcpTransport::accept(&listener)?;
        log::info!("Host connected");
        target = serve_link(AnyTransport::Tcp(transport), target, sensors.clone())?;
        log::info!("Host disconnected");
    }
}

/// Serve a single serial link
pub fn run_serial(
    device: &str,
    target: DummyTarget,
    sensors: FixedSensors,
) -> Result<(), Box<dyn std::error::Error>> {
    let conn = AdapterConnection::Serial {
        device: device.to_string(),
        baud: None,
    };
    let transport = open(&conn)?;
    println!("Emulated adapter on {}", device);
    serve_link(transport, target, sensors)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use combiflash_adapter::transport::pipe;
    use combiflash_adapter::Client;
    use combiflash_dummy::DummyConfig;

    #[test]
    fn test_serve_link_keeps_target() {
        let (host, device) = pipe::pair();
        let target = DummyTarget::new(DummyConfig::default());
        let server = std::thread::spawn(move || {
            serve_link(device, target, FixedSensors::default())
                .map_err(|e| e.to_string())
        });

        let mut client = Client::new(host);
        client
            .write_memory(combiflash_core::bdm::AccessSize::Long, 0x0010_0000, 0xCAFE_F00D)
            .unwrap();
        drop(client);

        let target = server.join().unwrap().unwrap();
        assert_eq!(&target.ram()[..4], &[0xCA, 0xFE, 0xF0, 0x0D]);
    }
}
