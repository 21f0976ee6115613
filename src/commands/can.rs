//! CAN bus commands

use combiflash_adapter::{Client, Transport};
use combiflash_core::packet::CanFrame;
use std::time::Duration;

/// Format a frame like candump
pub fn format_frame(frame: &CanFrame) -> String {
    let id = if frame.is_extended != 0 {
        format!("{:08X}", frame.id())
    } else {
        format!("{:03X}", frame.id())
    };
    let data: Vec<String> = frame.payload().iter().map(|b| format!("{:02X}", b)).collect();
    format!("{}  [{}]  {}", id, frame.len, data.join(" "))
}

fn open_bus<T: Transport>(
    client: &mut Client<T>,
    bitrate: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(bitrate) = bitrate {
        client.can_set_bitrate(bitrate)?;
    }
    client.can_open(true)?;
    Ok(())
}

/// Transmit one frame
pub fn run_send<T: Transport>(
    client: &mut Client<T>,
    bitrate: Option<u32>,
    frame: &CanFrame,
) -> Result<(), Box<dyn std::error::Error>> {
    open_bus(client, bitrate)?;
    client.can_send(frame)?;
    println!("Sent {}", format_frame(frame));
    Ok(())
}

/// Print received frames until `count` frames arrived or the bus was idle
/// for `idle`
pub fn run_monitor<T: Transport>(
    client: &mut Client<T>,
    bitrate: Option<u32>,
    count: Option<usize>,
    idle: Duration,
) -> Result<usize, Box<dyn std::error::Error>> {
    open_bus(client, bitrate)?;

    let mut received = 0;
    while count.map_or(true, |n| received < n) {
        match client.can_receive(idle)? {
            Some(frame) => {
                println!("{}", format_frame(&frame));
                received += 1;
            }
            None => {
                log::info!("No frame for {} s", idle.as_secs());
                break;
            }
        }
    }

    client.can_open(false)?;
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_frame() {
        let frame = CanFrame::new(0x7E8, &[0x02, 0x7E, 0x00], false).unwrap();
        assert_eq!(format_frame(&frame), "7E8  [3]  02 7E 00");

        let frame = CanFrame::new(0x18DA_F110, &[], true).unwrap();
        assert_eq!(format_frame(&frame), "18DAF110  [0]  ");
    }
}
