//! Streamed flash transfers and adapter queries
//!
//! The adapter runs the flash algorithms; the host only moves 256-byte
//! blocks.

use super::list::format_size;
use super::progress::IndicatifProgress;
use crate::cli::ChipArgs;
use combiflash_adapter::{Client, Transport};
use combiflash_core::chip::{self, FlashFamily};
use combiflash_core::flash::{NeverAbort, Progress};
use combiflash_core::protocol;
use std::path::Path;

/// Flash family and, when known, the flash size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipChoice {
    pub family: FlashFamily,
    pub size: Option<u32>,
}

/// Work out which chip to talk to
///
/// Without `--chip` or `--family` the chip is identified over BDM and put
/// back into read-array mode.
pub fn resolve_chip<T: Transport>(
    client: &mut Client<T>,
    args: &ChipArgs,
) -> Result<ChipChoice, Box<dyn std::error::Error>> {
    if let Some(name) = &args.chip {
        let chip = chip::find_by_name(name)
            .ok_or_else(|| format!("Unknown chip: {} (see list-chips)", name))?;
        return Ok(ChipChoice {
            family: chip.family,
            size: Some(chip.flash_size()),
        });
    }
    if let Some(family) = args.family {
        return Ok(ChipChoice {
            family: family.into(),
            size: None,
        });
    }

    client.stop_chip()?;
    let id = protocol::identify(client)?;
    id.chip.family.reset(client)?;
    println!(
        "Found: {} {} ({}, {})",
        id.chip.vendor,
        id.chip.name,
        id.chip.ecu,
        format_size(id.chip.flash_size())
    );
    Ok(ChipChoice {
        family: id.chip.family,
        size: Some(id.chip.flash_size()),
    })
}

fn end_address(end: Option<u32>, choice: ChipChoice) -> Result<u32, Box<dyn std::error::Error>> {
    end.or(choice.size)
        .ok_or_else(|| "--end is required when the chip size is unknown".into())
}

/// Show firmware version, pin state and thermocouple reading
pub fn run_info<T: Transport>(client: &mut Client<T>) -> Result<(), Box<dyn std::error::Error>> {
    let (major, minor) = client.version()?;
    println!("Firmware:   {}.{}", major, minor);

    let status = client.pin_state()?;
    println!("Target:     {:?}", status);

    match client.egt()? {
        Some(temp) => println!("EGT:        {:.1} °C", temp),
        None => println!("EGT:        no sensor"),
    }
    Ok(())
}

/// Read `start..end` into a file
pub fn run_read<T: Transport>(
    client: &mut Client<T>,
    args: &ChipArgs,
    output: &Path,
    start: u32,
    end: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let choice = resolve_chip(client, args)?;
    let end = end_address(end, choice)?;

    let mut data = Vec::with_capacity(end.saturating_sub(start) as usize);
    let mut progress = IndicatifProgress::new();
    client.read_flash(choice.family, start, end, &mut data, &NeverAbort, &mut progress)?;

    super::write_file(output, &data)
}

/// Erase the flash
pub fn run_erase<T: Transport>(
    client: &mut Client<T>,
    args: &ChipArgs,
    start: u32,
    end: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let choice = resolve_chip(client, args)?;
    let end = match choice.family {
        FlashFamily::Am28 => end_address(end, choice)?,
        // AM29 chips are always erased whole
        FlashFamily::Am29 => end.or(choice.size).unwrap_or(0),
    };

    let mut progress = IndicatifProgress::new();
    progress.erasing(end.saturating_sub(start));
    client.erase_flash(choice.family, start, end)?;
    progress.complete();

    println!("Erase complete");
    Ok(())
}

/// Program a file at `start`
pub fn run_write<T: Transport>(
    client: &mut Client<T>,
    args: &ChipArgs,
    input: &Path,
    start: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = super::read_file(input)?;
    let choice = resolve_chip(client, args)?;

    if let Some(size) = choice.size {
        if start as u64 + data.len() as u64 > size as u64 {
            return Err(format!(
                "File size ({} bytes) at 0x{:X} exceeds flash size ({} bytes)",
                data.len(),
                start,
                size
            )
            .into());
        }
    }

    let mut progress = IndicatifProgress::new();
    client.write_flash(choice.family, start, &data, &mut progress)?;
    println!("Wrote {} bytes at 0x{:06X}", data.len(), start);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::FamilyArg;
    use crate::commands::serve::serve_link;
    use combiflash_adapter::transport::pipe::{self, PipeTransport};
    use combiflash_adapter::FixedSensors;
    use combiflash_dummy::{DummyConfig, DummyTarget};
    use std::thread::JoinHandle;

    type Server = JoinHandle<Result<DummyTarget, String>>;

    fn emulated(target: DummyTarget) -> (Client<PipeTransport>, Server) {
        let (host, device) = pipe::pair();
        let server = std::thread::spawn(move || {
            serve_link(device, target, FixedSensors::default()).map_err(|e| e.to_string())
        });
        (Client::new(host), server)
    }

    #[test]
    fn test_resolve_by_identification() {
        let (mut client, server) = emulated(DummyTarget::new(DummyConfig::default()));
        let choice = resolve_chip(&mut client, &ChipArgs::default()).unwrap();
        assert_eq!(choice.family, FlashFamily::Am29);
        assert_eq!(choice.size, Some(0x4_0000));
        drop(client);
        server.join().unwrap().unwrap();
    }

    #[test]
    fn test_resolve_by_family_needs_end() {
        let (mut client, server) = emulated(DummyTarget::new(DummyConfig::default()));
        let args = ChipArgs {
            chip: None,
            family: Some(FamilyArg::Am28),
        };
        let choice = resolve_chip(&mut client, &args).unwrap();
        assert_eq!(choice.size, None);
        assert!(end_address(None, choice).is_err());
        assert_eq!(end_address(Some(0x100), choice).unwrap(), 0x100);
        drop(client);
        server.join().unwrap().unwrap();
    }

    #[test]
    fn test_read_to_file() {
        let image: Vec<u8> = (0..0x4_0000u32).map(|i| (i >> 3) as u8).collect();
        let target = DummyTarget::with_image(DummyConfig::default(), &image);
        let (mut client, server) = emulated(target);

        let path = std::env::temp_dir().join(format!("combiflash-read-{}.bin", std::process::id()));
        let args = ChipArgs {
            chip: Some("Am29F010".into()),
            family: None,
        };
        run_read(&mut client, &args, &path, 0x100, Some(0x500)).unwrap();
        drop(client);
        server.join().unwrap().unwrap();

        let data = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(data, &image[0x100..0x500]);
    }
}
