//! CLI command implementations
//!
//! ## Adapter commands
//!
//! `info`, `read`, `erase`, `write` and the `can` commands talk to an
//! adapter through [`Client`]; the streamed transfers run on the adapter.
//!
//! ## ECU commands
//!
//! The `ecu` commands run the flash engine on the host. The target is
//! either a remote adapter, driven one BDM access at a time, or an emulated
//! ECU in this process.

pub mod can;
pub mod ecu;
mod list;
pub mod progress;
pub mod serve;
pub mod transfer;

pub use list::list_chips;

use crate::cli::{AdapterArgs, EmulatorArgs};
use combiflash_adapter::{open, AdapterConfig, AdapterConnection, AnyTransport, Client};
use combiflash_core::chip;
use combiflash_dummy::{DummyConfig, DummyTarget};
use std::path::Path;

/// Open a client for the adapter named on the command line or in the config
pub fn connect(
    args: &AdapterArgs,
    config: &AdapterConfig,
) -> Result<Client<AnyTransport>, Box<dyn std::error::Error>> {
    let conn = match &args.adapter {
        Some(s) => AdapterConnection::parse(s)?,
        None => config
            .connection()?
            .ok_or("No adapter specified (use --adapter or [adapter] connection)")?,
    };
    log::info!("Opening adapter {}", conn);

    let mut client = Client::new(open(&conn)?);
    client.channel_mut().set_timeout_ms(config.adapter.timeout_ms);
    Ok(client)
}

/// Build the emulated ECU from the command line and the `[emulator]` section
pub fn emulated_target(
    args: &EmulatorArgs,
    config: &AdapterConfig,
) -> Result<DummyTarget, Box<dyn std::error::Error>> {
    let section = &config.emulator;

    let mut dummy = match args.chip.as_deref().or(section.chip.as_deref()) {
        Some(name) => {
            let chip = chip::find_by_name(name)
                .ok_or_else(|| format!("Unknown chip: {} (see list-chips)", name))?;
            DummyConfig::for_chip(chip.code)
        }
        None => DummyConfig::default(),
    };
    if let Some(simcr) = args.simcr.or(section.simcr) {
        dummy.simcr = simcr;
    }

    let target = match args.image.as_deref().or(section.image.as_deref()) {
        Some(path) => DummyTarget::with_image(dummy, &read_file(path)?),
        None => DummyTarget::new(dummy),
    };
    log::info!(
        "Emulating chip type 0x{:02X} with {} bytes of flash",
        target.config().chip_code,
        target.flash().len()
    );
    Ok(target)
}

/// Read file contents into a Vec
pub fn read_file(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let data = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    log::info!("Read {} bytes from {:?}", data.len(), path);
    Ok(data)
}

/// Write `data` to a file
pub fn write_file(path: &Path, data: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, data).map_err(|e| format!("{}: {}", path.display(), e))?;
    println!("Wrote {} bytes to {:?}", data.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use combiflash_core::chip::{AMD28F010, AMD29BL802C};
    use combiflash_dummy::SIMCR_MC68377;

    #[test]
    fn test_emulated_target_from_config() {
        let config = AdapterConfig::from_toml_str("[emulator]\nchip = \"Am28F010\"\n").unwrap();
        let target = emulated_target(&EmulatorArgs::default(), &config).unwrap();
        assert_eq!(target.config().chip_code, AMD28F010);
        assert_eq!(target.flash().len(), 0x4_0000);
    }

    #[test]
    fn test_emulated_target_args_override() {
        let config = AdapterConfig::from_toml_str("[emulator]\nchip = \"Am28F010\"\n").unwrap();
        let args = EmulatorArgs {
            chip: Some("am29bl802c".into()),
            simcr: Some(0x00CF),
            image: None,
        };
        let target = emulated_target(&args, &config).unwrap();
        assert_eq!(target.config().chip_code, AMD29BL802C);
        assert_ne!(target.config().simcr, SIMCR_MC68377);
    }

    #[test]
    fn test_unknown_chip() {
        let args = EmulatorArgs {
            chip: Some("27C512".into()),
            ..Default::default()
        };
        assert!(emulated_target(&args, &AdapterConfig::default()).is_err());
    }

    #[test]
    fn test_connect_requires_adapter() {
        assert!(connect(&AdapterArgs::default(), &AdapterConfig::default()).is_err());
    }
}
