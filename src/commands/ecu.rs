//! Whole-ECU commands run by the host-side flash engine

use super::list::format_size;
use super::progress::IndicatifProgress;
use crate::cli::TargetArgs;
use combiflash_adapter::AdapterConfig;
use combiflash_core::bdm::BdmPort;
use combiflash_core::clock::StdClock;
use combiflash_core::flash::{self, NeverAbort, NoProgress};
use combiflash_core::protocol::{self, FlashId};
use std::path::Path;

type CmdResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Run `f` against the target selected by `args`
pub fn with_target<T>(
    args: &TargetArgs,
    config: &AdapterConfig,
    f: impl FnOnce(&mut dyn BdmPort) -> CmdResult<T>,
) -> CmdResult<T> {
    if args.emulate {
        let mut target = super::emulated_target(&args.emulator, config)?;
        f(&mut target)
    } else {
        let mut client = super::connect(&args.adapter, config)?;
        f(&mut client)
    }
}

fn print_id(id: &FlashId) {
    println!(
        "Found: {} {} (make 0x{:02X}, type 0x{:02X})",
        id.chip.vendor, id.chip.name, id.make, id.code
    );
    println!(
        "       {} flash, {} ECU, {}",
        id.chip.family,
        id.chip.ecu,
        format_size(id.chip.flash_size())
    );
}

/// Identify the flash chip
pub fn run_identify(port: &mut dyn BdmPort) -> CmdResult<FlashId> {
    let clock = StdClock::new();
    let kind = flash::prepare_ecu(port, &clock)?;
    println!("ECU:   {}", kind);

    let id = protocol::identify(port)?;
    id.chip.family.reset(port)?;
    print_id(&id);
    Ok(id)
}

/// Halt the ECU and set it up for flashing
pub fn run_prep(port: &mut dyn BdmPort) -> CmdResult<()> {
    let kind = flash::prepare_ecu(port, &StdClock::new())?;
    println!("{} ready for flashing", kind);
    Ok(())
}

/// Dump the whole flash to a file
pub fn run_dump(port: &mut dyn BdmPort, output: &Path) -> CmdResult<()> {
    let clock = StdClock::new();
    flash::prepare_ecu(port, &clock)?;

    let mut data = Vec::new();
    let id = flash::dump(port, &clock, &mut data, &NeverAbort, &mut IndicatifProgress::new())?;
    print_id(&id);
    super::write_file(output, &data)
}

/// Erase the whole flash
pub fn run_erase(port: &mut dyn BdmPort) -> CmdResult<()> {
    let clock = StdClock::new();
    flash::prepare_ecu(port, &clock)?;

    let id = flash::erase(port, &clock, &mut IndicatifProgress::new())?;
    println!("Erased {} {}", id.chip.vendor, id.chip.name);
    Ok(())
}

/// Erase and program an image, optionally reading it back
pub fn run_flash(port: &mut dyn BdmPort, input: &Path, verify: bool) -> CmdResult<()> {
    let image = super::read_file(input)?;
    let clock = StdClock::new();
    flash::prepare_ecu(port, &clock)?;

    let id = flash::program(port, &clock, &image, &NeverAbort, &mut IndicatifProgress::new())?;
    println!("Programmed {} {}", id.chip.vendor, id.chip.name);

    if verify {
        let mut readback = Vec::with_capacity(image.len());
        flash::dump(port, &clock, &mut readback, &NeverAbort, &mut NoProgress)?;
        if let Some(offset) = readback.iter().zip(&image).position(|(a, b)| a != b) {
            return Err(format!(
                "Verification failed at 0x{:06X}: expected 0x{:02X}, found 0x{:02X}",
                offset, image[offset], readback[offset]
            )
            .into());
        }
        println!("Verified {} bytes", image.len());
    }
    Ok(())
}
