//! combiflash - CAN/BDM combi adapter for Trionic ECUs
//!
//! Talks to a combi adapter over a serial port or TCP, or plays the adapter
//! itself for an emulated ECU.
//!
//! # Architecture
//!
//! - **Streamed transfers** (`read`, `erase`, `write`) - the adapter runs
//!   the flash algorithms and the host moves 256-byte blocks
//! - **ECU commands** (`ecu ...`) - the host runs the flash engine and
//!   drives the target one BDM access at a time, through an adapter or
//!   against an emulated ECU
//! - **`serve`** - an emulated adapter that other tools can connect to

mod cli;
mod commands;

use clap::Parser;
use cli::{CanCommands, Cli, Commands, EcuCommands};
use combiflash_adapter::{AdapterConfig, FixedSensors};
use combiflash_core::packet::CanFrame;
use std::time::Duration;

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<AdapterConfig, Box<dyn std::error::Error>> {
    match &cli.config {
        Some(path) => {
            let config = AdapterConfig::from_file(path)?;
            log::info!("Loaded config from {:?}", path);
            Ok(config)
        }
        None => Ok(AdapterConfig::default()),
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Serve {
            listen,
            serial,
            emulator,
            egt,
        } => {
            let target = commands::emulated_target(&emulator, &config)?;
            let sensors = FixedSensors {
                egt: egt.or(config.emulator.egt),
                adc: Vec::new(),
            };
            match serial {
                Some(device) => commands::serve::run_serial(&device, target, sensors),
                None => {
                    let listen = listen.unwrap_or_else(|| config.emulator.listen.clone());
                    commands::serve::run_tcp(&listen, target, sensors)
                }
            }
        }
        Commands::Info { adapter } => {
            let mut client = commands::connect(&adapter, &config)?;
            commands::transfer::run_info(&mut client)
        }
        Commands::Read {
            adapter,
            output,
            chip,
            start,
            end,
        } => {
            let mut client = commands::connect(&adapter, &config)?;
            commands::transfer::run_read(&mut client, &chip, &output, start, end)
        }
        Commands::Erase {
            adapter,
            chip,
            start,
            end,
        } => {
            let mut client = commands::connect(&adapter, &config)?;
            commands::transfer::run_erase(&mut client, &chip, start, end)
        }
        Commands::Write {
            adapter,
            input,
            chip,
            start,
        } => {
            let mut client = commands::connect(&adapter, &config)?;
            commands::transfer::run_write(&mut client, &chip, &input, start)
        }
        Commands::Ecu(subcmd) => match subcmd {
            EcuCommands::Identify { target } => {
                commands::ecu::with_target(&target, &config, |port| {
                    commands::ecu::run_identify(port).map(drop)
                })
            }
            EcuCommands::Prep { target } => {
                commands::ecu::with_target(&target, &config, commands::ecu::run_prep)
            }
            EcuCommands::Dump { target, output } => {
                commands::ecu::with_target(&target, &config, |port| {
                    commands::ecu::run_dump(port, &output)
                })
            }
            EcuCommands::Erase { target } => {
                commands::ecu::with_target(&target, &config, commands::ecu::run_erase)
            }
            EcuCommands::Flash {
                target,
                input,
                verify,
            } => commands::ecu::with_target(&target, &config, |port| {
                commands::ecu::run_flash(port, &input, verify)
            }),
        },
        Commands::Can(subcmd) => match subcmd {
            CanCommands::Send {
                adapter,
                bitrate,
                id,
                data,
                extended,
            } => {
                let data = cli::parse_hex_bytes(&data)?;
                let frame = CanFrame::new(id, &data, extended)
                    .map_err(|_| format!("A CAN frame carries at most 8 bytes, got {}", data.len()))?;
                let mut client = commands::connect(&adapter, &config)?;
                commands::can::run_send(&mut client, bitrate.or(config.can.bitrate), &frame)
            }
            CanCommands::Monitor {
                adapter,
                bitrate,
                count,
                idle,
            } => {
                let mut client = commands::connect(&adapter, &config)?;
                let received = commands::can::run_monitor(
                    &mut client,
                    bitrate.or(config.can.bitrate),
                    count,
                    Duration::from_secs(idle),
                )?;
                println!("{} frame(s) received", received);
                Ok(())
            }
        },
        Commands::ListChips { vendor } => {
            commands::list_chips(vendor.as_deref());
            Ok(())
        }
    }
}
