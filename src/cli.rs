//! CLI argument parsing

use clap::{Args, Parser, Subcommand, ValueEnum};
use combiflash_core::chip::FlashFamily;
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
pub fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a string as a hex or decimal u16
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let value = parse_hex_u32(s)?;
    u16::try_from(value).map_err(|_| format!("Value out of range: {}", s))
}

/// Parse a hex byte string such as "02 3E 00" or "023E00"
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(format!("Odd number of hex digits: {}", s));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex byte: {}", e))
        })
        .collect()
}

#[derive(Parser)]
#[command(name = "combiflash")]
#[command(author, version, about = "CAN/BDM combi adapter for Trionic ECUs", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML format)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// How to reach the adapter
#[derive(Args, Debug, Clone, Default)]
pub struct AdapterArgs {
    /// Adapter connection (dev=/dev/ttyACM0[:baud] or ip=host:port)
    #[arg(short, long)]
    pub adapter: Option<String>,
}

/// Target for ECU commands
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    #[command(flatten)]
    pub adapter: AdapterArgs,

    /// Run against an emulated ECU in this process instead of an adapter
    #[arg(long, conflicts_with = "adapter")]
    pub emulate: bool,

    #[command(flatten)]
    pub emulator: EmulatorArgs,
}

/// Emulated ECU options, overriding the `[emulator]` config section
#[derive(Args, Debug, Clone, Default)]
pub struct EmulatorArgs {
    /// Flash chip of the emulated ECU
    #[arg(long)]
    pub chip: Option<String>,

    /// Initial flash contents of the emulated ECU
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// SIMCR reset value of the emulated ECU (hex)
    #[arg(long, value_parser = parse_hex_u16)]
    pub simcr: Option<u16>,
}

/// Flash command set selected on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyArg {
    /// AMD 29F style (29F010, 29F400, 39SF010, ...)
    Am29,
    /// AMD 28F style (28F010, 28F512, ...)
    Am28,
}

impl From<FamilyArg> for FlashFamily {
    fn from(arg: FamilyArg) -> Self {
        match arg {
            FamilyArg::Am29 => FlashFamily::Am29,
            FamilyArg::Am28 => FlashFamily::Am28,
        }
    }
}

/// Chip selection for streamed transfers
#[derive(Args, Debug, Clone, Default)]
pub struct ChipArgs {
    /// Chip name (optional, identified through the adapter if not specified)
    #[arg(short, long, conflicts_with = "family")]
    pub chip: Option<String>,

    /// Flash command set, skips identification
    #[arg(long, value_enum)]
    pub family: Option<FamilyArg>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an emulated adapter
    Serve {
        /// Address to listen on (default from config, 127.0.0.1:6116)
        #[arg(short, long)]
        listen: Option<String>,

        /// Serve on a serial port instead of TCP
        #[arg(long, conflicts_with = "listen")]
        serial: Option<String>,

        #[command(flatten)]
        emulator: EmulatorArgs,

        /// Thermocouple reading to report, in degrees Celsius
        #[arg(long)]
        egt: Option<f32>,
    },

    /// Show adapter firmware version and target state
    Info {
        #[command(flatten)]
        adapter: AdapterArgs,
    },

    /// Read flash contents to file through the adapter
    Read {
        #[command(flatten)]
        adapter: AdapterArgs,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        chip: ChipArgs,

        /// Start address (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,

        /// End address, exclusive (defaults to the flash size)
        #[arg(long, value_parser = parse_hex_u32)]
        end: Option<u32>,
    },

    /// Erase flash through the adapter
    Erase {
        #[command(flatten)]
        adapter: AdapterArgs,

        #[command(flatten)]
        chip: ChipArgs,

        /// Start address for a partial AM28 erase (hex)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,

        /// End address for a partial AM28 erase, exclusive (hex)
        #[arg(long, value_parser = parse_hex_u32)]
        end: Option<u32>,
    },

    /// Write file to flash through the adapter
    ///
    /// The flash must be erased first.
    Write {
        #[command(flatten)]
        adapter: AdapterArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        chip: ChipArgs,

        /// Address to program the file at (hex)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,
    },

    /// Whole-ECU operations over BDM
    #[command(subcommand)]
    Ecu(EcuCommands),

    /// CAN bus operations
    #[command(subcommand)]
    Can(CanCommands),

    /// List supported flash chips
    ListChips {
        /// Filter by vendor
        #[arg(long)]
        vendor: Option<String>,
    },
}

/// ECU subcommands
#[derive(Subcommand)]
pub enum EcuCommands {
    /// Identify the flash chip
    Identify {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Halt the ECU and set it up for flashing
    Prep {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Dump the whole flash to file
    Dump {
        #[command(flatten)]
        target: TargetArgs,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Erase the whole flash
    Erase {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Erase and program a whole image
    Flash {
        #[command(flatten)]
        target: TargetArgs,

        /// Image file path
        #[arg(short, long)]
        input: PathBuf,

        /// Read the flash back and compare after programming
        #[arg(long)]
        verify: bool,
    },
}

/// CAN subcommands
#[derive(Subcommand)]
pub enum CanCommands {
    /// Transmit one frame
    Send {
        #[command(flatten)]
        adapter: AdapterArgs,

        /// Bitrate in bit/s (default from config)
        #[arg(short, long)]
        bitrate: Option<u32>,

        /// Frame identifier (hex)
        #[arg(long, value_parser = parse_hex_u32)]
        id: u32,

        /// Data bytes in hex, up to 8 (e.g. "02 3E 00")
        #[arg(long, default_value = "")]
        data: String,

        /// Use a 29-bit identifier
        #[arg(long)]
        extended: bool,
    },

    /// Print received frames
    Monitor {
        #[command(flatten)]
        adapter: AdapterArgs,

        /// Bitrate in bit/s (default from config)
        #[arg(short, long)]
        bitrate: Option<u32>,

        /// Stop after this many frames
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Stop after this many seconds without a frame
        #[arg(long, default_value = "10")]
        idle: u64,
    },
}
