//! Combi adapter command codes
//!
//! The top three bits of a command code select the subsystem; see
//! [`CommandGroup`].

/// ACK terminator
pub const TERM_ACK: u8 = 0x00;
/// NACK terminator
pub const TERM_NACK: u8 = 0xFF;

// Board commands
/// Query firmware version
pub const CMD_BRD_FWVERSION: u8 = 0x20;
/// Configure ADC filtering
pub const CMD_BRD_ADCFILTER: u8 = 0x21;
/// Sample an ADC channel
pub const CMD_BRD_ADC: u8 = 0x22;
/// Read the exhaust gas thermocouple
pub const CMD_BRD_EGT: u8 = 0x23;

// BDM commands
/// Halt the target in background mode
pub const CMD_BDM_STOP_CHIP: u8 = 0x40;
/// Reset the target and let it run
pub const CMD_BDM_RESET_CHIP: u8 = 0x41;
/// Leave background mode at a given address
pub const CMD_BDM_RUN_CHIP: u8 = 0x42;
/// Single-step the target
pub const CMD_BDM_STEP_CHIP: u8 = 0x43;
/// Reset the target into background mode
pub const CMD_BDM_RESTART_CHIP: u8 = 0x44;
/// Read target memory
pub const CMD_BDM_MEM_READ: u8 = 0x45;
/// Write target memory
pub const CMD_BDM_MEM_WRITE: u8 = 0x46;
/// Read a system register
pub const CMD_BDM_SYSREG_READ: u8 = 0x47;
/// Write a system register
pub const CMD_BDM_SYSREG_WRITE: u8 = 0x48;
/// Read an address/data register
pub const CMD_BDM_ADREG_READ: u8 = 0x49;
/// Write an address/data register
pub const CMD_BDM_ADREG_WRITE: u8 = 0x4A;
/// Stream a flash range to the host
pub const CMD_BDM_READ_FLASH: u8 = 0x4B;
/// Erase flash
pub const CMD_BDM_ERASE_FLASH: u8 = 0x4C;
/// Stream a flash image from the host
pub const CMD_BDM_WRITE_FLASH: u8 = 0x4D;
/// Query BDM pin state
pub const CMD_BDM_PINSTATE: u8 = 0x4E;

// CAN commands
/// Open (payload 1) or close (anything else) the CAN interface
pub const CMD_CAN_OPEN: u8 = 0x80;
/// Set CAN bitrate
pub const CMD_CAN_BITRATE: u8 = 0x81;
/// Unsolicited received CAN frame
pub const CMD_CAN_FRAME: u8 = 0x82;
/// Transmit a CAN frame
pub const CMD_CAN_TXFRAME: u8 = 0x83;
/// Start a GMLAN session with the ECU
pub const CMD_CAN_ECUCONNECT: u8 = 0x89;
/// Read flash over GMLAN
pub const CMD_CAN_READFLASH: u8 = 0x8A;
/// Write flash over GMLAN
pub const CMD_CAN_WRITEFLASH: u8 = 0x8B;

/// Firmware version reported by [`CMD_BRD_FWVERSION`] (major, minor)
pub const FW_VERSION: [u8; 2] = [0x03, 0x01];

/// Command subsystem, selected by `cmd & 0xE0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandGroup {
    /// 0x20: board information
    Board,
    /// 0x40: background debug mode
    Bdm,
    /// 0x80: CAN bus
    Can,
}

impl CommandGroup {
    /// Mask applied to a command code to get its group
    pub const MASK: u8 = 0xE0;

    /// Classify a command code
    pub fn of(command: u8) -> Option<Self> {
        match command & Self::MASK {
            0x20 => Some(Self::Board),
            0x40 => Some(Self::Bdm),
            0x80 => Some(Self::Can),
            _ => None,
        }
    }
}

/// Human readable command name, for logging
pub fn command_name(command: u8) -> &'static str {
    match command {
        CMD_BRD_FWVERSION => "fwversion",
        CMD_BRD_ADCFILTER => "adcfilter",
        CMD_BRD_ADC => "adc",
        CMD_BRD_EGT => "egt",
        CMD_BDM_STOP_CHIP => "stop_chip",
        CMD_BDM_RESET_CHIP => "reset_chip",
        CMD_BDM_RUN_CHIP => "run_chip",
        CMD_BDM_STEP_CHIP => "step_chip",
        CMD_BDM_RESTART_CHIP => "restart_chip",
        CMD_BDM_MEM_READ => "mem_read",
        CMD_BDM_MEM_WRITE => "mem_write",
        CMD_BDM_SYSREG_READ => "sysreg_read",
        CMD_BDM_SYSREG_WRITE => "sysreg_write",
        CMD_BDM_ADREG_READ => "adreg_read",
        CMD_BDM_ADREG_WRITE => "adreg_write",
        CMD_BDM_READ_FLASH => "read_flash",
        CMD_BDM_ERASE_FLASH => "erase_flash",
        CMD_BDM_WRITE_FLASH => "write_flash",
        CMD_BDM_PINSTATE => "pinstate",
        CMD_CAN_OPEN => "can_open",
        CMD_CAN_BITRATE => "can_bitrate",
        CMD_CAN_FRAME => "can_frame",
        CMD_CAN_TXFRAME => "can_txframe",
        CMD_CAN_ECUCONNECT => "ecuconnect",
        CMD_CAN_READFLASH => "can_readflash",
        CMD_CAN_WRITEFLASH => "can_writeflash",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_routing() {
        assert_eq!(CommandGroup::of(CMD_BRD_EGT), Some(CommandGroup::Board));
        assert_eq!(CommandGroup::of(CMD_BDM_PINSTATE), Some(CommandGroup::Bdm));
        assert_eq!(CommandGroup::of(CMD_BDM_READ_FLASH), Some(CommandGroup::Bdm));
        assert_eq!(CommandGroup::of(CMD_CAN_WRITEFLASH), Some(CommandGroup::Can));
        assert_eq!(CommandGroup::of(0x00), None);
        assert_eq!(CommandGroup::of(0x60), None);
        assert_eq!(CommandGroup::of(0xC0), None);
    }
}
