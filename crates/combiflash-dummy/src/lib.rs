//! combiflash-dummy - Emulated Trionic ECU for testing
//!
//! This crate provides a [`BdmPort`] that emulates a CPU32 ECU halted in
//! background mode: a pair of AM29 or AM28 flash chips at address 0, the
//! internal RAM at 0x100000 that the flash driver runs from, and the
//! system integration module registers. It's useful for testing the flash
//! engine and the adapter without hardware.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod clock;
mod flash;

pub use clock::ManualClock;
pub use flash::{FlashArray, FlashStats, FlashTiming};

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec;
use alloc::vec::Vec;

use combiflash_core::bdm::{AccessSize, BdmPort, TargetStatus, SYSREG_RPC};
use combiflash_core::chip::{find_by_code, FlashFamily, AMD29F010};
use combiflash_core::error::{Error, Result};
use combiflash_core::flash::driver::{DRIVER_ADDR, DRIVER_BLOCK_LEN, DRIVER_BUFFER, FLASH_DRIVER};
use combiflash_core::flash::SIMCR;

/// Base of the internal RAM
pub const RAM_BASE: u32 = 0x0010_0000;
/// Size of the internal RAM (T8 DPTRAM)
pub const RAM_SIZE: usize = 0x1800;
/// First address of the system integration module registers
pub const REG_BASE: u32 = 0x00FF_F000;
/// Last address of the register block
pub const REG_END: u32 = 0x00FF_FFFF;

/// SIMCR value of an MC68332 (T5/T7) after reset
pub const SIMCR_MC68332: u16 = 0x00CF;
/// MCR value of an MC68377 (T8) after reset
pub const SIMCR_MC68377: u16 = 0x7E4F;

/// Configuration for the emulated ECU
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Manufacturer byte reported by the flash chips
    pub make: u8,
    /// Device type byte reported by the flash chips
    pub chip_code: u8,
    /// Reset value of SIMCR, decides T5/T7 versus T8
    pub simcr: u16,
    /// Flash chip timing
    pub timing: FlashTiming,
    /// Status samples the flash driver reports "running" for on each run
    pub driver_busy_samples: usize,
    /// Insert a brief false "halted" sample while the driver runs
    pub driver_glitch: bool,
    /// D0 value forced on every driver run
    pub driver_result: Option<u32>,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            make: 0x01,
            chip_code: AMD29F010,
            simcr: SIMCR_MC68332,
            timing: FlashTiming::default(),
            driver_busy_samples: 3,
            driver_glitch: false,
            driver_result: None,
        }
    }
}

impl DummyConfig {
    /// Configuration for a given flash chip type code
    ///
    /// A T8 chip also gets the MC68377 SIMCR value.
    pub fn for_chip(code: u8) -> Self {
        let t8 = find_by_code(code).is_some_and(|c| c.flash_size() == 0x10_0000);
        Self {
            chip_code: code,
            simcr: if t8 { SIMCR_MC68377 } else { SIMCR_MC68332 },
            ..Self::default()
        }
    }
}

/// Counters for what was done to the target
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DummyStats {
    /// Memory reads of any width
    pub reads: usize,
    /// Memory writes of any width
    pub writes: usize,
    /// Flash driver runs
    pub driver_runs: usize,
    /// Flash chip operations
    pub flash: FlashStats,
}

#[derive(Debug, Default)]
struct DriverState {
    runs: usize,
    cursor: usize,
}

/// Emulated ECU behind a BDM port
pub struct DummyTarget {
    config: DummyConfig,
    flash: FlashArray,
    ram: Vec<u8>,
    regs: BTreeMap<u32, u8>,
    sysregs: [u32; 16],
    adregs: [u32; 16],
    halted: bool,
    free_running: bool,
    running_samples: VecDeque<bool>,
    last_addr: u32,
    driver: DriverState,
    stats: DummyStats,
}

impl DummyTarget {
    /// Create a halted target with erased flash
    pub fn new(config: DummyConfig) -> Self {
        let chip = find_by_code(config.chip_code);
        let family = chip.map_or(FlashFamily::Am29, |c| c.family);
        let size = chip.map_or(0x4_0000, |c| c.flash_size() as usize);
        let flash = FlashArray::new(family, config.make, config.chip_code, size, config.timing);

        let mut target = Self {
            config,
            flash,
            ram: vec![0; RAM_SIZE],
            regs: BTreeMap::new(),
            sysregs: [0; 16],
            adregs: [0; 16],
            halted: true,
            free_running: false,
            running_samples: VecDeque::new(),
            last_addr: 0,
            driver: DriverState::default(),
            stats: DummyStats::default(),
        };
        target.power_on_registers();
        target
    }

    /// Create a target whose flash holds `image`
    pub fn with_image(config: DummyConfig, image: &[u8]) -> Self {
        let mut target = Self::new(config);
        let data = target.flash.data_mut();
        let len = core::cmp::min(image.len(), data.len());
        data[..len].copy_from_slice(&image[..len]);
        target
    }

    /// Flash contents
    pub fn flash(&self) -> &[u8] {
        self.flash.data()
    }

    /// Mutable flash contents, bypassing the chips
    pub fn flash_mut(&mut self) -> &mut [u8] {
        self.flash.data_mut()
    }

    /// Internal RAM contents
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Current value of a byte-wide SIM register
    pub fn register(&self, addr: u32) -> u8 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Operation counters
    pub fn stats(&self) -> DummyStats {
        DummyStats {
            flash: self.flash.stats(),
            ..self.stats
        }
    }

    fn power_on_registers(&mut self) {
        self.regs.clear();
        let [hi, lo] = self.config.simcr.to_be_bytes();
        self.regs.insert(SIMCR, hi);
        self.regs.insert(SIMCR + 1, lo);
    }

    fn check_halted(&self) -> Result<()> {
        if self.halted {
            Ok(())
        } else {
            Err(Error::TargetNotHalted)
        }
    }

    fn in_flash(&self, addr: u32) -> bool {
        (addr as usize) < self.flash.len()
    }

    fn peek(&self, addr: u32) -> Result<u8> {
        if let Some(offset) = ram_offset(addr) {
            Ok(self.ram[offset])
        } else if (REG_BASE..=REG_END).contains(&addr) {
            Ok(self.register(addr))
        } else {
            log::debug!("dummy: bus error reading 0x{:08X}", addr);
            Err(Error::BdmError)
        }
    }

    fn poke(&mut self, addr: u32, value: u8) -> Result<()> {
        if let Some(offset) = ram_offset(addr) {
            self.ram[offset] = value;
            Ok(())
        } else if (REG_BASE..=REG_END).contains(&addr) {
            self.regs.insert(addr, value);
            Ok(())
        } else {
            log::debug!("dummy: bus error writing 0x{:08X}", addr);
            Err(Error::BdmError)
        }
    }

    fn load(&mut self, size: AccessSize, addr: u32) -> Result<u32> {
        self.check_halted()?;
        self.stats.reads += 1;
        self.last_addr = addr;

        if self.in_flash(addr) {
            return Ok(match size {
                AccessSize::Byte => self.flash.read_byte(addr) as u32,
                AccessSize::Word => self.flash.read_word(addr) as u32,
                AccessSize::Long => {
                    let hi = self.flash.read_word(addr) as u32;
                    let lo = self.flash.read_word(addr + 2) as u32;
                    (hi << 16) | lo
                }
            });
        }

        let mut value = 0u32;
        for i in 0..size.width() as u32 {
            value = (value << 8) | self.peek(addr + i)? as u32;
        }
        Ok(value)
    }

    fn store(&mut self, size: AccessSize, addr: u32, value: u32) -> Result<()> {
        self.check_halted()?;
        self.stats.writes += 1;
        self.last_addr = addr;

        if self.in_flash(addr) {
            match size {
                AccessSize::Byte => self.flash.write_byte(addr, value as u8),
                AccessSize::Word => self.flash.write_word(addr, value as u16),
                AccessSize::Long => {
                    self.flash.write_word(addr, (value >> 16) as u16);
                    self.flash.write_word(addr + 2, value as u16);
                }
            }
            return Ok(());
        }

        let width = size.width();
        let bytes = value.to_be_bytes();
        for (i, byte) in bytes[4 - width..].iter().enumerate() {
            self.poke(addr + i as u32, *byte)?;
        }
        Ok(())
    }

    fn driver_loaded(&self) -> bool {
        let offset = (DRIVER_ADDR - RAM_BASE) as usize;
        self.ram[offset..offset + FLASH_DRIVER.len()] == FLASH_DRIVER[..]
    }

    /// One pass of the injected driver: erase on the first run, then one
    /// staged block per run
    fn run_driver(&mut self) {
        self.stats.driver_runs += 1;

        let result = if self.driver.runs == 0 {
            log::debug!("dummy: driver erasing flash");
            self.flash.erase_all();
            0
        } else if self.driver.cursor >= self.flash.len() {
            1
        } else {
            let offset = (DRIVER_BUFFER - RAM_BASE) as usize;
            let mut block = [0u8; DRIVER_BLOCK_LEN];
            block.copy_from_slice(&self.ram[offset..offset + DRIVER_BLOCK_LEN]);
            self.flash.program_bytes(self.driver.cursor, &block);
            self.driver.cursor += DRIVER_BLOCK_LEN;
            0
        };
        self.driver.runs += 1;
        self.adregs[0] = self.config.driver_result.unwrap_or(result);

        self.running_samples.clear();
        self.running_samples
            .extend(core::iter::repeat(true).take(self.config.driver_busy_samples));
        if self.config.driver_glitch {
            self.running_samples.extend([false, false, true]);
        }
        self.free_running = false;
        self.halted = true;
    }
}

fn ram_offset(addr: u32) -> Option<usize> {
    let offset = addr.checked_sub(RAM_BASE)? as usize;
    (offset < RAM_SIZE).then_some(offset)
}

impl Default for DummyTarget {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}

impl BdmPort for DummyTarget {
    fn read_byte(&mut self, addr: u32) -> Result<u8> {
        self.load(AccessSize::Byte, addr).map(|v| v as u8)
    }

    fn read_word(&mut self, addr: u32) -> Result<u16> {
        self.load(AccessSize::Word, addr).map(|v| v as u16)
    }

    fn read_long(&mut self, addr: u32) -> Result<u32> {
        self.load(AccessSize::Long, addr)
    }

    fn read_next(&mut self, size: AccessSize) -> Result<u32> {
        let addr = self.last_addr.wrapping_add(size.width() as u32);
        self.load(size, addr)
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> Result<()> {
        self.store(AccessSize::Byte, addr, value as u32)
    }

    fn write_word(&mut self, addr: u32, value: u16) -> Result<()> {
        self.store(AccessSize::Word, addr, value as u32)
    }

    fn write_long(&mut self, addr: u32, value: u32) -> Result<()> {
        self.store(AccessSize::Long, addr, value)
    }

    fn fill(&mut self, size: AccessSize, value: u32) -> Result<()> {
        let addr = self.last_addr.wrapping_add(size.width() as u32);
        self.store(size, addr, value)
    }

    fn read_sysreg(&mut self, reg: u8) -> Result<u32> {
        self.check_halted()?;
        Ok(self.sysregs[(reg & 0x0f) as usize])
    }

    fn write_sysreg(&mut self, reg: u8, value: u32) -> Result<()> {
        self.check_halted()?;
        if reg == SYSREG_RPC && value == DRIVER_ADDR {
            self.driver = DriverState::default();
        }
        self.sysregs[(reg & 0x0f) as usize] = value;
        Ok(())
    }

    fn read_adreg(&mut self, reg: u8) -> Result<u32> {
        self.check_halted()?;
        Ok(self.adregs[(reg & 0x0f) as usize])
    }

    fn write_adreg(&mut self, reg: u8, value: u32) -> Result<()> {
        self.check_halted()?;
        self.adregs[(reg & 0x0f) as usize] = value;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.halted = true;
        self.free_running = false;
        self.running_samples.clear();
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.power_on_registers();
        self.flash.power_on();
        self.halted = false;
        self.free_running = true;
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        self.power_on_registers();
        self.flash.power_on();
        self.halted = true;
        self.free_running = false;
        self.running_samples.clear();
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        self.check_halted()?;
        self.sysregs[SYSREG_RPC as usize] = self.sysregs[SYSREG_RPC as usize].wrapping_add(2);
        Ok(())
    }

    fn run(&mut self, pc: Option<u32>) -> Result<()> {
        self.check_halted()?;
        if let Some(pc) = pc {
            self.sysregs[SYSREG_RPC as usize] = pc;
        }

        let pc = self.sysregs[SYSREG_RPC as usize];
        if ram_offset(pc).is_some() && self.driver_loaded() {
            self.run_driver();
        } else {
            log::debug!("dummy: running from 0x{:06X}", pc);
            self.halted = false;
            self.free_running = true;
        }
        Ok(())
    }

    fn status(&mut self) -> Result<TargetStatus> {
        let running = self
            .running_samples
            .pop_front()
            .unwrap_or(self.free_running);
        let mut status = TargetStatus::POWERED;
        if running {
            status |= TargetStatus::RUNNING;
        } else {
            status |= TargetStatus::FROZEN;
        }
        Ok(status)
    }
}
