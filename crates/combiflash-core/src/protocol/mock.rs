//! Recording BDM port for the algorithm tests

use crate::bdm::{AccessSize, BdmPort, TargetStatus};
use crate::clock::Clock;
use crate::error::{Error, Result};
use core::cell::Cell;
use std::collections::VecDeque;
use std::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    ReadByte(u32),
    ReadWord(u32),
    ReadLong(u32),
    ReadNext(AccessSize),
    WriteByte(u32, u8),
    WriteWord(u32, u16),
    WriteLong(u32, u32),
    Fill(AccessSize, u32),
    WriteSysreg(u8, u32),
    ReadAdreg(u8),
    Run(Option<u32>),
    Restart,
}

/// Replays queued reads and records every access
#[derive(Debug, Default)]
pub struct MockPort {
    pub ops: Vec<Op>,
    pub byte_reads: VecDeque<u8>,
    pub word_reads: VecDeque<u16>,
    pub long_reads: VecDeque<u32>,
    pub running: VecDeque<bool>,
    pub stuck_running: bool,
    pub default_byte: u8,
    pub default_word: u16,
    pub d0: u32,
    pub fail_write_at: Option<u32>,
    pub fail_write_value: Option<u16>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_write(&self, addr: u32, value: u16) -> Result<()> {
        if self.fail_write_at == Some(addr) || self.fail_write_value == Some(value) {
            Err(Error::BdmError)
        } else {
            Ok(())
        }
    }

    pub fn writes(&self) -> impl Iterator<Item = &Op> {
        self.ops.iter().filter(|op| {
            matches!(op, Op::WriteByte(..) | Op::WriteWord(..) | Op::WriteLong(..))
        })
    }
}

impl BdmPort for MockPort {
    fn read_byte(&mut self, addr: u32) -> Result<u8> {
        self.ops.push(Op::ReadByte(addr));
        Ok(self.byte_reads.pop_front().unwrap_or(self.default_byte))
    }

    fn read_word(&mut self, addr: u32) -> Result<u16> {
        self.ops.push(Op::ReadWord(addr));
        Ok(self.word_reads.pop_front().unwrap_or(self.default_word))
    }

    fn read_long(&mut self, addr: u32) -> Result<u32> {
        self.ops.push(Op::ReadLong(addr));
        Ok(self.long_reads.pop_front().unwrap_or(0))
    }

    fn read_next(&mut self, size: AccessSize) -> Result<u32> {
        self.ops.push(Op::ReadNext(size));
        Ok(self.long_reads.pop_front().unwrap_or(0))
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> Result<()> {
        self.ops.push(Op::WriteByte(addr, value));
        self.check_write(addr, value as u16)
    }

    fn write_word(&mut self, addr: u32, value: u16) -> Result<()> {
        self.ops.push(Op::WriteWord(addr, value));
        self.check_write(addr, value)
    }

    fn write_long(&mut self, addr: u32, value: u32) -> Result<()> {
        self.ops.push(Op::WriteLong(addr, value));
        self.check_write(addr, value as u16)
    }

    fn fill(&mut self, size: AccessSize, value: u32) -> Result<()> {
        self.ops.push(Op::Fill(size, value));
        Ok(())
    }

    fn read_sysreg(&mut self, _reg: u8) -> Result<u32> {
        Ok(0)
    }

    fn write_sysreg(&mut self, reg: u8, value: u32) -> Result<()> {
        self.ops.push(Op::WriteSysreg(reg, value));
        Ok(())
    }

    fn read_adreg(&mut self, reg: u8) -> Result<u32> {
        self.ops.push(Op::ReadAdreg(reg));
        Ok(self.d0)
    }

    fn write_adreg(&mut self, _reg: u8, _value: u32) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        self.ops.push(Op::Restart);
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        Ok(())
    }

    fn run(&mut self, pc: Option<u32>) -> Result<()> {
        self.ops.push(Op::Run(pc));
        Ok(())
    }

    fn status(&mut self) -> Result<TargetStatus> {
        let mut status = TargetStatus::POWERED;
        if self.running.pop_front().unwrap_or(self.stuck_running) {
            status |= TargetStatus::RUNNING;
        } else {
            status |= TargetStatus::FROZEN;
        }
        Ok(status)
    }
}

/// Clock that moves forward by a fixed step on every read
pub struct MockClock {
    now: Cell<u64>,
    step: u64,
    pub slept_us: Cell<u64>,
}

impl MockClock {
    pub fn new(step: u64) -> Self {
        Self {
            now: Cell::new(0),
            step,
            slept_us: Cell::new(0),
        }
    }
}

impl Clock for MockClock {
    fn now_us(&self) -> u64 {
        let now = self.now.get() + self.step;
        self.now.set(now);
        now
    }

    fn delay_us(&self, us: u32) {
        self.now.set(self.now.get() + us as u64);
        self.slept_us.set(self.slept_us.get() + us as u64);
    }
}
