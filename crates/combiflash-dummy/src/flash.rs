//! In-memory model of a pair of 8-bit flash chips on a 16-bit bus
//!
//! The even byte of every word lives in the "high" chip and the odd byte in
//! the "low" chip. AM29 pairs are always commanded together with word
//! writes. AM28 pairs are modelled per chip ("lane") because the program
//! algorithm masks one lane out once it verifies.

use alloc::vec;
use alloc::vec::Vec;

use combiflash_core::chip::FlashFamily;

/// Timing behaviour of the emulated chips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashTiming {
    /// Status reads an AM29 word program stays busy for
    pub program_busy_reads: u32,
    /// Status reads an AM29 chip erase stays busy for
    pub erase_busy_reads: u32,
    /// Pulses an AM28 byte needs before it takes the programmed value
    pub program_pulses: u8,
    /// Pulses an AM28 chip needs before it reads back erased
    pub erase_pulses: u16,
}

impl Default for FlashTiming {
    fn default() -> Self {
        Self {
            program_busy_reads: 1,
            erase_busy_reads: 3,
            program_pulses: 1,
            erase_pulses: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Am29State {
    Idle,
    Unlock1,
    Unlock2,
    Program,
    EraseSetup,
    EraseUnlock1,
    EraseUnlock2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneState {
    Read,
    Identifier,
    ProgramSetup,
    ProgramVerify,
    EraseSetup,
    EraseVerify,
}

#[derive(Debug, Clone, Copy)]
struct Lane {
    state: LaneState,
    erase_pulses: u16,
    program_addr: u32,
    program_pulses: u8,
}

impl Lane {
    const fn new() -> Self {
        Self {
            state: LaneState::Read,
            erase_pulses: 0,
            program_addr: u32::MAX,
            program_pulses: 0,
        }
    }
}

/// Counters for what the chips were asked to do
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlashStats {
    /// Program operations (AM29 programs, AM28 data writes)
    pub program_pulses: usize,
    /// Erase operations (AM29 chip erases, AM28 erase pulses per lane)
    pub erase_pulses: usize,
}

/// Flash array with its command state machine
#[derive(Debug)]
pub struct FlashArray {
    data: Vec<u8>,
    family: FlashFamily,
    make: u8,
    code: u8,
    timing: FlashTiming,
    am29: Am29State,
    autoselect: bool,
    busy_reads: u32,
    lanes: [Lane; 2],
    stats: FlashStats,
}

impl FlashArray {
    /// Create an erased array
    pub fn new(family: FlashFamily, make: u8, code: u8, size: usize, timing: FlashTiming) -> Self {
        Self {
            data: vec![0xFF; size],
            family,
            make,
            code,
            timing,
            am29: Am29State::Idle,
            autoselect: false,
            busy_reads: 0,
            lanes: [Lane::new(); 2],
            stats: FlashStats::default(),
        }
    }

    /// Array contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable array contents, bypassing the chip
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the array has no storage
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Operation counters
    pub fn stats(&self) -> FlashStats {
        self.stats
    }

    /// Power-on state: every chip back in read-array mode
    pub fn power_on(&mut self) {
        self.am29 = Am29State::Idle;
        self.autoselect = false;
        self.busy_reads = 0;
        self.lanes = [Lane::new(); 2];
    }

    /// Chip erase as done by the flash driver
    pub fn erase_all(&mut self) {
        self.data.fill(0xFF);
        self.stats.erase_pulses += 1;
    }

    /// Program bytes as done by the flash driver
    pub fn program_bytes(&mut self, addr: usize, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            if let Some(cell) = self.data.get_mut(addr + i) {
                *cell &= *byte;
            }
        }
    }

    fn array_word(&self, addr: u32) -> u16 {
        let a = (addr & !1) as usize;
        u16::from_be_bytes([
            self.data.get(a).copied().unwrap_or(0xFF),
            self.data.get(a + 1).copied().unwrap_or(0xFF),
        ])
    }

    fn id_byte(&self, addr: u32) -> u8 {
        match addr >> 1 {
            0 => self.make,
            1 => self.code,
            _ => 0x00,
        }
    }

    /// Read a word through the chip
    pub fn read_word(&mut self, addr: u32) -> u16 {
        match self.family {
            FlashFamily::Am29 => self.am29_read(addr),
            FlashFamily::Am28 => {
                let hi = self.am28_read(addr & !1);
                let lo = self.am28_read(addr | 1);
                u16::from_be_bytes([hi, lo])
            }
        }
    }

    /// Read a byte through the chip
    pub fn read_byte(&mut self, addr: u32) -> u8 {
        match self.family {
            FlashFamily::Am29 => {
                let [hi, lo] = self.am29_read(addr).to_be_bytes();
                if addr & 1 == 0 {
                    hi
                } else {
                    lo
                }
            }
            FlashFamily::Am28 => self.am28_read(addr),
        }
    }

    /// Write a word to the chip
    pub fn write_word(&mut self, addr: u32, value: u16) {
        match self.family {
            FlashFamily::Am29 => self.am29_write(addr, value),
            FlashFamily::Am28 => {
                let [hi, lo] = value.to_be_bytes();
                self.am28_write(addr & !1, hi);
                self.am28_write(addr | 1, lo);
            }
        }
    }

    /// Write a byte to the chip
    ///
    /// AM29 pairs only take word commands; a byte write is dropped.
    pub fn write_byte(&mut self, addr: u32, value: u8) {
        match self.family {
            FlashFamily::Am29 => log::trace!("dummy: byte write to AM29 flash ignored"),
            FlashFamily::Am28 => self.am28_write(addr, value),
        }
    }

    fn am29_read(&mut self, addr: u32) -> u16 {
        let word = self.array_word(addr);
        if self.busy_reads > 0 {
            self.busy_reads -= 1;
            // DQ7 reads inverted while an embedded algorithm runs
            return word ^ 0x8080;
        }
        if self.autoselect {
            let id = self.id_byte(addr);
            return u16::from_be_bytes([id, id]);
        }
        word
    }

    fn am29_write(&mut self, addr: u32, value: u16) {
        use Am29State::*;

        if self.am29 != Program && value == 0xf0f0 {
            self.autoselect = false;
            self.am29 = Idle;
            return;
        }

        self.am29 = match (self.am29, addr, value) {
            (Idle, 0xaaaa, 0xaaaa) => Unlock1,
            (Unlock1, 0x5554, 0x5555) => Unlock2,
            (Unlock2, 0xaaaa, 0xa0a0) => Program,
            (Unlock2, 0xaaaa, 0x8080) => EraseSetup,
            (Unlock2, 0xaaaa, 0x9090) => {
                self.autoselect = true;
                Idle
            }
            (EraseSetup, 0xaaaa, 0xaaaa) => EraseUnlock1,
            (EraseUnlock1, 0x5554, 0x5555) => EraseUnlock2,
            (EraseUnlock2, 0xaaaa, 0x1010) => {
                self.data.fill(0xFF);
                self.busy_reads = self.timing.erase_busy_reads;
                self.stats.erase_pulses += 1;
                Idle
            }
            (Program, addr, value) => {
                let [hi, lo] = value.to_be_bytes();
                self.program_bytes((addr & !1) as usize, &[hi, lo]);
                self.busy_reads = self.timing.program_busy_reads;
                self.stats.program_pulses += 1;
                Idle
            }
            _ => Idle,
        };
    }

    fn am28_read(&mut self, addr: u32) -> u8 {
        let lane = &self.lanes[(addr & 1) as usize];
        match lane.state {
            LaneState::Identifier => self.id_byte(addr),
            _ => self.data.get(addr as usize).copied().unwrap_or(0xFF),
        }
    }

    fn am28_write(&mut self, addr: u32, value: u8) {
        let lane_index = (addr & 1) as usize;
        let state = self.lanes[lane_index].state;

        let next = match state {
            LaneState::ProgramSetup => {
                self.am28_program(lane_index, addr, value);
                LaneState::Read
            }
            LaneState::EraseSetup if value == 0x20 => {
                self.am28_erase_pulse(lane_index);
                LaneState::Read
            }
            LaneState::EraseSetup => LaneState::Read,
            _ => match value {
                0x00 | 0xFF => LaneState::Read,
                0x20 => LaneState::EraseSetup,
                0x40 => LaneState::ProgramSetup,
                0x90 => LaneState::Identifier,
                0xA0 => LaneState::EraseVerify,
                0xC0 => LaneState::ProgramVerify,
                _ => state,
            },
        };
        self.lanes[lane_index].state = next;
    }

    fn am28_program(&mut self, lane_index: usize, addr: u32, value: u8) {
        self.stats.program_pulses += 1;
        let lane = &mut self.lanes[lane_index];
        if lane.program_addr == addr {
            lane.program_pulses = lane.program_pulses.saturating_add(1);
        } else {
            lane.program_addr = addr;
            lane.program_pulses = 1;
        }
        if lane.program_pulses >= self.timing.program_pulses {
            lane.program_addr = u32::MAX;
            if let Some(cell) = self.data.get_mut(addr as usize) {
                *cell &= value;
            }
        }
    }

    fn am28_erase_pulse(&mut self, lane_index: usize) {
        self.stats.erase_pulses += 1;
        let lane = &mut self.lanes[lane_index];
        lane.erase_pulses += 1;
        if lane.erase_pulses >= self.timing.erase_pulses {
            lane.erase_pulses = 0;
            for byte in self.data.iter_mut().skip(lane_index).step_by(2) {
                *byte = 0xFF;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn am29() -> FlashArray {
        FlashArray::new(FlashFamily::Am29, 0x01, 0x20, 0x400, FlashTiming::default())
    }

    fn am28() -> FlashArray {
        FlashArray::new(FlashFamily::Am28, 0x01, 0xA7, 0x400, FlashTiming::default())
    }

    #[test]
    fn test_am29_program_needs_unlock() {
        let mut flash = am29();
        flash.write_word(0x10, 0x1234);
        assert_eq!(flash.read_word(0x10), 0xFFFF);

        flash.write_word(0xaaaa, 0xaaaa);
        flash.write_word(0x5554, 0x5555);
        flash.write_word(0xaaaa, 0xa0a0);
        flash.write_word(0x10, 0x1234);
        // busy for one read
        assert_eq!(flash.read_word(0x10), 0x1234 ^ 0x8080);
        assert_eq!(flash.read_word(0x10), 0x1234);
    }

    #[test]
    fn test_am29_autoselect() {
        let mut flash = am29();
        flash.write_word(0xaaaa, 0xaaaa);
        flash.write_word(0x5554, 0x5555);
        flash.write_word(0xaaaa, 0x9090);
        assert_eq!(flash.read_word(0), 0x0101);
        assert_eq!(flash.read_word(2), 0x2020);
        flash.write_word(0xaaaa, 0xaaaa);
        flash.write_word(0x5554, 0x5555);
        flash.write_word(0xaaaa, 0xf0f0);
        assert_eq!(flash.read_word(0), 0xFFFF);
    }

    #[test]
    fn test_am28_identifier_and_reset() {
        let mut flash = am28();
        flash.write_word(0xaaaa, 0xaaaa);
        flash.write_word(0x5554, 0x5555);
        flash.write_word(0xaaaa, 0x9090);
        assert_eq!(flash.read_word(0), 0x0101);
        assert_eq!(flash.read_word(2), 0xA7A7);
        flash.write_word(0, 0xffff);
        flash.write_word(0, 0xffff);
        assert_eq!(flash.read_word(0), 0xFFFF);
    }

    #[test]
    fn test_am28_program_per_lane() {
        let mut flash = am28();
        // Program only the high lane
        flash.write_word(0x20, 0x4000);
        flash.write_word(0x20, 0x12FF);
        assert_eq!(flash.read_word(0x20), 0x12FF);
        assert_eq!(flash.stats().program_pulses, 1);
    }

    #[test]
    fn test_am28_erase_pulses() {
        let mut flash = am28();
        flash.data_mut().fill(0x00);
        flash.write_byte(0x0, 0x20);
        flash.write_byte(0x0, 0x20);
        assert_eq!(flash.read_byte(0x0), 0x00);
        flash.write_byte(0x0, 0x20);
        flash.write_byte(0x0, 0x20);
        // the high chip is erased, the low one was never pulsed
        assert_eq!(flash.read_byte(0x0), 0xFF);
        assert_eq!(flash.read_byte(0x2), 0xFF);
        assert_eq!(flash.read_byte(0x1), 0x00);
    }
}
