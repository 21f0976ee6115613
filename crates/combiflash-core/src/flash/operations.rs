//! Whole-chip operations on a Trionic ECU

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_io::Write;

use crate::bdm::{AccessSize, BdmPort, SYSREG_DFC, SYSREG_SFC};
use crate::chip::{FlashChip, ProgramMethod};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::protocol::{self, FlashId};

use super::context::TransferSession;
use super::driver;

/// Bytes read before each write to the dump sink
pub const DUMP_BLOCK_LEN: usize = 1024;

/// Word-method progress is reported every this many bytes
pub const PROGRESS_STEP: u32 = 0x80;

/// Value of an erased word, never programmed
const ERASED_WORD: u16 = 0xFFFF;

/// Callback for progress reporting
pub trait Progress {
    /// Called when starting to read the flash
    fn reading(&mut self, total_bytes: u32);

    /// Called to update read progress
    fn read_progress(&mut self, bytes_read: u32);

    /// Called when starting the erase
    fn erasing(&mut self, total_bytes: u32);

    /// Called when starting to program
    fn writing(&mut self, total_bytes: u32);

    /// Called to update program progress
    fn write_progress(&mut self, bytes_written: u32);

    /// Called when the operation is complete
    fn complete(&mut self);
}

/// A no-op progress reporter
pub struct NoProgress;

impl Progress for NoProgress {
    fn reading(&mut self, _total_bytes: u32) {}
    fn read_progress(&mut self, _bytes_read: u32) {}
    fn erasing(&mut self, _total_bytes: u32) {}
    fn writing(&mut self, _total_bytes: u32) {}
    fn write_progress(&mut self, _bytes_written: u32) {}
    fn complete(&mut self) {}
}

/// Host-side request to stop a long dump or program
///
/// Polled once per word or block; an abort ends the loop early and the chip
/// is still reset on the way out.
pub trait AbortSignal {
    /// Whether the operation should stop
    fn is_aborted(&self) -> bool;
}

/// Abort signal that never fires
pub struct NeverAbort;

impl AbortSignal for NeverAbort {
    fn is_aborted(&self) -> bool {
        false
    }
}

impl AbortSignal for AtomicBool {
    fn is_aborted(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// Dump the whole flash to `sink`
///
/// The chip is identified and put in read-array mode, then read as big
/// endian long words: one addressed read at 0 followed by "continue"
/// reads. Returns the identified chip.
pub fn dump<P, C, W, A, R>(
    port: &mut P,
    clock: &C,
    sink: &mut W,
    abort: &A,
    progress: &mut R,
) -> Result<FlashId>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
    W: Write + ?Sized,
    A: AbortSignal + ?Sized,
    R: Progress + ?Sized,
{
    let id = protocol::identify(port)?;
    let chip = id.chip;
    chip.family.reset(port)?;

    let size = chip.flash_size();
    let mut session = TransferSession::new(clock, 0, size)?;
    progress.reading(size);

    let result = read_blocks(port, sink, abort, progress, &mut session);

    // Clears the BDM pipeline after the run of continue reads
    let _ = port.read_long(session.current);

    if result.is_err() {
        let _ = chip.family.reset(port);
    }
    result?;

    sink.flush().map_err(|_| Error::IoError)?;
    log::info!(
        "dump: 0x{:X} bytes in {} ms",
        size,
        session.elapsed_ms(clock)
    );
    progress.complete();
    Ok(id)
}

fn read_blocks<P, W, A, R>(
    port: &mut P,
    sink: &mut W,
    abort: &A,
    progress: &mut R,
    session: &mut TransferSession,
) -> Result<()>
where
    P: BdmPort + ?Sized,
    W: Write + ?Sized,
    A: AbortSignal + ?Sized,
    R: Progress + ?Sized,
{
    let mut block = [0u8; DUMP_BLOCK_LEN];
    let mut first = true;

    while !session.is_done() {
        let len = session.next_len(DUMP_BLOCK_LEN);
        for long in block[..len].chunks_exact_mut(4) {
            if abort.is_aborted() {
                log::warn!("dump: aborted at 0x{:06X}", session.current);
                return Err(Error::Aborted);
            }
            let value = if first {
                first = false;
                port.read_long(session.current)?
            } else {
                port.read_next(AccessSize::Long)?
            };
            long.copy_from_slice(&value.to_be_bytes());
        }
        sink.write_all(&block[..len]).map_err(|_| Error::IoError)?;
        session.advance(len as u32);
        progress.read_progress(session.current);
    }
    Ok(())
}

/// Check that `image` fits `chip`
///
/// The image must be exactly as large as the flash and start with the
/// initial stack pointer of the ECU generation.
pub fn validate_image(chip: &FlashChip, image: &[u8]) -> Result<()> {
    let expected = chip.flash_size();
    if image.len() != expected as usize {
        return Err(Error::ImageSizeMismatch {
            expected,
            found: image.len() as u32,
        });
    }

    let found = u32::from_be_bytes([image[0], image[1], image[2], image[3]]);
    if found != chip.signature() {
        return Err(Error::SignatureMismatch {
            expected: chip.signature(),
            found,
        });
    }
    Ok(())
}

/// Erase and program a whole image
///
/// The image is checked before anything is erased. The chip is reset
/// before returning, whatever the outcome.
pub fn program<P, C, A, R>(
    port: &mut P,
    clock: &C,
    image: &[u8],
    abort: &A,
    progress: &mut R,
) -> Result<FlashId>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
    A: AbortSignal + ?Sized,
    R: Progress + ?Sized,
{
    let id = protocol::identify(port)?;
    let chip = id.chip;
    chip.family.reset(port)?;
    validate_image(chip, image)?;

    let mut session = TransferSession::new(clock, 0, chip.flash_size())?;
    let result = match chip.method {
        ProgramMethod::Driver => {
            program_with_driver(port, clock, chip, image, abort, progress, &mut session)
        }
        ProgramMethod::Word => {
            program_by_word(port, clock, chip, image, abort, progress, &mut session)
        }
    };

    let reset = chip.family.reset(port);
    result?;
    reset?;

    log::info!("program: done in {} ms", session.elapsed_ms(clock));
    progress.complete();
    Ok(id)
}

fn program_with_driver<P, C, A, R>(
    port: &mut P,
    clock: &C,
    chip: &FlashChip,
    image: &[u8],
    abort: &A,
    progress: &mut R,
    session: &mut TransferSession,
) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
    A: AbortSignal + ?Sized,
    R: Progress + ?Sized,
{
    driver::load_driver(port)?;

    log::info!("program: erasing {} with the flash driver", chip.name);
    progress.erasing(chip.flash_size());
    driver::erase_with_driver(port, clock)?;
    log::info!("program: erase took {} ms", session.elapsed_ms(clock));

    progress.writing(chip.flash_size());
    for block in image.chunks(driver::DRIVER_BLOCK_LEN) {
        if abort.is_aborted() {
            return Err(Error::Aborted);
        }
        if let Err(e) = driver::program_block(port, clock, block) {
            log::warn!("program: block at 0x{:06X} failed: {}", session.current, e);
            break;
        }
        session.advance(block.len() as u32);
        progress.write_progress(session.current);
    }

    if !session.is_done() {
        return Err(Error::ProgramFailed {
            addr: session.current,
        });
    }
    Ok(())
}

fn program_by_word<P, C, A, R>(
    port: &mut P,
    clock: &C,
    chip: &FlashChip,
    image: &[u8],
    abort: &A,
    progress: &mut R,
    session: &mut TransferSession,
) -> Result<()>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
    A: AbortSignal + ?Sized,
    R: Progress + ?Sized,
{
    if !chip.programmable {
        return Err(Error::ChipNotSupported);
    }

    let size = chip.flash_size();
    if chip.needs_erase {
        log::info!("program: erasing {}", chip.name);
        progress.erasing(size);
        chip.family.erase(port, clock, 0, size)?;
    } else {
        log::info!("program: {} needs no erase", chip.name);
    }

    progress.writing(size);
    for word in image.chunks_exact(2) {
        if abort.is_aborted() {
            return Err(Error::Aborted);
        }
        let value = u16::from_be_bytes([word[0], word[1]]);
        if value != ERASED_WORD
            && chip
                .family
                .program(port, clock, session.current, value)
                .is_err()
        {
            break;
        }
        session.advance(2);
        if session.current % PROGRESS_STEP == 0 {
            progress.write_progress(session.current);
        }
    }

    if !session.is_done() {
        log::warn!("program: could not program 0x{:06X}", session.current);
        return Err(Error::ProgramFailed {
            addr: session.current,
        });
    }
    Ok(())
}

/// Erase the whole flash
///
/// Uses the flash driver for chips programmed through it and the BDM erase
/// routine of the family otherwise. Chips that need no erase are left
/// untouched.
pub fn erase<P, C, R>(port: &mut P, clock: &C, progress: &mut R) -> Result<FlashId>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
    R: Progress + ?Sized,
{
    let id = protocol::identify(port)?;
    let chip = id.chip;
    chip.family.reset(port)?;

    if !chip.needs_erase {
        log::info!("erase: {} needs no erase", chip.name);
        progress.complete();
        return Ok(id);
    }

    progress.erasing(chip.flash_size());
    let result = match chip.method {
        ProgramMethod::Driver => {
            driver::load_driver(port).and_then(|()| driver::erase_with_driver(port, clock))
        }
        ProgramMethod::Word => chip.family.erase(port, clock, 0, chip.flash_size()),
    };
    let reset = chip.family.reset(port);
    result?;
    reset?;

    progress.complete();
    Ok(id)
}

/// Module configuration register of the system integration module
pub const SIMCR: u32 = 0x00FF_FA00;

/// SIMCR bits that are set on an MC68377 (T8) after reset
pub const SIMCR_T8_MASK: u16 = 0x7E4F;

/// CPU family found by [`prepare_ecu`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcuKind {
    /// MC68332 based Trionic 5 or Trionic 7
    T5OrT7,
    /// MC68377 based Trionic 8
    T8,
}

impl core::fmt::Display for EcuKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::T5OrT7 => f.write_str("Trionic 5/7"),
            Self::T8 => f.write_str("Trionic 8"),
        }
    }
}

/// Halt the ECU and set up its CPU for flashing
///
/// Restarts the CPU into background mode, enables supervisor access and
/// tells a T8 apart from a T5/T7 by its SIMCR. Then sets the clock,
/// disables the watchdog, configures the chip selects, switches on the
/// programming voltage and maps the internal RAM at 0x100000 where the
/// flash driver runs.
pub fn prepare_ecu<P, C>(port: &mut P, clock: &C) -> Result<EcuKind>
where
    P: BdmPort + ?Sized,
    C: Clock + ?Sized,
{
    port.restart()?;
    port.write_sysreg(SYSREG_SFC, 0x05)?;
    port.write_sysreg(SYSREG_DFC, 0x05)?;

    let simcr = port.read_word(SIMCR)?;
    log::debug!("prep: SIMCR = 0x{:04X}", simcr);

    if simcr & SIMCR_T8_MASK == SIMCR_T8_MASK {
        log::info!("prep: found a Trionic 8 ECU");
        // MDR: stop system protection
        port.write_byte(0xFF_FA04, 0x01)?;
        // SYNCR: multiplier first, divider once the PLL has settled
        port.write_word(0xFF_FA08, 0x6908)?;
        clock.delay_ms(100);
        port.write_word(0xFF_FA08, 0x6808)?;
        // SYPCR: watchdog off
        port.write_word(0xFF_FA50, 0x0000)?;
        // DPTRAM at 0x100000
        port.write_word(0xFF_F684, 0x1000)?;
        return Ok(EcuKind::T8);
    }

    log::info!("prep: found a Trionic 5 or 7 ECU");
    // SYNCR: 16.78 MHz
    port.write_word(0xFF_FA04, 0x7F00)?;
    // SYPCR: watchdog and monitors off
    port.write_byte(0xFF_FA21, 0x00)?;
    // CSPAR0
    port.write_word(0xFF_FA44, 0x3FFF)?;
    // CSBARBT, CSORBT
    port.write_word(0xFF_FA48, 0x0007)?;
    port.fill(AccessSize::Word, 0x6870)?;
    // CSBAR1, CSOR1, CSBAR2, CSOR2
    port.write_word(0xFF_FA50, 0x0007)?;
    port.fill(AccessSize::Word, 0x3030)?;
    port.fill(AccessSize::Word, 0x0007)?;
    port.fill(AccessSize::Word, 0x5030)?;
    // PORTQS, DDRQS: programming voltage on
    port.write_word(0xFF_FC14, 0x0040)?;
    port.write_byte(0xFF_FC17, 0x40)?;
    clock.delay_ms(10);
    // TRAMBAR: internal RAM at 0x100000
    port.write_word(0xFF_FB04, 0x1000)?;
    Ok(EcuKind::T5OrT7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{find_by_code, AMD28F512, AMD29BL802C, AMD29F010};
    use crate::protocol::mock::{MockClock, MockPort, Op};
    use std::vec;
    use std::vec::Vec;

    struct VecSink(Vec<u8>);

    impl embedded_io::ErrorType for VecSink {
        type Error = core::convert::Infallible;
    }

    impl Write for VecSink {
        fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> core::result::Result<(), Self::Error> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        written: Vec<u32>,
        completed: bool,
    }

    impl Progress for Recorder {
        fn reading(&mut self, _total_bytes: u32) {}
        fn read_progress(&mut self, _bytes_read: u32) {}
        fn erasing(&mut self, _total_bytes: u32) {}
        fn writing(&mut self, _total_bytes: u32) {}
        fn write_progress(&mut self, bytes_written: u32) {
            self.written.push(bytes_written);
        }
        fn complete(&mut self) {
            self.completed = true;
        }
    }

    fn image_for(code: u8) -> Vec<u8> {
        let chip = find_by_code(code).unwrap();
        let mut image = vec![0xFF; chip.flash_size() as usize];
        image[..4].copy_from_slice(&chip.signature().to_be_bytes());
        image
    }

    #[test]
    fn test_validate_image() {
        let chip = find_by_code(AMD29F010).unwrap();
        let mut image = image_for(AMD29F010);
        assert!(validate_image(chip, &image).is_ok());

        image[0] = 0x00;
        assert_eq!(
            validate_image(chip, &image),
            Err(Error::SignatureMismatch {
                expected: 0xFFFF_F7FC,
                found: 0x00FF_F7FC
            })
        );

        let short = image_for(AMD28F512);
        assert_eq!(
            validate_image(chip, &short),
            Err(Error::ImageSizeMismatch {
                expected: 0x40000,
                found: 0x20000
            })
        );
    }

    #[test]
    fn test_program_rejects_image_before_erase() {
        let mut port = MockPort::new();
        port.long_reads.push_back(0x0101_2020);
        let clock = MockClock::new(1);
        let image = image_for(AMD28F512);
        assert!(matches!(
            program(&mut port, &clock, &image, &NeverAbort, &mut NoProgress),
            Err(Error::ImageSizeMismatch { .. })
        ));
        // id sequence + id read + reset, nothing else
        assert_eq!(port.ops.len(), 3 + 1 + 3);
    }

    #[test]
    fn test_dump_reads_big_endian() {
        let mut port = MockPort::new();
        port.long_reads.push_back(0x0101_2525);
        // AM28F512: 0x20000 bytes = 0x8000 longs
        port.long_reads.extend((0..0x8000u32).map(|i| i.wrapping_mul(0x0101_0101)));
        let clock = MockClock::new(1);
        let mut sink = VecSink(Vec::new());
        let id = dump(&mut port, &clock, &mut sink, &NeverAbort, &mut NoProgress).unwrap();

        assert_eq!(id.code, AMD28F512);
        assert_eq!(sink.0.len(), 0x20000);
        assert_eq!(&sink.0[4..8], &[0x01, 0x01, 0x01, 0x01]);
        // identify, AM28 reset, addressed read at 0, continue reads, dummy read
        assert_eq!(port.ops[6], Op::ReadLong(0));
        assert_eq!(port.ops[7], Op::ReadNext(AccessSize::Long));
        assert_eq!(port.ops.last(), Some(&Op::ReadLong(0x20000)));
    }

    #[test]
    fn test_dump_abort_resets_chip() {
        let mut port = MockPort::new();
        port.long_reads.push_back(0x0101_2020);
        let clock = MockClock::new(1);
        let mut sink = VecSink(Vec::new());
        let abort = AtomicBool::new(true);
        assert_eq!(
            dump(&mut port, &clock, &mut sink, &abort, &mut NoProgress),
            Err(Error::Aborted)
        );
        assert!(sink.0.is_empty());
        assert_eq!(port.ops.last(), Some(&Op::WriteWord(0xaaaa, 0xf0f0)));
    }

    #[test]
    fn test_program_word_skips_erased_words() {
        let mut port = MockPort::new();
        port.long_reads.push_back(0x0101_2020);
        // Erase poll sees 0xFFFF right away, then the only programmed word
        // (0xF7FC at 2, word 0 is 0xFFFF) verifies
        port.word_reads.extend([0xFFFF, 0xF7FC]);
        let clock = MockClock::new(1);
        let image = image_for(AMD29F010);
        let mut progress = Recorder::default();
        program(&mut port, &clock, &image, &NeverAbort, &mut progress).unwrap();

        let programmed: Vec<_> = port
            .ops
            .iter()
            .filter(|op| **op == Op::WriteWord(0xaaaa, 0xa0a0))
            .collect();
        assert_eq!(programmed.len(), 1);
        assert!(!port.ops.contains(&Op::WriteWord(0, 0xFFFF)));
        assert!(port.ops.contains(&Op::WriteWord(2, 0xF7FC)));
        assert_eq!(progress.written.len(), 0x40000 / PROGRESS_STEP as usize);
        assert!(progress.completed);
    }

    #[test]
    fn test_program_word_failure_reports_address() {
        let mut port = MockPort::new();
        port.long_reads.push_back(0x0101_2020);
        port.word_reads.push_back(0xFFFF);
        // The first programmed word never verifies
        port.default_word = 0x0000;
        let clock = MockClock::new(1);
        let image = image_for(AMD29F010);
        assert_eq!(
            program(&mut port, &clock, &image, &NeverAbort, &mut NoProgress),
            Err(Error::ProgramFailed { addr: 2 })
        );
        assert_eq!(port.ops.last(), Some(&Op::WriteWord(0xaaaa, 0xf0f0)));
    }

    #[test]
    fn test_program_with_driver() {
        let mut port = MockPort::new();
        port.long_reads.push_back(0x0101_8181);
        let clock = MockClock::new(1);
        let image = image_for(AMD29BL802C);
        let mut progress = Recorder::default();
        program(&mut port, &clock, &image, &NeverAbort, &mut progress).unwrap();

        let runs = port.ops.iter().filter(|op| **op == Op::Run(None)).count();
        // One erase run plus one run per 256-byte block
        assert_eq!(runs, 1 + 0x100000 / driver::DRIVER_BLOCK_LEN);
        assert_eq!(progress.written.last(), Some(&0x100000));
    }

    #[test]
    fn test_program_with_driver_failure() {
        let mut port = MockPort::new();
        port.long_reads.push_back(0x0101_8181);
        port.d0 = 1;
        let clock = MockClock::new(1);
        let image = image_for(AMD29BL802C);
        assert_eq!(
            program(&mut port, &clock, &image, &NeverAbort, &mut NoProgress),
            Err(Error::DriverFailed { result: 1 })
        );
    }

    #[test]
    fn test_erase_am28_range() {
        let mut port = MockPort::new();
        port.long_reads.push_back(0x0101_2525);
        port.default_byte = 0xFF;
        let clock = MockClock::new(1);
        let id = erase(&mut port, &clock, &mut NoProgress).unwrap();
        assert_eq!(id.code, AMD28F512);
        // every word zeroed before the erase pulse
        let zeroed = port.writes().filter(|op| matches!(op, Op::WriteWord(_, 0x0000))).count();
        assert!(zeroed >= 0x20000 / 2);
    }

    #[test]
    fn test_prepare_t8() {
        let mut port = MockPort::new();
        port.word_reads.push_back(0x7E4F);
        let clock = MockClock::new(1);
        assert_eq!(prepare_ecu(&mut port, &clock).unwrap(), EcuKind::T8);
        assert_eq!(port.ops[0], Op::Restart);
        assert_eq!(port.ops[1], Op::WriteSysreg(SYSREG_SFC, 5));
        assert!(port.ops.contains(&Op::WriteWord(0xFF_F684, 0x1000)));
        assert!(clock.slept_us.get() >= 100_000);
    }

    #[test]
    fn test_prepare_t5() {
        let mut port = MockPort::new();
        port.word_reads.push_back(0x00CF);
        let clock = MockClock::new(1);
        assert_eq!(prepare_ecu(&mut port, &clock).unwrap(), EcuKind::T5OrT7);
        assert!(port.ops.contains(&Op::Fill(AccessSize::Word, 0x5030)));
        assert_eq!(port.ops.last(), Some(&Op::WriteWord(0xFF_FB04, 0x1000)));
    }
}
