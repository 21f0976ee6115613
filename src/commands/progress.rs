//! Progress reporting with indicatif

use combiflash_core::flash::Progress;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a progress bar with a phase label
fn create_progress_bar_with_phase(
    total: u64,
    phase: &str,
) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Create a standard spinner style
fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?)
}

/// Progress reporter using indicatif progress bars
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
    phase: &'static str,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
            phase: "",
        }
    }

    fn create_bar(&mut self, total: u64, phase: &'static str) {
        self.phase = phase;
        let pb = self.multi.add(
            create_progress_bar_with_phase(total, phase)
                .unwrap_or_else(|_| ProgressBar::new(total)),
        );
        self.current_bar = Some(pb);
    }

    fn create_spinner(&mut self, message: String) {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(create_spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        self.current_bar = Some(pb);
    }

    fn finish(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(format!("{} complete", self.phase));
        }
    }

    fn set_position(&self, pos: u32) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(pos.into());
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for IndicatifProgress {
    fn reading(&mut self, total_bytes: u32) {
        self.finish();
        self.create_bar(total_bytes.into(), "Reading");
    }

    fn read_progress(&mut self, bytes_read: u32) {
        self.set_position(bytes_read);
    }

    fn erasing(&mut self, total_bytes: u32) {
        self.finish();
        self.phase = "Erase";
        self.create_spinner(format!(
            "Erasing {} bytes (this may take a while)...",
            total_bytes
        ));
    }

    fn writing(&mut self, total_bytes: u32) {
        self.finish();
        self.create_bar(total_bytes.into(), "Writing");
    }

    fn write_progress(&mut self, bytes_written: u32) {
        self.set_position(bytes_written);
    }

    fn complete(&mut self) {
        self.finish();
    }
}
