//! List commands implementation

use combiflash_core::chip::{self, ProgramMethod};

/// List all supported chips
pub fn list_chips(vendor_filter: Option<&str>) {
    println!("Supported flash chips:");
    println!();
    println!(
        "{:<8} {:<12} {:>6} {:>5} {:>9} {:>8}",
        "Vendor", "Name", "Type", "ECU", "Size", "Method"
    );
    println!("{}", "-".repeat(54));

    for chip in chip::CHIPS {
        if let Some(vendor) = vendor_filter {
            if !chip.vendor.to_lowercase().contains(&vendor.to_lowercase()) {
                continue;
            }
        }

        let method = match (chip.programmable, chip.method) {
            (false, _) => "none",
            (true, ProgramMethod::Driver) => "driver",
            (true, ProgramMethod::Word) => "bdm",
        };
        println!(
            "{:<8} {:<12} {:>6} {:>5} {:>9} {:>8}",
            chip.vendor,
            chip.name,
            format!("0x{:02X}", chip.code),
            chip.ecu.name(),
            format_size(chip.flash_size()),
            method
        );
    }
}

pub fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
