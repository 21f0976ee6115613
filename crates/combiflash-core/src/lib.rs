//! combiflash-core - Core library for BDM flash programming
//!
//! This crate holds the flash transport and programming engine of the
//! combi adapter: the packet codec spoken over the host link, the flash
//! chip database, the AM29/AM28 erase and program algorithms, the
//! driver-injection runner and the whole-chip dump/program routines.
//! It is `no_std` so it can run on the adapter itself.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc`)
//! - `alloc` - Enable heap allocation
//!
//! # Example
//!
//! ```ignore
//! use combiflash_core::{bdm::BdmPort, protocol};
//!
//! fn show_chip<P: BdmPort>(port: &mut P) {
//!     match protocol::identify(port) {
//!         Ok(id) => println!("Found: {} ({} bytes)", id.chip.name, id.chip.flash_size()),
//!         Err(e) => println!("Identify failed: {}", e),
//!     }
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod bdm;
pub mod chip;
pub mod clock;
pub mod error;
pub mod flash;
pub mod packet;
pub mod protocol;

pub use error::{Error, Result};
