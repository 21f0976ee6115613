//! High-level flash operations
//!
//! This module provides the whole-chip dump, erase and program routines,
//! the flash driver runner and the ECU preparation sequence.

mod context;
pub mod driver;
mod operations;

pub use context::{TransferSession, BLOCK_LEN};
pub use operations::*;
