//! Flash chip types and database
//!
//! This module describes the parallel NOR flash chips found in Trionic
//! ECUs, the unlock sequences that drive them and the table that maps an
//! identification code to a chip.

mod database;
mod sequences;
mod types;

pub use database::*;
pub use sequences::*;
pub use types::*;
