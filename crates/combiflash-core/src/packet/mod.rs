//! Host link packet protocol
//!
//! All traffic between the host and the adapter is framed as
//! [`Packet`]s. This module provides the codec, the command space and the
//! payload layouts of the commands that carry structured data.

mod codec;
mod commands;
mod payload;

pub use codec::*;
pub use commands::*;
pub use payload::*;
