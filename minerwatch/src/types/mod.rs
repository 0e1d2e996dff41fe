//! Core types for minerwatch.
//!
//! Small value types shared by the parser, the state store and the API.

mod hash_rate;
mod power_mode;

pub use hash_rate::HashRate;
pub use power_mode::{ParsePowerModeError, PowerMode};
