//! Sieve math utilities.

pub mod math;

pub use math::interp::*;
pub use math::predict::*;
pub use math::stats::*;
pub use math::trend::*;
