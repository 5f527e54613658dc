//! Core math modules.

pub mod interp;
pub mod predict;
pub mod stats;
pub mod trend;
