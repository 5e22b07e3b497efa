//! CLI command implementations

pub mod cycles;
pub mod evaluate;
pub mod status;
pub mod throttle;
