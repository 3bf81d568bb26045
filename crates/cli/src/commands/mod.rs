//! Subcommand implementations

pub mod parallelism;
pub mod pool;
pub mod skips;
pub mod status;
pub mod telemetry;
