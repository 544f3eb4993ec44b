//! Sensord Daemon Library
//!
//! Single-instance sensor daemons streaming JSON records to a terminal

pub mod acquisition;
pub mod config;
pub mod daemon;
pub mod metrics;
pub mod sensors;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::{ConfigManager, DaemonConfig};
pub use daemon::{Daemon, Reply};
pub use sensors::{SensorOptions, SensorProfile};
