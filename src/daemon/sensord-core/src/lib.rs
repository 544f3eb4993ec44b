//! Sensord Core - sensor settings, record layouts and transforms
//!
//! This crate holds everything that does not touch the operating system:
//! validated device settings, the fixed binary layouts the drivers deliver,
//! the numeric transforms applied per sample and the JSON records emitted.

pub mod ahrs;
pub mod config;
pub mod gnss;
pub mod gyrocompass;
pub mod record;
pub mod sample;
pub mod transform;

pub use ahrs::{AhrsState, Madgwick, Orientation};
pub use config::{
    AccelRange, AhrsParams, ConfigError, FifoDepth, GnssConfig, GyroRange, GyrocompassParams, ImuConfig,
    SampleRate, SensorConfig,
};
pub use gnss::{GnssFormat, GnssReport};
pub use gyrocompass::{Gyrocompass, Heading, PostureRing};
pub use record::{CommandStatus, ReadResult, RecordFrame, Status};
pub use sample::{DecodeError, FixedRecord, GnssFix, ImuSample};
pub use transform::{ImuReading, Invalid, Outcome, Passthrough, Report, Transform};

/// Kinds of sensor daemon supported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Imu,
    Ahrs,
    Gyrocompass,
    Gnss,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Imu,
        SensorKind::Ahrs,
        SensorKind::Gyrocompass,
        SensorKind::Gnss,
    ];

    /// Name of the instance record in the state directory
    pub fn record_name(self) -> &'static str {
        match self {
            SensorKind::Imu => "imusensor.pid",
            SensorKind::Ahrs => "ahrssensor.pid",
            SensorKind::Gyrocompass => "gyrocompass_imusensor.pid",
            SensorKind::Gnss => "gnssdaemon.pid",
        }
    }

    /// Tag carried in the `cmd` field of every record
    pub fn cmd_tag(self) -> &'static str {
        match self {
            SensorKind::Imu => "imusensor",
            SensorKind::Ahrs => "ahrs_imusensor",
            SensorKind::Gyrocompass => "gyrocompass_imusensor",
            SensorKind::Gnss => "gnss",
        }
    }

    pub fn is_imu_family(self) -> bool {
        !matches!(self, SensorKind::Gnss)
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SensorKind::Imu => "imu",
            SensorKind::Ahrs => "ahrs",
            SensorKind::Gyrocompass => "gyrocompass",
            SensorKind::Gnss => "gnss",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_record_names_are_distinct() {
        let names: HashSet<_> = SensorKind::ALL.iter().map(|k| k.record_name()).collect();
        assert_eq!(names.len(), SensorKind::ALL.len());
        let tags: HashSet<_> = SensorKind::ALL.iter().map(|k| k.cmd_tag()).collect();
        assert_eq!(tags.len(), SensorKind::ALL.len());
    }

    #[test]
    fn test_sensor_kind_display() {
        assert_eq!(SensorKind::Gyrocompass.to_string(), "gyrocompass");
        assert!(SensorKind::Ahrs.is_imu_family());
        assert!(!SensorKind::Gnss.is_imu_family());
    }
}
