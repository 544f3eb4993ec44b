//! Sensor configuration value sets
//!
//! Every setting the devices accept is restricted to a fixed enumerated set.
//! Values are validated here, at the boundary, before any device is opened.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating a configuration value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid sample rate")]
    SampleRate(u32),
    #[error("Invalid accelerometer range")]
    AccelRange(u32),
    #[error("Invalid gyroscope range")]
    GyroRange(u32),
    #[error("FIFO threshold must be between 1 and 4")]
    FifoDepth(u32),
    #[error("Interval must be positive")]
    Interval(i64),
    #[error("Interval must be at least 1000ms")]
    GnssCycle(i64),
    #[error("Satellite system mask must be non-zero")]
    SatelliteSystem(u32),
    #[error("Beta must be between 0 and 1")]
    Beta(f32),
    #[error("Posture data collecting time must be positive")]
    CollectTime(i64),
    #[error("Posture dataset number must be between 1 and 4096")]
    PostureCount(i64),
    #[error("Data discard time must be nonnegative")]
    DiscardTime(i64),
}

impl ConfigError {
    /// Status code reported for a rejected setting
    pub fn status_code(&self) -> i32 {
        -1
    }
}

/// IMU output data rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    Hz15,
    Hz30,
    Hz60,
    Hz120,
    Hz240,
    Hz480,
    Hz960,
    Hz1920,
}

impl SampleRate {
    pub const ALL: [SampleRate; 8] = [
        SampleRate::Hz15,
        SampleRate::Hz30,
        SampleRate::Hz60,
        SampleRate::Hz120,
        SampleRate::Hz240,
        SampleRate::Hz480,
        SampleRate::Hz960,
        SampleRate::Hz1920,
    ];

    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Hz15 => 15,
            SampleRate::Hz30 => 30,
            SampleRate::Hz60 => 60,
            SampleRate::Hz120 => 120,
            SampleRate::Hz240 => 240,
            SampleRate::Hz480 => 480,
            SampleRate::Hz960 => 960,
            SampleRate::Hz1920 => 1920,
        }
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = ConfigError;

    fn try_from(hz: u32) -> Result<Self, Self::Error> {
        SampleRate::ALL
            .into_iter()
            .find(|rate| rate.hz() == hz)
            .ok_or(ConfigError::SampleRate(hz))
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> Self {
        rate.hz()
    }
}

/// Accelerometer full-scale range in g
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum AccelRange {
    G2,
    G4,
    G8,
    G16,
}

impl AccelRange {
    pub const ALL: [AccelRange; 4] = [AccelRange::G2, AccelRange::G4, AccelRange::G8, AccelRange::G16];

    pub fn g(self) -> u32 {
        match self {
            AccelRange::G2 => 2,
            AccelRange::G4 => 4,
            AccelRange::G8 => 8,
            AccelRange::G16 => 16,
        }
    }
}

impl TryFrom<u32> for AccelRange {
    type Error = ConfigError;

    fn try_from(g: u32) -> Result<Self, Self::Error> {
        AccelRange::ALL
            .into_iter()
            .find(|range| range.g() == g)
            .ok_or(ConfigError::AccelRange(g))
    }
}

impl From<AccelRange> for u32 {
    fn from(range: AccelRange) -> Self {
        range.g()
    }
}

/// Gyroscope full-scale range in degrees per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum GyroRange {
    Dps125,
    Dps250,
    Dps500,
    Dps1000,
    Dps2000,
    Dps4000,
}

impl GyroRange {
    pub const ALL: [GyroRange; 6] = [
        GyroRange::Dps125,
        GyroRange::Dps250,
        GyroRange::Dps500,
        GyroRange::Dps1000,
        GyroRange::Dps2000,
        GyroRange::Dps4000,
    ];

    pub fn dps(self) -> u32 {
        match self {
            GyroRange::Dps125 => 125,
            GyroRange::Dps250 => 250,
            GyroRange::Dps500 => 500,
            GyroRange::Dps1000 => 1000,
            GyroRange::Dps2000 => 2000,
            GyroRange::Dps4000 => 4000,
        }
    }
}

impl TryFrom<u32> for GyroRange {
    type Error = ConfigError;

    fn try_from(dps: u32) -> Result<Self, Self::Error> {
        GyroRange::ALL
            .into_iter()
            .find(|range| range.dps() == dps)
            .ok_or(ConfigError::GyroRange(dps))
    }
}

impl From<GyroRange> for u32 {
    fn from(range: GyroRange) -> Self {
        range.dps()
    }
}

/// Hardware FIFO threshold (records per wake-up)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct FifoDepth(u8);

impl FifoDepth {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 4;

    pub fn get(self) -> u32 {
        u32::from(self.0)
    }
}

impl TryFrom<u32> for FifoDepth {
    type Error = ConfigError;

    fn try_from(depth: u32) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&depth) {
            Ok(FifoDepth(depth as u8))
        } else {
            Err(ConfigError::FifoDepth(depth))
        }
    }
}

impl From<FifoDepth> for u32 {
    fn from(depth: FifoDepth) -> Self {
        depth.get()
    }
}

/// Settings applied to an IMU character device, in this field order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImuConfig {
    #[serde(rename = "samplerate")]
    pub rate: SampleRate,
    pub accel_range: AccelRange,
    pub gyro_range: GyroRange,
    pub fifo: FifoDepth,
}

impl ImuConfig {
    /// Validate raw values; nothing is applied to a device here
    pub fn new(rate: u32, accel_range: u32, gyro_range: u32, fifo: u32) -> Result<Self, ConfigError> {
        Ok(Self {
            rate: SampleRate::try_from(rate)?,
            accel_range: AccelRange::try_from(accel_range)?,
            gyro_range: GyroRange::try_from(gyro_range)?,
            fifo: FifoDepth::try_from(fifo)?,
        })
    }
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            rate: SampleRate::Hz60,
            accel_range: AccelRange::G2,
            gyro_range: GyroRange::Dps125,
            fifo: FifoDepth(1),
        }
    }
}

/// Settings applied to a GNSS receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GnssConfig {
    /// Position notification cycle in milliseconds
    #[serde(rename = "cycle")]
    pub cycle_ms: u32,
    /// Satellite system selection bitmask
    pub satellite_system: u32,
}

impl GnssConfig {
    pub const MIN_CYCLE_MS: i64 = 1000;
    /// GPS + GLONASS
    pub const DEFAULT_SATELLITES: u32 = 3;

    pub fn new(cycle_ms: i64, satellite_system: u32) -> Result<Self, ConfigError> {
        if cycle_ms < Self::MIN_CYCLE_MS || cycle_ms > i64::from(u32::MAX) {
            return Err(ConfigError::GnssCycle(cycle_ms));
        }
        if satellite_system == 0 {
            return Err(ConfigError::SatelliteSystem(satellite_system));
        }
        Ok(Self {
            cycle_ms: cycle_ms as u32,
            satellite_system,
        })
    }
}

impl Default for GnssConfig {
    fn default() -> Self {
        Self {
            cycle_ms: 1000,
            satellite_system: Self::DEFAULT_SATELLITES,
        }
    }
}

/// Device-level configuration handed to a sample source
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorConfig {
    Imu(ImuConfig),
    Gnss(GnssConfig),
}

/// Madgwick filter parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AhrsParams {
    pub beta: f32,
}

impl AhrsParams {
    pub const DEFAULT_BETA: f32 = 0.1;

    pub fn new(beta: f32) -> Result<Self, ConfigError> {
        if beta > 0.0 && beta <= 1.0 {
            Ok(Self { beta })
        } else {
            Err(ConfigError::Beta(beta))
        }
    }
}

impl Default for AhrsParams {
    fn default() -> Self {
        Self {
            beta: Self::DEFAULT_BETA,
        }
    }
}

/// Gyrocompass posture collection parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GyrocompassParams {
    /// Time spent averaging one posture
    pub collect_ms: u32,
    /// Number of previous postures kept for the bias fit
    pub postures: usize,
    /// Warm-up time discarded before the first posture
    pub discard_ms: u32,
}

impl GyrocompassParams {
    /// Largest posture ring accepted
    pub const MAX_POSTURES: i64 = 4096;

    pub fn new(collect_ms: i64, postures: i64, discard_ms: i64) -> Result<Self, ConfigError> {
        if collect_ms <= 0 || collect_ms > i64::from(u32::MAX) {
            return Err(ConfigError::CollectTime(collect_ms));
        }
        if postures <= 0 || postures > Self::MAX_POSTURES {
            return Err(ConfigError::PostureCount(postures));
        }
        if discard_ms < 0 || discard_ms > i64::from(u32::MAX) {
            return Err(ConfigError::DiscardTime(discard_ms));
        }
        Ok(Self {
            collect_ms: collect_ms as u32,
            postures: postures as usize,
            discard_ms: discard_ms as u32,
        })
    }

    /// Records averaged into one posture at `rate`
    pub fn records_per_posture(&self, rate: SampleRate) -> usize {
        records_in(rate, self.collect_ms)
    }
}

impl Default for GyrocompassParams {
    fn default() -> Self {
        Self {
            collect_ms: 1000,
            postures: 8,
            discard_ms: 50,
        }
    }
}

/// Validate an emission interval given in milliseconds
pub fn emission_interval(ms: i64) -> Result<Duration, ConfigError> {
    if ms < 0 {
        return Err(ConfigError::Interval(ms));
    }
    Ok(Duration::from_millis(ms as u64))
}

/// Number of records covering `millis` at `rate`, never less than one
pub fn records_in(rate: SampleRate, millis: u32) -> usize {
    let count = u64::from(rate.hz()) * u64::from(millis) / 1000;
    count.max(1) as usize
}
