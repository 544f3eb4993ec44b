//! Per-sensor settings assembled from command-line options

use std::time::Duration;

use sensord_core::config::{emission_interval, records_in};
use sensord_core::{
    AhrsParams, ConfigError, GnssConfig, GyrocompassParams, ImuConfig, SampleRate, SensorConfig, SensorKind,
};
use serde::Serialize;

/// Warm-up discarded before the AHRS filter sees its first sample
const AHRS_WARMUP_MS: u32 = 50;

/// Raw option values as given on the command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorOptions {
    pub rate: Option<u32>,
    pub accel_range: Option<u32>,
    pub gyro_range: Option<u32>,
    pub fifo: Option<u32>,
    pub interval_ms: Option<i64>,
    pub request_id: i32,
    pub beta: Option<f32>,
    pub collect_ms: Option<i64>,
    pub postures: Option<i64>,
    pub discard_ms: Option<i64>,
    pub satellites: Option<u32>,
}

/// Transform applied to the samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Model {
    Raw,
    Ahrs(AhrsParams),
    Gyrocompass(GyrocompassParams),
    Gnss,
}

/// Everything needed to run one sensor, validated
#[derive(Debug, Clone, PartialEq)]
pub struct SensorProfile {
    pub kind: SensorKind,
    pub device: SensorConfig,
    pub model: Model,
    /// Minimum time between emitted data records
    pub interval: Duration,
    pub request_id: i32,
}

#[derive(Serialize)]
struct AhrsEcho {
    #[serde(flatten)]
    imu: ImuConfig,
    beta: f32,
}

#[derive(Serialize)]
struct GyrocompassEcho {
    #[serde(flatten)]
    imu: ImuConfig,
    collect_ms: u32,
    postures: usize,
    discard_ms: u32,
}

impl SensorProfile {
    /// Validate `options` for `kind`; no device is touched
    pub fn from_options(kind: SensorKind, options: &SensorOptions) -> Result<Self, ConfigError> {
        let (device, model, interval) = match kind {
            SensorKind::Imu => (
                imu_config(options, ImuConfig::default())?,
                Model::Raw,
                emission_interval(options.interval_ms.unwrap_or(1000))?,
            ),
            SensorKind::Ahrs => {
                let params = match options.beta {
                    Some(beta) => AhrsParams::new(beta)?,
                    None => AhrsParams::default(),
                };
                (
                    imu_config(options, ImuConfig::default())?,
                    Model::Ahrs(params),
                    emission_interval(options.interval_ms.unwrap_or(1000))?,
                )
            }
            SensorKind::Gyrocompass => {
                let defaults = GyrocompassParams::default();
                let params = GyrocompassParams::new(
                    options.collect_ms.unwrap_or(i64::from(defaults.collect_ms)),
                    options.postures.unwrap_or(defaults.postures as i64),
                    options.discard_ms.unwrap_or(i64::from(defaults.discard_ms)),
                )?;
                let base = ImuConfig {
                    rate: SampleRate::Hz1920,
                    accel_range: sensord_core::AccelRange::G4,
                    ..ImuConfig::default()
                };
                (
                    imu_config(options, base)?,
                    Model::Gyrocompass(params),
                    emission_interval(options.interval_ms.unwrap_or(0))?,
                )
            }
            SensorKind::Gnss => {
                let gnss = GnssConfig::new(
                    options.interval_ms.unwrap_or(i64::from(GnssConfig::default().cycle_ms)),
                    options.satellites.unwrap_or(GnssConfig::DEFAULT_SATELLITES),
                )?;
                // Every notification is emitted; the receiver sets the cadence
                (SensorConfig::Gnss(gnss), Model::Gnss, Duration::ZERO)
            }
        };

        Ok(Self {
            kind,
            device,
            model,
            interval,
            request_id: options.request_id,
        })
    }

    pub fn imu(&self) -> Option<&ImuConfig> {
        match &self.device {
            SensorConfig::Imu(imu) => Some(imu),
            SensorConfig::Gnss(_) => None,
        }
    }

    /// Records discarded after enabling, `None` for sensors without warm-up
    pub fn warmup_records(&self) -> Option<usize> {
        let imu = self.imu()?;
        let millis = match self.model {
            Model::Raw => 0,
            Model::Ahrs(_) => AHRS_WARMUP_MS,
            Model::Gyrocompass(params) => params.discard_ms,
            Model::Gnss => return None,
        };
        Some(records_in(imu.rate, millis))
    }

    /// Interval reported in data records
    pub fn reported_interval_ms(&self) -> u64 {
        match (&self.device, &self.model) {
            (SensorConfig::Gnss(gnss), _) => u64::from(gnss.cycle_ms),
            (_, Model::Gyrocompass(params)) if self.interval.is_zero() => u64::from(params.collect_ms),
            _ => self.interval.as_millis() as u64,
        }
    }

    /// Settings echoed in every record's `config` object
    pub fn config_echo(&self) -> serde_json::Value {
        let echo = match (&self.device, &self.model) {
            (SensorConfig::Imu(imu), Model::Ahrs(params)) => serde_json::to_value(AhrsEcho {
                imu: *imu,
                beta: params.beta,
            }),
            (SensorConfig::Imu(imu), Model::Gyrocompass(params)) => serde_json::to_value(GyrocompassEcho {
                imu: *imu,
                collect_ms: params.collect_ms,
                postures: params.postures,
                discard_ms: params.discard_ms,
            }),
            (SensorConfig::Imu(imu), _) => serde_json::to_value(imu),
            (SensorConfig::Gnss(gnss), _) => serde_json::to_value(gnss),
        };
        echo.unwrap_or(serde_json::Value::Null)
    }

    pub fn started_msg(&self) -> &'static str {
        match self.kind {
            SensorKind::Gnss => "GNSS monitoring started",
            _ => "Polling started",
        }
    }

    pub fn read_ok_msg(&self) -> &'static str {
        match self.kind {
            SensorKind::Imu => "Sensor data read successfully",
            SensorKind::Ahrs => "AHRS sensor data read successfully",
            SensorKind::Gyrocompass => "Success",
            SensorKind::Gnss => "GNSS data read successfully",
        }
    }
}

fn imu_config(options: &SensorOptions, base: ImuConfig) -> Result<SensorConfig, ConfigError> {
    let imu = ImuConfig::new(
        options.rate.unwrap_or(base.rate.hz()),
        options.accel_range.unwrap_or(base.accel_range.g()),
        options.gyro_range.unwrap_or(base.gyro_range.dps()),
        options.fifo.unwrap_or(base.fifo.get()),
    )?;
    Ok(SensorConfig::Imu(imu))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imu_defaults() {
        let profile = SensorProfile::from_options(SensorKind::Imu, &SensorOptions::default()).unwrap();
        assert_eq!(profile.imu(), Some(&ImuConfig::default()));
        assert_eq!(profile.interval, Duration::from_secs(1));
        assert_eq!(profile.request_id, 0);
        assert_eq!(profile.warmup_records(), Some(1));
        assert_eq!(
            profile.config_echo(),
            serde_json::json!({"samplerate": 60, "accel_range": 2, "gyro_range": 125, "fifo": 1})
        );
    }

    #[test]
    fn test_ahrs_profile() {
        let options = SensorOptions {
            rate: Some(120),
            beta: Some(0.2),
            interval_ms: Some(0),
            request_id: 9,
            ..SensorOptions::default()
        };
        let profile = SensorProfile::from_options(SensorKind::Ahrs, &options).unwrap();
        assert_eq!(profile.model, Model::Ahrs(AhrsParams { beta: 0.2 }));
        assert_eq!(profile.interval, Duration::ZERO);
        // 50 ms at 120 Hz
        assert_eq!(profile.warmup_records(), Some(6));
        let echo = profile.config_echo();
        assert_eq!(echo["samplerate"], 120);
        assert!((echo["beta"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_gyrocompass_defaults() {
        let profile = SensorProfile::from_options(SensorKind::Gyrocompass, &SensorOptions::default()).unwrap();
        let imu = profile.imu().unwrap();
        assert_eq!(imu.rate, SampleRate::Hz1920);
        assert_eq!(imu.accel_range.g(), 4);
        assert_eq!(profile.model, Model::Gyrocompass(GyrocompassParams::default()));
        // 50 ms at 1920 Hz
        assert_eq!(profile.warmup_records(), Some(96));
        assert_eq!(profile.reported_interval_ms(), 1000);
    }

    #[test]
    fn test_gnss_profile() {
        let options = SensorOptions {
            interval_ms: Some(2000),
            satellites: Some(1),
            ..SensorOptions::default()
        };
        let profile = SensorProfile::from_options(SensorKind::Gnss, &options).unwrap();
        assert_eq!(profile.warmup_records(), None);
        assert_eq!(profile.interval, Duration::ZERO);
        assert_eq!(profile.reported_interval_ms(), 2000);
        assert_eq!(profile.config_echo(), serde_json::json!({"cycle": 2000, "satellite_system": 1}));
        assert_eq!(profile.started_msg(), "GNSS monitoring started");
    }

    #[test]
    fn test_invalid_options_rejected() {
        let bad_rate = SensorOptions {
            rate: Some(100),
            ..SensorOptions::default()
        };
        assert_eq!(
            SensorProfile::from_options(SensorKind::Imu, &bad_rate),
            Err(ConfigError::SampleRate(100))
        );

        let bad_interval = SensorOptions {
            interval_ms: Some(-1),
            ..SensorOptions::default()
        };
        assert_eq!(
            SensorProfile::from_options(SensorKind::Ahrs, &bad_interval),
            Err(ConfigError::Interval(-1))
        );

        let short_cycle = SensorOptions {
            interval_ms: Some(500),
            ..SensorOptions::default()
        };
        assert_eq!(
            SensorProfile::from_options(SensorKind::Gnss, &short_cycle),
            Err(ConfigError::GnssCycle(500))
        );

        let no_postures = SensorOptions {
            postures: Some(0),
            ..SensorOptions::default()
        };
        assert_eq!(
            SensorProfile::from_options(SensorKind::Gyrocompass, &no_postures),
            Err(ConfigError::PostureCount(0))
        );

        let too_many_postures = SensorOptions {
            postures: Some(4_398_046_511_104),
            ..SensorOptions::default()
        };
        let err = SensorProfile::from_options(SensorKind::Gyrocompass, &too_many_postures).unwrap_err();
        assert_eq!(err, ConfigError::PostureCount(4_398_046_511_104));
        assert_eq!(err.status_code(), -1);
    }
}
