//! Fixed-size binary records delivered by the sensor drivers
//!
//! Both layouts are little-endian and packed the way the drivers write them.
//! A read that returns fewer bytes than `SIZE` is never decoded.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record is {actual} bytes, expected {expected}")]
pub struct DecodeError {
    pub expected: usize,
    pub actual: usize,
}

/// A record with a fixed on-the-wire size
pub trait FixedRecord: Sized {
    const SIZE: usize;

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;
}

fn check_len<T: FixedRecord>(bytes: &[u8]) -> Result<(), DecodeError> {
    if bytes.len() != T::SIZE {
        return Err(DecodeError {
            expected: T::SIZE,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn array<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(array(bytes, at))
}

fn f32_at(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes(array(bytes, at))
}

fn f64_at(bytes: &[u8], at: usize) -> f64 {
    f64::from_le_bytes(array(bytes, at))
}

/// One IMU measurement
///
/// Angular rates are in rad/s, accelerations in g.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuSample {
    pub timestamp: u32,
    pub temp: f32,
    pub gx: f32,
    pub gy: f32,
    pub gz: f32,
    pub ax: f32,
    pub ay: f32,
    pub az: f32,
}

impl FixedRecord for ImuSample {
    const SIZE: usize = 32;

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        check_len::<Self>(bytes)?;
        Ok(Self {
            timestamp: u32_at(bytes, 0),
            temp: f32_at(bytes, 4),
            gx: f32_at(bytes, 8),
            gy: f32_at(bytes, 12),
            gz: f32_at(bytes, 16),
            ax: f32_at(bytes, 20),
            ay: f32_at(bytes, 24),
            az: f32_at(bytes, 28),
        })
    }
}

impl ImuSample {
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        let floats = [self.temp, self.gx, self.gy, self.gz, self.ax, self.ay, self.az];
        for (i, value) in floats.iter().enumerate() {
            let at = 4 + i * 4;
            out[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}

/// Position fix quality reported by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    Invalid,
    TwoD,
    ThreeD,
}

impl FixMode {
    fn from_raw(raw: u8) -> Self {
        match raw {
            2 => FixMode::TwoD,
            3 => FixMode::ThreeD,
            _ => FixMode::Invalid,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            FixMode::Invalid => 1,
            FixMode::TwoD => 2,
            FixMode::ThreeD => 3,
        }
    }
}

/// UTC time of a fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixTime {
    pub hour: u8,
    pub minute: u8,
    pub sec: u8,
    pub usec: u32,
}

/// One GNSS position notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GnssFix {
    pub time: FixTime,
    pub fix_mode: FixMode,
    pub visible_sats: u8,
    pub tracking_sats: u8,
    pub positioning_sats: u8,
    pub sat_systems: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub geoid: f64,
    pub h_accuracy: f32,
    pub v_accuracy: f32,
    pub pdop: f32,
    pub hdop: f32,
    pub vdop: f32,
    pub tdop: f32,
}

impl FixedRecord for GnssFix {
    const SIZE: usize = 72;

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        check_len::<Self>(bytes)?;
        Ok(Self {
            time: FixTime {
                hour: bytes[0],
                minute: bytes[1],
                sec: bytes[2],
                usec: u32_at(bytes, 4),
            },
            fix_mode: FixMode::from_raw(bytes[3]),
            visible_sats: bytes[8],
            tracking_sats: bytes[9],
            positioning_sats: bytes[10],
            sat_systems: u32_at(bytes, 12),
            latitude: f64_at(bytes, 16),
            longitude: f64_at(bytes, 24),
            altitude: f64_at(bytes, 32),
            geoid: f64_at(bytes, 40),
            h_accuracy: f32_at(bytes, 48),
            v_accuracy: f32_at(bytes, 52),
            pdop: f32_at(bytes, 56),
            hdop: f32_at(bytes, 60),
            vdop: f32_at(bytes, 64),
            tdop: f32_at(bytes, 68),
        })
    }
}

impl GnssFix {
    pub fn has_position(&self) -> bool {
        self.fix_mode != FixMode::Invalid
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.time.hour;
        out[1] = self.time.minute;
        out[2] = self.time.sec;
        out[3] = self.fix_mode.raw();
        out[4..8].copy_from_slice(&self.time.usec.to_le_bytes());
        out[8] = self.visible_sats;
        out[9] = self.tracking_sats;
        out[10] = self.positioning_sats;
        out[12..16].copy_from_slice(&self.sat_systems.to_le_bytes());
        for (i, value) in [self.latitude, self.longitude, self.altitude, self.geoid].iter().enumerate() {
            let at = 16 + i * 8;
            out[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }
        let floats = [self.h_accuracy, self.v_accuracy, self.pdop, self.hdop, self.vdop, self.tdop];
        for (i, value) in floats.iter().enumerate() {
            let at = 48 + i * 4;
            out[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}
