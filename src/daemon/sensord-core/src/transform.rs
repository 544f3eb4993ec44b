//! Sample transforms
//!
//! A transform turns one decoded sample plus the accumulated state into at
//! most one output value. The acquisition loop owns the state; transforms
//! never keep a reference to a sample past `apply`.

use serde::Serialize;
use thiserror::Error;

use crate::sample::{FixedRecord, ImuSample};

/// Why a transform refused to produce an output for this sample
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{msg}")]
pub struct Invalid {
    pub code: i32,
    pub msg: String,
}

impl Invalid {
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }
}

/// Result of applying a transform to one sample
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// An output value is available for emission
    Ready(T),
    /// The sample was accepted but no output is available yet
    Pending,
    /// The sample was rejected; the caller restores the previous state
    Invalid(Invalid),
}

/// A value that can be carried as the `data` of a record
pub trait Report: Serialize {
    /// Status message attached to the record carrying this value
    fn summary(&self) -> &'static str {
        ""
    }
}

pub trait Transform {
    type Sample: FixedRecord;
    type State: Clone + std::fmt::Debug;
    type Output: Report;

    fn initial_state(&self) -> Self::State;

    fn apply(&mut self, sample: &Self::Sample, state: &mut Self::State) -> Outcome<Self::Output>;
}

/// Raw accelerometer and gyroscope values
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImuReading {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub gx: f32,
    pub gy: f32,
    pub gz: f32,
}

impl Report for ImuReading {}

impl From<&ImuSample> for ImuReading {
    fn from(sample: &ImuSample) -> Self {
        Self {
            x: sample.ax,
            y: sample.ay,
            z: sample.az,
            gx: sample.gx,
            gy: sample.gy,
            gz: sample.gz,
        }
    }
}

/// Identity transform for the raw IMU sensor
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Transform for Passthrough {
    type Sample = ImuSample;
    type State = ();
    type Output = ImuReading;

    fn initial_state(&self) -> Self::State {}

    fn apply(&mut self, sample: &ImuSample, _state: &mut ()) -> Outcome<ImuReading> {
        Outcome::Ready(ImuReading::from(sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_maps_axes() {
        let sample = ImuSample {
            timestamp: 1,
            temp: 20.0,
            gx: 0.1,
            gy: 0.2,
            gz: 0.3,
            ax: 0.0,
            ay: 0.5,
            az: 1.0,
        };
        let mut transform = Passthrough;
        let mut state = transform.initial_state();
        let outcome = transform.apply(&sample, &mut state);
        assert_eq!(
            outcome,
            Outcome::Ready(ImuReading {
                x: 0.0,
                y: 0.5,
                z: 1.0,
                gx: 0.1,
                gy: 0.2,
                gz: 0.3
            })
        );
    }

    #[test]
    fn test_reading_json_fields() {
        let reading = ImuReading {
            x: 0.0,
            y: 0.0,
            z: 1.0,
            gx: 0.0,
            gy: 0.0,
            gz: 0.0,
        };
        let json = serde_json::to_value(reading).unwrap();
        assert_eq!(json["z"], 1.0);
        assert_eq!(json.as_object().unwrap().len(), 6);
        assert_eq!(reading.summary(), "");
    }
}
