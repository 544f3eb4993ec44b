//! Madgwick orientation filter (gyroscope + accelerometer)

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::Serialize;

use crate::config::{AhrsParams, SampleRate};
use crate::sample::ImuSample;
use crate::transform::{Outcome, Report, Transform};

/// Orientation estimate carried between samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AhrsState {
    pub q: Quaternion<f32>,
}

impl Default for AhrsState {
    fn default() -> Self {
        Self {
            q: Quaternion::identity(),
        }
    }
}

/// Euler angles in degrees plus the quaternion they were derived from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Orientation {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub qw: f32,
    pub qx: f32,
    pub qy: f32,
    pub qz: f32,
}

impl Report for Orientation {}

impl From<&Quaternion<f32>> for Orientation {
    fn from(q: &Quaternion<f32>) -> Self {
        let (roll, pitch, yaw) = UnitQuaternion::from_quaternion(*q).euler_angles();
        Self {
            roll: roll.to_degrees(),
            pitch: pitch.to_degrees(),
            yaw: yaw.to_degrees(),
            qw: q.w,
            qx: q.i,
            qy: q.j,
            qz: q.k,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Madgwick {
    beta: f32,
    sample_period: f32,
}

impl Madgwick {
    pub fn new(params: AhrsParams, rate: SampleRate) -> Self {
        Self {
            beta: params.beta,
            sample_period: 1.0 / rate.hz() as f32,
        }
    }

    /// One filter step; the accelerometer correction is skipped when the
    /// acceleration vector is zero
    pub fn step(&self, q: Quaternion<f32>, gyro: Vector3<f32>, accel: Vector3<f32>) -> Quaternion<f32> {
        let mut q_dot = q * Quaternion::from_imag(gyro) * 0.5;

        let norm = accel.norm();
        if norm > 0.0 {
            let a = accel / norm;
            let (q0, q1, q2, q3) = (q.w, q.i, q.j, q.k);

            // Gradient of the gravity alignment objective
            let s = Quaternion::new(
                4.0 * q0 * q2 * q2 + 2.0 * q2 * a.x + 4.0 * q0 * q1 * q1 - 2.0 * q1 * a.y,
                4.0 * q1 * q3 * q3 - 2.0 * q3 * a.x + 4.0 * q0 * q0 * q1 - 2.0 * q0 * a.y - 4.0 * q1
                    + 8.0 * q1 * q1 * q1
                    + 8.0 * q1 * q2 * q2
                    + 4.0 * q1 * a.z,
                4.0 * q0 * q0 * q2 + 2.0 * q0 * a.x + 4.0 * q2 * q3 * q3 - 2.0 * q3 * a.y - 4.0 * q2
                    + 8.0 * q2 * q1 * q1
                    + 8.0 * q2 * q2 * q2
                    + 4.0 * q2 * a.z,
                4.0 * q1 * q1 * q3 - 2.0 * q1 * a.x + 4.0 * q2 * q2 * q3 - 2.0 * q2 * a.y,
            );
            let s_norm = s.norm();
            if s_norm > 0.0 {
                q_dot -= s * (self.beta / s_norm);
            }
        }

        let next = q + q_dot * self.sample_period;
        let n = next.norm();
        if n > 0.0 {
            next / n
        } else {
            Quaternion::identity()
        }
    }
}

impl Transform for Madgwick {
    type Sample = ImuSample;
    type State = AhrsState;
    type Output = Orientation;

    fn initial_state(&self) -> AhrsState {
        AhrsState::default()
    }

    fn apply(&mut self, sample: &ImuSample, state: &mut AhrsState) -> Outcome<Orientation> {
        let gyro = Vector3::new(sample.gx, sample.gy, sample.gz);
        let accel = Vector3::new(sample.ax, sample.ay, sample.az);
        state.q = self.step(state.q, gyro, accel);
        Outcome::Ready(Orientation::from(&state.q))
    }
}
