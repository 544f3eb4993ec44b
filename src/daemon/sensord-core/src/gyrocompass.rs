//! Gyrocompass heading from a stationary-but-rotated IMU
//!
//! Gyroscope readings are averaged over a collection window into one
//! posture. As the device is rotated about the vertical axis the horizontal
//! components of the earth-rate vector trace a circle whose centre is the
//! sensor bias. The centre is found by an algebraic least-squares circle fit
//! over the stored postures; the heading is the direction of the
//! bias-corrected horizontal rate.

use nalgebra::{Matrix3, Vector2, Vector3};
use serde::Serialize;

use crate::config::{GyrocompassParams, SampleRate};
use crate::sample::ImuSample;
use crate::transform::{Invalid, Outcome, Report, Transform};

/// Fewest postures that define a circle
pub const MIN_POSTURES: usize = 3;

/// Status code for a bias solve that could not be completed (EINVAL)
pub const SOLVE_FAILED: i32 = -22;

const DEGENERATE_EPS: f64 = 1e-9;

/// Previously collected posture averages
#[derive(Debug, Clone, PartialEq)]
pub struct PostureRing {
    slots: Vec<Vector3<f64>>,
    next: usize,
    filled: usize,
}

impl PostureRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Vector3::zeros(); capacity.max(1)],
            next: 0,
            filled: 0,
        }
    }

    pub fn push(&mut self, posture: Vector3<f64>) {
        self.slots[self.next] = posture;
        self.next = (self.next + 1) % self.slots.len();
        self.filled = (self.filled + 1).min(self.slots.len());
    }

    pub fn filled(&self) -> &[Vector3<f64>] {
        // Until the ring wraps the filled entries are a prefix
        &self.slots[..self.filled]
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }
}

/// Compass heading in degrees, clockwise from north, in `[0, 360)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Heading {
    pub heading: f64,
    pub bias_x: f64,
    pub bias_y: f64,
    pub bias_z: f64,
}

impl Report for Heading {}

pub fn insufficient_postures() -> Invalid {
    Invalid::new(SOLVE_FAILED, "Failed to calculate bias")
}

/// Fit a circle to the horizontal components of `postures`.
///
/// Returns the centre as the bias; `z` is the mean vertical rate.
pub fn solve_bias(postures: &[Vector3<f64>]) -> Result<Vector3<f64>, Invalid> {
    if postures.len() < MIN_POSTURES {
        return Err(insufficient_postures());
    }

    let n = postures.len() as f64;
    let mean = postures.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;

    // Centre and scale the horizontal points so the normal equations stay
    // well conditioned at earth-rate magnitudes
    let centred: Vec<Vector2<f64>> = postures
        .iter()
        .map(|p| Vector2::new(p.x - mean.x, p.y - mean.y))
        .collect();
    let scale = (centred.iter().map(|p| p.norm_squared()).sum::<f64>() / n).sqrt();
    if !scale.is_finite() || scale <= f64::EPSILON {
        return Err(insufficient_postures());
    }

    let mut m = Matrix3::<f64>::zeros();
    let mut rhs = Vector3::<f64>::zeros();
    for p in &centred {
        let (x, y) = (p.x / scale, p.y / scale);
        let r = x * x + y * y;
        let row = Vector3::new(x, y, 1.0);
        m += row * row.transpose();
        rhs -= row * r;
    }

    if m.determinant().abs() < DEGENERATE_EPS {
        return Err(insufficient_postures());
    }
    let solution = m.lu().solve(&rhs).ok_or_else(insufficient_postures)?;
    let (d, e, f) = (solution.x, solution.y, solution.z);
    let cx = -d / 2.0;
    let cy = -e / 2.0;
    if cx * cx + cy * cy - f <= 0.0 {
        return Err(insufficient_postures());
    }

    Ok(Vector3::new(mean.x + cx * scale, mean.y + cy * scale, mean.z))
}

/// Heading of a bias-corrected horizontal rate vector
pub fn heading_degrees(x: f64, y: f64) -> f64 {
    let degrees = (-y).atan2(x).to_degrees();
    let normalized = degrees.rem_euclid(360.0);
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

#[derive(Debug, Clone)]
struct PostureWindow {
    target: usize,
    count: usize,
    sum: Vector3<f64>,
}

impl PostureWindow {
    fn add(&mut self, sample: &ImuSample) -> Option<Vector3<f64>> {
        self.sum += Vector3::new(f64::from(sample.gx), f64::from(sample.gy), f64::from(sample.gz));
        self.count += 1;
        if self.count < self.target {
            return None;
        }
        let average = self.sum / self.count as f64;
        self.count = 0;
        self.sum = Vector3::zeros();
        Some(average)
    }
}

#[derive(Debug, Clone)]
pub struct Gyrocompass {
    window: PostureWindow,
    postures: usize,
}

impl Gyrocompass {
    pub fn new(params: GyrocompassParams, rate: SampleRate) -> Self {
        Self {
            window: PostureWindow {
                target: params.records_per_posture(rate),
                count: 0,
                sum: Vector3::zeros(),
            },
            postures: params.postures,
        }
    }

    /// Records averaged into each posture
    pub fn window_len(&self) -> usize {
        self.window.target
    }
}

impl Transform for Gyrocompass {
    type Sample = ImuSample;
    type State = PostureRing;
    type Output = Heading;

    fn initial_state(&self) -> PostureRing {
        PostureRing::new(self.postures)
    }

    fn apply(&mut self, sample: &ImuSample, ring: &mut PostureRing) -> Outcome<Heading> {
        let Some(posture) = self.window.add(sample) else {
            return Outcome::Pending;
        };

        ring.push(posture);
        if ring.len() < MIN_POSTURES && ring.len() < self.postures {
            return Outcome::Pending;
        }

        match solve_bias(ring.filled()) {
            Ok(bias) => Outcome::Ready(Heading {
                heading: heading_degrees(posture.x - bias.x, posture.y - bias.y),
                bias_x: bias.x,
                bias_y: bias.y,
                bias_z: bias.z,
            }),
            Err(invalid) => Outcome::Invalid(invalid),
        }
    }
}
