//! Location estimator
//!
//! RSSI is turned into a range with the log-distance path-loss model, then
//! the ranges are combined by linearized multilateration:
//!
//! - the first usable point is the reference; every other point contributes
//!   `2(xi-x0)X + 2(yi-y0)Y = (xi²+yi²-di²) - (x0²+y0²-d0²)`
//! - the rows are folded into the 2x2 normal equations and solved by
//!   Cramer's rule
//! - z is the inverse-distance weighted mean of the beacon heights
//!
//! This is a closed-form approximation, not a nonlinear least-squares fit.
//! Everything here is pure and safe to call from any task.

use crate::config::EstimatorSettings;
use crate::locate::rooms::{RoomMatch, rank_rooms};
use crate::model::{BeaconReading, Location, RoomDefinition};

pub const MSG_TOO_FEW_BEACONS: &str = "At least three beacons required";
pub const MSG_INSUFFICIENT_QUALITY: &str = "Insufficient high-quality beacons";
pub const MSG_UNSTABLE: &str = "Triangulation unstable";
pub const MSG_SUCCESS: &str = "Distance estimates derived from RSSI via path-loss model";

const MIN_POINTS: usize = 3;
/// Below this the normal equations are treated as singular.
const DETERMINANT_EPSILON: f64 = 1e-9;
/// Keeps the z weight finite for a zero range.
const WEIGHT_EPSILON: f64 = 1e-6;

/// Log-distance path-loss model: `d = 10 ^ ((tx_power - rssi) / (10 n))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLossModel {
    /// Expected RSSI at one meter, in dBm.
    pub tx_power: f64,
    pub path_loss_exponent: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            tx_power: -59.0,
            path_loss_exponent: 2.0,
        }
    }
}

impl PathLossModel {
    pub fn new(tx_power: f64, path_loss_exponent: f64) -> Self {
        Self {
            tx_power,
            path_loss_exponent,
        }
    }

    pub fn distance(&self, rssi: f64) -> f64 {
        10f64.powf((self.tx_power - rssi) / (10.0 * self.path_loss_exponent))
    }

    /// Inverse of `distance`. Non-positive distances are clamped to 1 cm.
    pub fn rssi_at(&self, distance: f64) -> f64 {
        let distance = if distance > 0.0 { distance } else { 0.01 };
        self.tx_power - 10.0 * self.path_loss_exponent * distance.log10()
    }
}

/// A beacon position and the estimated range from it to the tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangePoint {
    pub position: Location,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriangulationResult {
    /// `None` when the inputs could not produce a position; `message` says why.
    pub location: Option<Location>,
    pub confidence: f64,
    /// RMS of predicted minus measured range, in meters.
    pub residual: f64,
    pub beacon_count: usize,
    pub message: String,
    pub rooms: Vec<RoomMatch>,
}

impl TriangulationResult {
    fn degenerate(beacon_count: usize, message: &str) -> Self {
        Self {
            beacon_count,
            message: message.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocationEstimator {
    model: PathLossModel,
}

impl LocationEstimator {
    pub fn new(model: PathLossModel) -> Self {
        Self { model }
    }

    pub fn from_settings(settings: &EstimatorSettings) -> Self {
        Self::new(PathLossModel::new(settings.tx_power, settings.path_loss_exponent))
    }

    /// Estimate a position from one reading per beacon and rank `rooms`
    /// against it.
    pub fn estimate<'a, I>(&self, readings: I, rooms: &[RoomDefinition]) -> TriangulationResult
    where
        I: IntoIterator<Item = &'a BeaconReading>,
    {
        let readings: Vec<&BeaconReading> = readings.into_iter().collect();
        if readings.len() < MIN_POINTS {
            return TriangulationResult::degenerate(readings.len(), MSG_TOO_FEW_BEACONS);
        }

        let points: Vec<RangePoint> = readings
            .iter()
            .filter_map(|r| {
                let distance = self.model.distance(f64::from(r.rssi));
                (distance.is_finite() && distance > 0.0).then_some(RangePoint {
                    position: r.beacon_location,
                    distance,
                })
            })
            .collect();

        trilaterate(&points, rooms)
    }
}

/// Solve for a position from at least three ranges.
pub fn trilaterate(points: &[RangePoint], rooms: &[RoomDefinition]) -> TriangulationResult {
    if points.len() < MIN_POINTS {
        return TriangulationResult::degenerate(points.len(), MSG_INSUFFICIENT_QUALITY);
    }

    let reference = points[0];
    let (x0, y0, d0) = (reference.position.x, reference.position.y, reference.distance);
    let reference_term = x0 * x0 + y0 * y0 - d0 * d0;

    let (mut a11, mut a12, mut a22, mut b1, mut b2) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for point in &points[1..] {
        let (xi, yi, di) = (point.position.x, point.position.y, point.distance);
        let ai = 2.0 * (xi - x0);
        let bi = 2.0 * (yi - y0);
        let ci = (xi * xi + yi * yi - di * di) - reference_term;

        a11 += ai * ai;
        a12 += ai * bi;
        a22 += bi * bi;
        b1 += ai * ci;
        b2 += bi * ci;
    }

    let det = a11 * a22 - a12 * a12;
    if det.abs() < DETERMINANT_EPSILON {
        return TriangulationResult::degenerate(points.len(), MSG_UNSTABLE);
    }

    let x = (b1 * a22 - b2 * a12) / det;
    let y = (a11 * b2 - a12 * b1) / det;

    let (weight_sum, z_sum) = points.iter().fold((0.0, 0.0), |(ws, zs), p| {
        let w = 1.0 / (p.distance + WEIGHT_EPSILON);
        (ws + w, zs + w * p.position.z)
    });
    let z = if weight_sum > 0.0 { z_sum / weight_sum } else { 0.0 };

    let location = Location::new(x, y, z);
    let squared: f64 = points
        .iter()
        .map(|p| {
            let diff = location.distance_to(&p.position) - p.distance;
            diff * diff
        })
        .sum();
    let residual = (squared / points.len() as f64).sqrt();
    let confidence = (-residual).exp().clamp(0.0, 1.0);

    TriangulationResult {
        location: Some(location),
        confidence,
        residual,
        beacon_count: points.len(),
        message: MSG_SUCCESS.to_string(),
        rooms: rank_rooms(&location, rooms),
    }
}
