//! Range/bearing measurement model and Gaussian measurement likelihood.
//!
//! The scanner sits `scanner_displacement` ahead of the rotation center. A landmark at $(l_x, l_y)$
//! is seen from pose $(x, y, \theta)$ as
//!
//! $$
//! d_x = l_x - (x + d \cos\theta), \quad d_y = l_y - (y + d \sin\theta)
//! $$
//!
//! $$
//! r = \sqrt{d_x^2 + d_y^2}, \quad \beta = \mathrm{atan2}(d_y, d_x) - \theta
//! $$
//!
//! The likelihood of an actual measurement given the predicted one is the product of two
//! independent zero-mean Gaussian densities over the range error and the (wrapped) bearing error.
use std::f64::consts::PI;

use crate::{Landmark, Measurement, Pose, angle_difference, normalize_angle};

/// Predicted measurement of `landmark` from `pose` for a scanner mounted `scanner_displacement`
/// ahead of the rotation center.
///
/// The range is zero only when the landmark coincides with the scanner; the bearing is then
/// `-heading` (the `atan2(0, 0)` convention) and callers must tolerate it.
pub fn expected_measurement(
    pose: &Pose,
    landmark: &Landmark,
    scanner_displacement: f64,
) -> Measurement {
    let (scanner_x, scanner_y) = pose.scanner_position(scanner_displacement);
    let dx = landmark.x - scanner_x;
    let dy = landmark.y - scanner_y;
    Measurement {
        range: dx.hypot(dy),
        bearing: normalize_angle(dy.atan2(dx) - pose.heading),
    }
}

/// Probability density of a zero-mean Gaussian with standard deviation `std_dev` at `x`.
pub fn gaussian_density(x: f64, std_dev: f64) -> f64 {
    let normalized = x / std_dev;
    (-0.5 * normalized * normalized).exp() / (std_dev * (2.0 * PI).sqrt())
}

/// Scanner geometry and noise parameters for range/bearing landmark observations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeasurementModel {
    /// Distance of the scanner ahead of the rotation center in millimeters
    pub scanner_displacement: f64,
    /// Standard deviation of the measured range in millimeters
    pub distance_stddev: f64,
    /// Standard deviation of the measured bearing in radians
    pub angle_stddev: f64,
}
impl Default for MeasurementModel {
    fn default() -> Self {
        MeasurementModel {
            scanner_displacement: 30.0,
            distance_stddev: 200.0,
            angle_stddev: 15.0_f64.to_radians(),
        }
    }
}
impl MeasurementModel {
    pub fn new(scanner_displacement: f64, distance_stddev: f64, angle_stddev: f64) -> Self {
        MeasurementModel {
            scanner_displacement,
            distance_stddev,
            angle_stddev,
        }
    }
    /// Predicted measurement of `landmark` from `pose` using this model's scanner displacement.
    pub fn expected_measurement(&self, pose: &Pose, landmark: &Landmark) -> Measurement {
        expected_measurement(pose, landmark, self.scanner_displacement)
    }
    /// Likelihood of `measurement` given `predicted`.
    ///
    /// The bearing error is the shortest signed angle between the two bearings, so predictions on
    /// either side of the $\pm\pi$ seam are not penalized by a spurious full turn.
    pub fn probability_of_measurement(
        &self,
        measurement: &Measurement,
        predicted: &Measurement,
    ) -> f64 {
        let range_error = measurement.range - predicted.range;
        let bearing_error = angle_difference(measurement.bearing, predicted.bearing);
        gaussian_density(range_error, self.distance_stddev)
            * gaussian_density(bearing_error, self.angle_stddev)
    }
}
