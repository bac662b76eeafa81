//! Monte Carlo localization toolbox for a differential-drive robot
//!
//! This crate estimates the pose (position and heading) of a mobile robot over time from noisy
//! wheel odometry and noisy range/bearing observations of landmarks whose positions are known a
//! priori. The belief over the pose is represented by a set of particles. Each time step runs a
//! prediction that pushes every particle through a stochastic motion model and a correction that
//! scores every particle against the detected landmarks and resamples the population in proportion
//! to those scores.
//!
//! The crate does not read raw robot logs or extract landmarks from range scans. It consumes the
//! already-reduced inputs: per-step wheel travel distances ([Control]), per-step landmark
//! detections ([Measurement]) and the landmark map ([Landmark]).
//!
//! This crate is primarily built off of the following dependencies:
//! - [`rand`](https://crates.io/crates/rand) and
//!   [`rand_distr`](https://crates.io/crates/rand_distr): Random number generation for the prior,
//!   the motion noise, and the resampling wheel.
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Covariance summaries of the population.
//! - [`serde`](https://crates.io/crates/serde) and [`csv`](https://crates.io/crates/csv):
//!   Configuration and simulation I/O.
//! - [`rayon`](https://crates.io/crates/rayon): Optional parallel weight computation.
//!
//! ## Crate overview
//!
//! - [motion]: The differential-drive state transition and its stochastic sampling variant.
//! - [measurements]: The range/bearing measurement model and the Gaussian measurement likelihood.
//! - [association]: The data association interface and a nearest-landmark implementation.
//! - [particle]: Weight computation, the resampling wheel, the estimator, and the
//!   [particle::ParticleFilter] orchestrator.
//! - [histogram]: A discrete (histogram) Bayes filter over one dimension.
//! - [sim]: Configuration, CSV records, and the step-driven simulation loop.
//!
//! ## Coordinate and state definitions
//!
//! A pose is the three-vector
//!
//! $$
//! x = [p_x, p_y, \theta]
//! $$
//!
//! where $p_x$ and $p_y$ are the map-frame position of the robot's rotation center in millimeters
//! and $\theta$ is the heading in radians, measured counter-clockwise from the map x-axis. Headings
//! and bearings are always kept in the half-open interval $(-\pi, \pi]$; see [normalize_angle].
//!
//! The range scanner is mounted `scanner_displacement` millimeters ahead of the rotation center
//! along the heading. All measurements are taken relative to the scanner, not to the rotation
//! center.
pub mod association;
pub mod error;
pub mod histogram;
pub mod measurements;
pub mod motion;
pub mod particle;
pub mod sim;

use std::convert::TryFrom;
use std::f64::consts::{PI, TAU};
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

pub use crate::error::FilterError;

/// Normalize an angle into the half-open interval $(-\pi, \pi]$.
///
/// ```
/// use mcl::normalize_angle;
/// use std::f64::consts::PI;
///
/// assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-12);
/// assert!((normalize_angle(-PI) - PI).abs() < 1e-12);
/// assert!((normalize_angle(0.5) - 0.5).abs() < 1e-12);
/// ```
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// Signed shortest angular difference `a - b`, normalized into $(-\pi, \pi]$.
///
/// A raw subtraction of two normalized angles can be off by a full turn (e.g. $\pi - 0.1$
/// and $-\pi + 0.1$ are only $0.2$ radians apart). Use this instead.
pub fn angle_difference(a: f64, b: f64) -> f64 {
    normalize_angle(a - b)
}

fn check_arity(record: &'static str, expected: usize, values: &[f64]) -> Result<(), FilterError> {
    if values.len() != expected {
        return Err(FilterError::InputShape {
            record,
            expected,
            found: values.len(),
        });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(FilterError::NonFiniteInput(record));
    }
    Ok(())
}

/// Robot pose in the map frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position along the map x-axis in millimeters
    pub x: f64,
    /// Position along the map y-axis in millimeters
    pub y: f64,
    /// Heading in radians, in $(-\pi, \pi]$
    pub heading: f64,
}
impl Pose {
    /// Create a new pose. The heading is normalized into $(-\pi, \pi]$.
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Pose {
            x,
            y,
            heading: normalize_angle(heading),
        }
    }
    /// Map-frame position of a scanner mounted `scanner_displacement` ahead of the rotation center.
    pub fn scanner_position(&self, scanner_displacement: f64) -> (f64, f64) {
        (
            self.x + scanner_displacement * self.heading.cos(),
            self.y + scanner_displacement * self.heading.sin(),
        )
    }
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.heading.is_finite()
    }
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.1} mm, y: {:.1} mm, heading: {:.2} deg }}",
            self.x,
            self.y,
            self.heading.to_degrees()
        )
    }
}
impl TryFrom<&[f64]> for Pose {
    type Error = FilterError;
    /// Build a pose from `[x, y, heading]`.
    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        check_arity("pose", 3, values)?;
        Ok(Pose::new(values[0], values[1], values[2]))
    }
}

/// Per-step wheel travel of a differential-drive robot, already converted to millimeters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Control {
    /// Distance travelled by the left wheel
    pub left: f64,
    /// Distance travelled by the right wheel
    pub right: f64,
}
impl Control {
    pub fn new(left: f64, right: f64) -> Self {
        Control { left, right }
    }
    /// Convert raw encoder ticks to wheel travel using the `ticks_to_mm` calibration factor.
    pub fn from_ticks(left_ticks: f64, right_ticks: f64, ticks_to_mm: f64) -> Self {
        Control {
            left: left_ticks * ticks_to_mm,
            right: right_ticks * ticks_to_mm,
        }
    }
    /// The control that drives the same arc backwards.
    pub fn reversed(&self) -> Self {
        Control {
            left: -self.left,
            right: -self.right,
        }
    }
    /// Equal wheel travel means straight-line motion (infinite turn radius).
    pub fn is_straight(&self) -> bool {
        self.left == self.right
    }
    pub fn is_finite(&self) -> bool {
        self.left.is_finite() && self.right.is_finite()
    }
}
impl Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Control {{ left: {:.3} mm, right: {:.3} mm }}",
            self.left, self.right
        )
    }
}
impl TryFrom<&[f64]> for Control {
    type Error = FilterError;
    /// Build a control from `[left, right]`.
    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        check_arity("control", 2, values)?;
        Ok(Control::new(values[0], values[1]))
    }
}

/// A static map feature at a known position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
}
impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Landmark { x, y }
    }
}
impl TryFrom<&[f64]> for Landmark {
    type Error = FilterError;
    /// Build a landmark from `[x, y]`.
    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        check_arity("landmark", 2, values)?;
        Ok(Landmark::new(values[0], values[1]))
    }
}

/// A range/bearing observation relative to the scanner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Distance from the scanner to the observed feature in millimeters
    pub range: f64,
    /// Bearing relative to the robot heading in radians, in $(-\pi, \pi]$
    pub bearing: f64,
}
impl Measurement {
    /// Create a new measurement. The bearing is normalized into $(-\pi, \pi]$.
    pub fn new(range: f64, bearing: f64) -> Self {
        Measurement {
            range,
            bearing: normalize_angle(bearing),
        }
    }
    /// Scanner-frame cartesian coordinates of the observed feature.
    pub fn to_cartesian(&self) -> (f64, f64) {
        (
            self.range * self.bearing.cos(),
            self.range * self.bearing.sin(),
        )
    }
}
impl Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Measurement {{ range: {:.1} mm, bearing: {:.2} deg }}",
            self.range,
            self.bearing.to_degrees()
        )
    }
}
impl TryFrom<&[f64]> for Measurement {
    type Error = FilterError;
    /// Build a measurement from `[range, bearing]`.
    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        check_arity("measurement", 2, values)?;
        Ok(Measurement::new(values[0], values[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_normalize_angle_range() {
        for i in -50..=50 {
            let angle = i as f64 * 0.37;
            let normalized = normalize_angle(angle);
            assert!(normalized > -PI && normalized <= PI, "{angle} -> {normalized}");
            assert_approx_eq!(normalized.sin(), angle.sin(), 1e-9);
            assert_approx_eq!(normalized.cos(), angle.cos(), 1e-9);
        }
    }

    #[test]
    fn test_normalize_angle_boundaries() {
        assert_approx_eq!(normalize_angle(PI), PI, 1e-12);
        assert_approx_eq!(normalize_angle(-PI), PI, 1e-12);
        assert_approx_eq!(normalize_angle(TAU), 0.0, 1e-12);
        assert_approx_eq!(normalize_angle(-TAU - 0.25), -0.25, 1e-12);
    }

    #[test]
    fn test_angle_difference_wraps() {
        let diff = angle_difference(PI - 0.1, -PI + 0.1);
        assert_approx_eq!(diff, -0.2, 1e-12);
        let diff = angle_difference(-PI + 0.1, PI - 0.1);
        assert_approx_eq!(diff, 0.2, 1e-12);
    }

    #[test]
    fn test_pose_new_normalizes_heading() {
        let pose = Pose::new(1.0, 2.0, 213.0_f64.to_radians());
        assert_approx_eq!(pose.heading, (213.0_f64 - 360.0).to_radians(), 1e-12);
    }

    #[test]
    fn test_scanner_position() {
        let pose = Pose::new(100.0, 50.0, PI / 2.0);
        let (sx, sy) = pose.scanner_position(30.0);
        assert_approx_eq!(sx, 100.0, 1e-9);
        assert_approx_eq!(sy, 80.0, 1e-9);
    }

    #[test]
    fn test_control_from_ticks() {
        let control = Control::from_ticks(100.0, -20.0, 0.349);
        assert_approx_eq!(control.left, 34.9, 1e-9);
        assert_approx_eq!(control.right, -6.98, 1e-9);
        assert!(!control.is_straight());
        let reversed = control.reversed();
        assert_approx_eq!(reversed.left, -34.9, 1e-9);
        assert_approx_eq!(reversed.right, 6.98, 1e-9);
    }

    #[test]
    fn test_try_from_wrong_arity() {
        let err = Control::try_from(&[1.0, 2.0, 3.0][..]).unwrap_err();
        assert_eq!(
            err,
            FilterError::InputShape {
                record: "control",
                expected: 2,
                found: 3
            }
        );
        let err = Measurement::try_from(&[1.0][..]).unwrap_err();
        assert!(matches!(err, FilterError::InputShape { found: 1, .. }));
        assert!(Pose::try_from(&[0.0, 0.0][..]).is_err());
        assert!(Landmark::try_from(&[0.0, 0.0][..]).is_ok());
    }

    #[test]
    fn test_try_from_non_finite() {
        let err = Measurement::try_from(&[f64::NAN, 0.0][..]).unwrap_err();
        assert_eq!(err, FilterError::NonFiniteInput("measurement"));
    }

    #[test]
    fn test_measurement_to_cartesian() {
        let measurement = Measurement::new(1000.0, PI / 2.0);
        let (x, y) = measurement.to_cartesian();
        assert_approx_eq!(x, 0.0, 1e-9);
        assert_approx_eq!(y, 1000.0, 1e-9);
    }
}
