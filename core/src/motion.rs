//! Differential-drive motion model.
//!
//! The deterministic transition is the closed-form circular-arc solution for a robot whose left and
//! right wheels travel `l` and `r` millimeters during one step:
//!
//! - Straight motion ($l = r$):
//!
//! $$
//! x' = x + l \cos\theta, \quad y' = y + l \sin\theta, \quad \theta' = \theta
//! $$
//!
//! - Arc motion ($l \neq r$), with turn angle $\alpha = (r - l) / w$ and left-wheel radius
//!   $R = l / \alpha$:
//!
//! $$
//! x' = x + (R + w/2)(\sin(\theta + \alpha) - \sin\theta), \quad
//! y' = y + (R + w/2)(-\cos(\theta + \alpha) + \cos\theta), \quad
//! \theta' = \theta + \alpha
//! $$
//!
//! The stochastic variant samples the two wheel travels from Gaussians centered on the commanded
//! values before applying the transition. Straight-line error grows with the distance travelled and
//! turn-induced slip grows with the difference between the two wheels.
use log::trace;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::FilterError;
use crate::{Control, Pose, normalize_angle};

/// Deterministic differential-drive state transition.
///
/// # Arguments
/// * `pose` - Pose at the start of the step.
/// * `control` - Wheel travel during the step.
/// * `robot_width` - Distance between the two wheels (same length unit as the control).
pub fn transition(pose: &Pose, control: &Control, robot_width: f64) -> Pose {
    let (l, r) = (control.left, control.right);
    if control.is_straight() {
        Pose {
            x: pose.x + l * pose.heading.cos(),
            y: pose.y + l * pose.heading.sin(),
            heading: pose.heading,
        }
    } else {
        let alpha = (r - l) / robot_width;
        let radius = l / alpha;
        let center_offset = radius + robot_width / 2.0;
        let heading = pose.heading + alpha;
        Pose {
            x: pose.x + center_offset * (heading.sin() - pose.heading.sin()),
            y: pose.y + center_offset * (-heading.cos() + pose.heading.cos()),
            heading: normalize_angle(heading),
        }
    }
}

/// Odometry noise model and robot geometry for the stochastic prediction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionModel {
    /// Distance between the wheels in millimeters
    pub robot_width: f64,
    /// Standard deviation of wheel travel per unit of travel (straight-line error)
    pub control_motion_factor: f64,
    /// Standard deviation of wheel travel per unit of wheel difference (slip when turning)
    pub control_turn_factor: f64,
}
impl Default for MotionModel {
    fn default() -> Self {
        MotionModel {
            robot_width: 155.0,
            control_motion_factor: 0.35,
            control_turn_factor: 0.6,
        }
    }
}
impl MotionModel {
    pub fn new(robot_width: f64, control_motion_factor: f64, control_turn_factor: f64) -> Self {
        MotionModel {
            robot_width,
            control_motion_factor,
            control_turn_factor,
        }
    }
    /// Noise-free transition using this model's robot width.
    pub fn transition(&self, pose: &Pose, control: &Control) -> Pose {
        transition(pose, control, self.robot_width)
    }
    /// Standard deviations `(sigma_left, sigma_right)` of the wheel travel for a given control.
    pub fn control_std(&self, control: &Control) -> (f64, f64) {
        let turn_variance = (self.control_turn_factor * (control.left - control.right)).powi(2);
        let left_variance = (self.control_motion_factor * control.left).powi(2) + turn_variance;
        let right_variance = (self.control_motion_factor * control.right).powi(2) + turn_variance;
        (left_variance.sqrt(), right_variance.sqrt())
    }
    /// Build the pair of wheel-travel distributions for `control`.
    ///
    /// The distributions only depend on the control, so they are built once per step and reused
    /// for every particle.
    pub fn control_distributions(
        &self,
        control: &Control,
    ) -> Result<(Normal<f64>, Normal<f64>), FilterError> {
        if !control.is_finite() {
            return Err(FilterError::NonFiniteInput("control"));
        }
        let (sigma_left, sigma_right) = self.control_std(control);
        let left = Normal::new(control.left, sigma_left)
            .map_err(|_| FilterError::NonFiniteInput("control"))?;
        let right = Normal::new(control.right, sigma_right)
            .map_err(|_| FilterError::NonFiniteInput("control"))?;
        Ok((left, right))
    }
    /// Sample a noisy control from the wheel-travel distributions. Draws left first, then right.
    pub fn sample_control<R: Rng + ?Sized>(
        distributions: &(Normal<f64>, Normal<f64>),
        rng: &mut R,
    ) -> Control {
        let left = distributions.0.sample(rng);
        let right = distributions.1.sample(rng);
        Control { left, right }
    }
    /// Propagate every pose in place through a freshly sampled control.
    ///
    /// Poses are visited in index order and each one consumes exactly two draws (left, then
    /// right) from `rng`, so a seeded generator reproduces the same population.
    pub fn predict<R: Rng + ?Sized>(
        &self,
        poses: &mut [Pose],
        control: &Control,
        rng: &mut R,
    ) -> Result<(), FilterError> {
        let distributions = self.control_distributions(control)?;
        trace!(
            "Predicting {} particles with {} (sigma = {:?})",
            poses.len(),
            control,
            self.control_std(control)
        );
        for pose in poses.iter_mut() {
            let sampled = Self::sample_control(&distributions, rng);
            *pose = self.transition(pose, &sampled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::PI;

    #[test]
    fn test_zero_control_is_identity() {
        let poses = [
            Pose::new(0.0, 0.0, 0.0),
            Pose::new(1850.0, 1897.0, 213.0_f64.to_radians()),
            Pose::new(-12.5, 400.0, PI),
        ];
        for pose in poses.iter() {
            let next = transition(pose, &Control::new(0.0, 0.0), 155.0);
            assert_eq!(next, *pose);
        }
    }

    #[test]
    fn test_straight_line_exact() {
        let next = transition(&Pose::new(0.0, 0.0, 0.0), &Control::new(100.0, 100.0), 155.0);
        assert_eq!(next, Pose::new(100.0, 0.0, 0.0));
    }

    #[test]
    fn test_straight_line_along_heading() {
        let next = transition(
            &Pose::new(10.0, 20.0, PI / 2.0),
            &Control::new(50.0, 50.0),
            155.0,
        );
        assert_approx_eq!(next.x, 10.0, 1e-9);
        assert_approx_eq!(next.y, 70.0, 1e-9);
        assert_approx_eq!(next.heading, PI / 2.0, 1e-12);
    }

    #[test]
    fn test_turn_in_place() {
        // Opposite wheel travel spins about the rotation center.
        let width = 155.0;
        let quarter_turn = PI / 2.0 * width / 2.0;
        let next = transition(
            &Pose::new(0.0, 0.0, 0.0),
            &Control::new(-quarter_turn, quarter_turn),
            width,
        );
        assert_approx_eq!(next.x, 0.0, 1e-9);
        assert_approx_eq!(next.y, 0.0, 1e-9);
        assert_approx_eq!(next.heading, PI / 2.0, 1e-9);
    }

    #[test]
    fn test_arc_then_reverse_returns_to_start() {
        let width = 155.0;
        let controls = [
            Control::new(100.0, 120.0),
            Control::new(35.0, -10.0),
            Control::new(-80.0, 250.0),
            Control::new(0.0, 15.0),
        ];
        let start = Pose::new(1850.0, 1897.0, 3.0);
        for control in controls.iter() {
            let forward = transition(&start, control, width);
            let back = transition(&forward, &control.reversed(), width);
            assert_approx_eq!(back.x, start.x, 1e-6);
            assert_approx_eq!(back.y, start.y, 1e-6);
            assert_approx_eq!(angle_diff(back.heading, start.heading), 0.0, 1e-9);
        }
    }

    fn angle_diff(a: f64, b: f64) -> f64 {
        crate::angle_difference(a, b)
    }

    #[test]
    fn test_heading_stays_normalized() {
        let mut pose = Pose::new(0.0, 0.0, 3.0);
        for _ in 0..100 {
            pose = transition(&pose, &Control::new(10.0, 60.0), 155.0);
            assert!(pose.heading > -PI && pose.heading <= PI);
        }
    }

    #[test]
    fn test_control_std() {
        let model = MotionModel::new(155.0, 0.35, 0.6);
        let (sl, sr) = model.control_std(&Control::new(100.0, 60.0));
        let turn = (0.6_f64 * 40.0).powi(2);
        assert_approx_eq!(sl, ((35.0_f64).powi(2) + turn).sqrt(), 1e-9);
        assert_approx_eq!(sr, ((21.0_f64).powi(2) + turn).sqrt(), 1e-9);
    }

    #[test]
    fn test_predict_without_noise_matches_transition() {
        let model = MotionModel::new(155.0, 0.0, 0.0);
        let mut rng = StdRng::seed_from_u64(7);
        let control = Control::new(40.0, 55.0);
        let start = Pose::new(5.0, -3.0, 0.4);
        let mut poses = vec![start; 10];
        model.predict(&mut poses, &control, &mut rng).unwrap();
        let expected = transition(&start, &control, 155.0);
        for pose in poses.iter() {
            assert_approx_eq!(pose.x, expected.x, 1e-9);
            assert_approx_eq!(pose.y, expected.y, 1e-9);
            assert_approx_eq!(pose.heading, expected.heading, 1e-12);
        }
    }

    #[test]
    fn test_predict_is_reproducible() {
        let model = MotionModel::default();
        let control = Control::new(40.0, 55.0);
        let mut a = vec![Pose::default(); 25];
        let mut b = vec![Pose::default(); 25];
        model
            .predict(&mut a, &control, &mut StdRng::seed_from_u64(11))
            .unwrap();
        model
            .predict(&mut b, &control, &mut StdRng::seed_from_u64(11))
            .unwrap();
        assert_eq!(a, b);
        // Noise actually spreads the particles.
        assert!(a.iter().any(|p| (p.x - a[0].x).abs() > 1e-6));
    }

    #[test]
    fn test_predict_rejects_non_finite_control() {
        let model = MotionModel::default();
        let mut poses = vec![Pose::default(); 3];
        let err = model
            .predict(
                &mut poses,
                &Control::new(f64::INFINITY, 0.0),
                &mut StdRng::seed_from_u64(0),
            )
            .unwrap_err();
        assert_eq!(err, FilterError::NonFiniteInput("control"));
        assert!(poses.iter().all(|p| *p == Pose::default()));
    }
}
