//! Landmark-based Monte Carlo localization.
//!
//! The population is an arena of `M` poses that lives for the whole run. Each cycle has two phases:
//!
//! 1. **Predict**: every particle is pushed through the stochastic [MotionModel].
//! 2. **Correct**: every particle is scored against the detected landmarks (see [compute_weights])
//!    and a new population of the same size is drawn with the resampling wheel
//!    (see [resample_wheel]). The new population is built completely before it replaces the old
//!    one.
//!
//! All randomness comes from a single [StdRng] owned by the filter and seeded at construction.
//! The draw order is part of the contract: the prior draws `x`, `y`, `heading` for each particle
//! in index order, prediction draws `left`, `right` for each particle in index order, and the
//! resampling wheel draws one start index followed by `M` offsets. Weight computation draws
//! nothing, so it may run in parallel without changing results.
use std::fmt::{self, Debug};

use log::{debug, warn};
use nalgebra::{Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::association::{DataAssociation, NearestLandmark};
use crate::error::FilterError;
use crate::measurements::MeasurementModel;
use crate::motion::MotionModel;
use crate::{Control, Landmark, Measurement, Pose, angle_difference, normalize_angle};

/// Particle filter configuration.
///
/// Distances are in millimeters and angles in radians. Missing fields in a configuration file fall
/// back to the defaults, which describe the small two-wheeled robot the filter was tuned for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Number of particles `M`, fixed for the lifetime of the filter
    pub num_particles: usize,
    /// Distance between the two wheels
    pub robot_width: f64,
    /// Distance of the scanner ahead of the rotation center
    pub scanner_displacement: f64,
    /// Conversion factor from encoder ticks to millimeters
    pub ticks_to_mm: f64,
    /// Wheel travel error per unit of travel
    pub control_motion_factor: f64,
    /// Additional wheel travel error per unit of wheel difference (slip when turning)
    pub control_turn_factor: f64,
    /// Standard deviation of the landmark range measurement
    pub measurement_distance_stddev: f64,
    /// Standard deviation of the landmark bearing measurement
    pub measurement_angle_stddev: f64,
    /// Mean of the Gaussian prior over the pose
    pub initial_pose: Pose,
    /// Standard deviations of the Gaussian prior over `[x, y, heading]`
    pub initial_std: [f64; 3],
    /// Gate of the nearest-landmark association
    pub max_association_distance: f64,
    /// Seed of the filter's random number generator
    pub seed: u64,
    /// Score particles on the rayon thread pool
    pub parallel_weights: bool,
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: 50,
            robot_width: 155.0,
            scanner_displacement: 30.0,
            ticks_to_mm: 0.349,
            control_motion_factor: 0.35,
            control_turn_factor: 0.6,
            measurement_distance_stddev: 200.0,
            measurement_angle_stddev: 15.0_f64.to_radians(),
            initial_pose: Pose::new(1850.0, 1897.0, 213.0_f64.to_radians()),
            initial_std: [100.0, 100.0, 10.0_f64.to_radians()],
            max_association_distance: 300.0,
            seed: 42,
            parallel_weights: false,
        }
    }
}
impl FilterConfig {
    /// Check that every parameter describes a usable filter.
    pub fn validate(&self) -> Result<(), FilterError> {
        fn positive(name: &str, value: f64) -> Result<(), FilterError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(FilterError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )))
            }
        }
        fn non_negative(name: &str, value: f64) -> Result<(), FilterError> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(FilterError::InvalidConfig(format!(
                    "{name} must be non-negative and finite, got {value}"
                )))
            }
        }
        if self.num_particles == 0 {
            return Err(FilterError::InvalidConfig(
                "num_particles must be at least 1".to_string(),
            ));
        }
        positive("robot_width", self.robot_width)?;
        positive("ticks_to_mm", self.ticks_to_mm)?;
        positive("measurement_distance_stddev", self.measurement_distance_stddev)?;
        positive("measurement_angle_stddev", self.measurement_angle_stddev)?;
        positive("max_association_distance", self.max_association_distance)?;
        non_negative("control_motion_factor", self.control_motion_factor)?;
        non_negative("control_turn_factor", self.control_turn_factor)?;
        for (name, value) in ["initial_std[x]", "initial_std[y]", "initial_std[heading]"]
            .iter()
            .zip(self.initial_std.iter())
        {
            non_negative(name, *value)?;
        }
        if !self.scanner_displacement.is_finite() {
            return Err(FilterError::InvalidConfig(
                "scanner_displacement must be finite".to_string(),
            ));
        }
        if !self.initial_pose.is_finite() {
            return Err(FilterError::InvalidConfig(
                "initial_pose must be finite".to_string(),
            ));
        }
        Ok(())
    }
    pub fn motion_model(&self) -> MotionModel {
        MotionModel::new(
            self.robot_width,
            self.control_motion_factor,
            self.control_turn_factor,
        )
    }
    pub fn measurement_model(&self) -> MeasurementModel {
        MeasurementModel::new(
            self.scanner_displacement,
            self.measurement_distance_stddev,
            self.measurement_angle_stddev,
        )
    }
    pub fn association(&self) -> NearestLandmark {
        NearestLandmark::new(self.max_association_distance)
    }
}

/// Score one particle and report how many detections were associated with it.
fn score_particle<A: DataAssociation + ?Sized>(
    pose: &Pose,
    measurements: &[Measurement],
    landmarks: &[Landmark],
    model: &MeasurementModel,
    association: &A,
) -> (f64, usize) {
    let assignments = association.assign(measurements, pose, model.scanner_displacement, landmarks);
    // No evidence, no penalty: a particle that sees no landmarks keeps weight 1.0.
    let weight: f64 = assignments
        .iter()
        .map(|a| {
            let predicted = model.expected_measurement(pose, &a.landmark);
            model.probability_of_measurement(&a.measurement, &predicted)
        })
        .product();
    (weight, assignments.len())
}

/// Importance weight of one particle.
///
/// The weight is the product of the measurement likelihoods of every assignment the association
/// produces for this pose. A particle with no assignments gets exactly `1.0`. The product may
/// underflow towards zero for many poorly matching assignments; that is left to the resampler.
pub fn compute_weight<A: DataAssociation + ?Sized>(
    pose: &Pose,
    measurements: &[Measurement],
    landmarks: &[Landmark],
    model: &MeasurementModel,
    association: &A,
) -> f64 {
    score_particle(pose, measurements, landmarks, model, association).0
}

/// Weight vector for a population, index-aligned with `poses`.
pub fn compute_weights<A: DataAssociation + ?Sized>(
    poses: &[Pose],
    measurements: &[Measurement],
    landmarks: &[Landmark],
    model: &MeasurementModel,
    association: &A,
) -> Vec<f64> {
    poses
        .iter()
        .map(|pose| compute_weight(pose, measurements, landmarks, model, association))
        .collect()
}

/// Same as [compute_weights] but scores particles on the rayon thread pool.
pub fn compute_weights_parallel<A: DataAssociation + Sync + ?Sized>(
    poses: &[Pose],
    measurements: &[Measurement],
    landmarks: &[Landmark],
    model: &MeasurementModel,
    association: &A,
) -> Vec<f64> {
    poses
        .par_iter()
        .map(|pose| compute_weight(pose, measurements, landmarks, model, association))
        .collect()
}

/// Low-variance "resampling wheel".
///
/// Draws `particles.len()` particles with replacement, each with probability proportional to its
/// weight. Starting from a uniformly random index, a running offset is advanced by
/// `U[0, 2 * max_weight)` per output slot and the index walks forward (wrapping around) while the
/// offset exceeds the current particle's weight. The input is not modified.
///
/// The wheel runs on the weights scaled by `1 / max_weight`, so each offset step is below 2 however
/// large the raw weights are.
///
/// # Errors
/// - [FilterError::InputShape] if `weights` and `particles` differ in length.
/// - [FilterError::EmptyPopulation] if there is nothing to resample.
/// - [FilterError::InvalidWeight] if any weight is negative or not finite.
/// - [FilterError::DegenerateWeights] if every weight is zero.
pub fn resample_wheel<T: Clone, R: Rng + ?Sized>(
    particles: &[T],
    weights: &[f64],
    rng: &mut R,
) -> Result<Vec<T>, FilterError> {
    let m = particles.len();
    if weights.len() != m {
        return Err(FilterError::InputShape {
            record: "weight vector",
            expected: m,
            found: weights.len(),
        });
    }
    if m == 0 {
        return Err(FilterError::EmptyPopulation);
    }
    if let Some((index, weight)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !w.is_finite() || **w < 0.0)
    {
        return Err(FilterError::InvalidWeight {
            index,
            weight: *weight,
        });
    }
    let max_weight = weights.iter().copied().fold(0.0, f64::max);
    if max_weight <= 0.0 {
        return Err(FilterError::DegenerateWeights { max_weight });
    }
    let scaled: Vec<f64> = weights.iter().map(|w| w / max_weight).collect();
    let mut index = rng.random_range(0..m);
    let mut offset = 0.0;
    let mut resampled = Vec::with_capacity(m);
    for _ in 0..m {
        offset += rng.random::<f64>() * 2.0;
        while offset > scaled[index] {
            offset -= scaled[index];
            index = (index + 1) % m;
        }
        resampled.push(particles[index].clone());
    }
    Ok(resampled)
}

/// Summarize a population as a single pose.
///
/// Position is the arithmetic mean. Heading is the circular mean
/// $\bar\theta = \mathrm{atan2}(\sum \sin\theta_i, \sum \cos\theta_i)$, so a cluster straddling the
/// $\pm\pi$ seam averages to $\approx\pi$ rather than to $0$.
pub fn estimate(poses: &[Pose]) -> Result<Pose, FilterError> {
    if poses.is_empty() {
        return Err(FilterError::EmptyPopulation);
    }
    let n = poses.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_cos, mut sum_sin) = (0.0, 0.0, 0.0, 0.0);
    for pose in poses {
        sum_x += pose.x;
        sum_y += pose.y;
        sum_cos += pose.heading.cos();
        sum_sin += pose.heading.sin();
    }
    Ok(Pose {
        x: sum_x / n,
        y: sum_y / n,
        heading: normalize_angle(sum_sin.atan2(sum_cos)),
    })
}

/// Population covariance of `[x, y, heading]` about `mean`, using wrapped heading differences.
pub fn covariance(poses: &[Pose], mean: &Pose) -> Result<Matrix3<f64>, FilterError> {
    if poses.is_empty() {
        return Err(FilterError::EmptyPopulation);
    }
    let n = poses.len() as f64;
    let mut cov = Matrix3::<f64>::zeros();
    for pose in poses {
        let diff = Vector3::new(
            pose.x - mean.x,
            pose.y - mean.y,
            angle_difference(pose.heading, mean.heading),
        );
        cov += diff * diff.transpose();
    }
    Ok(cov / n)
}

/// Effective sample size $(\sum w)^2 / \sum w^2$ of an unnormalized weight vector.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum: f64 = weights.iter().sum();
    let sum_of_squares: f64 = weights.iter().map(|w| w * w).sum();
    if sum_of_squares > 0.0 && sum.is_finite() {
        sum * sum / sum_of_squares
    } else {
        0.0
    }
}

/// Diagnostics of one correction step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepSummary {
    /// Number of particles that had at least one assignment
    pub particles_with_evidence: usize,
    /// Total number of assignments over all particles
    pub total_assignments: usize,
    /// Largest weight of the step
    pub max_weight: f64,
    /// Effective sample size of the step's weights before resampling
    pub effective_sample_size: f64,
}

/// Landmark-based Monte Carlo localization filter.
#[derive(Clone)]
pub struct ParticleFilter {
    particles: Vec<Pose>,
    motion: MotionModel,
    measurement: MeasurementModel,
    rng: StdRng,
    parallel_weights: bool,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ParticleFilter");
        debug
            .field("num_particles", &self.particles.len())
            .field("motion", &self.motion)
            .field("measurement", &self.measurement);
        if let Ok(mean) = self.estimate() {
            debug.field(
                "mean",
                &format_args!(
                    "({:.1} mm, {:.1} mm, {:.2} deg)",
                    mean.x,
                    mean.y,
                    mean.heading.to_degrees()
                ),
            );
        }
        debug.finish()
    }
}
impl ParticleFilter {
    /// Create a filter from an explicit initial population.
    pub fn new(
        particles: Vec<Pose>,
        motion: MotionModel,
        measurement: MeasurementModel,
        seed: u64,
    ) -> Result<Self, FilterError> {
        if particles.is_empty() {
            return Err(FilterError::EmptyPopulation);
        }
        if particles.iter().any(|p| !p.is_finite()) {
            return Err(FilterError::NonFiniteInput("pose"));
        }
        Ok(ParticleFilter {
            particles,
            motion,
            measurement,
            rng: StdRng::seed_from_u64(seed),
            parallel_weights: false,
        })
    }

    /// Create a filter whose particles are drawn from a Gaussian prior around `initial_pose`.
    ///
    /// For each particle, `x`, `y` and `heading` are drawn in that order with standard deviations
    /// `initial_std`. Sampled headings are normalized into $(-\pi, \pi]$.
    pub fn from_prior(
        initial_pose: &Pose,
        initial_std: [f64; 3],
        num_particles: usize,
        motion: MotionModel,
        measurement: MeasurementModel,
        seed: u64,
    ) -> Result<Self, FilterError> {
        if num_particles == 0 {
            return Err(FilterError::EmptyPopulation);
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let prior = |mean: f64, std: f64| {
            Normal::new(mean, std).map_err(|e| {
                FilterError::InvalidConfig(format!("invalid prior N({mean}, {std}): {e}"))
            })
        };
        let normal_x = prior(initial_pose.x, initial_std[0])?;
        let normal_y = prior(initial_pose.y, initial_std[1])?;
        let normal_heading = prior(initial_pose.heading, initial_std[2])?;
        let particles = (0..num_particles)
            .map(|_| {
                let x = normal_x.sample(&mut rng);
                let y = normal_y.sample(&mut rng);
                let heading = normal_heading.sample(&mut rng);
                Pose::new(x, y, heading)
            })
            .collect();
        Ok(ParticleFilter {
            particles,
            motion,
            measurement,
            rng,
            parallel_weights: false,
        })
    }

    /// Create a filter from a validated [FilterConfig].
    pub fn from_config(config: &FilterConfig) -> Result<Self, FilterError> {
        config.validate()?;
        let filter = Self::from_prior(
            &config.initial_pose,
            config.initial_std,
            config.num_particles,
            config.motion_model(),
            config.measurement_model(),
            config.seed,
        )?;
        Ok(filter.with_parallel_weights(config.parallel_weights))
    }

    /// Score particles on the rayon thread pool during [ParticleFilter::correct].
    pub fn with_parallel_weights(mut self, parallel: bool) -> Self {
        self.parallel_weights = parallel;
        self
    }

    /// Prediction step: propagate every particle through a noisy copy of `control`.
    ///
    /// A non-finite control is rejected before any particle is touched.
    pub fn predict(&mut self, control: &Control) -> Result<(), FilterError> {
        self.motion.predict(&mut self.particles, control, &mut self.rng)
    }

    /// Importance weights of the current population for the given detections.
    pub fn compute_weights<A: DataAssociation + Sync + ?Sized>(
        &self,
        measurements: &[Measurement],
        landmarks: &[Landmark],
        association: &A,
    ) -> Vec<f64> {
        let model = &self.measurement;
        if self.parallel_weights {
            compute_weights_parallel(&self.particles, measurements, landmarks, model, association)
        } else {
            compute_weights(&self.particles, measurements, landmarks, model, association)
        }
    }

    /// Weight every particle against the detections without touching the population.
    ///
    /// The summary carries the assignment counts even when the weights turn out degenerate.
    pub fn score<A: DataAssociation + Sync + ?Sized>(
        &self,
        measurements: &[Measurement],
        landmarks: &[Landmark],
        association: &A,
    ) -> (Vec<f64>, StepSummary) {
        let model = &self.measurement;
        let scored: Vec<(f64, usize)> = if self.parallel_weights {
            self.particles
                .par_iter()
                .map(|p| score_particle(p, measurements, landmarks, model, association))
                .collect()
        } else {
            self.particles
                .iter()
                .map(|p| score_particle(p, measurements, landmarks, model, association))
                .collect()
        };
        let weights: Vec<f64> = scored.iter().map(|(w, _)| *w).collect();
        let summary = StepSummary {
            particles_with_evidence: scored.iter().filter(|(_, n)| *n > 0).count(),
            total_assignments: scored.iter().map(|(_, n)| n).sum(),
            max_weight: weights.iter().copied().fold(0.0, f64::max),
            effective_sample_size: effective_sample_size(&weights),
        };
        (weights, summary)
    }

    /// Replace the population with a wheel resample drawn by `weights`.
    ///
    /// On error the population is left exactly as it was.
    pub fn resample(&mut self, weights: &[f64]) -> Result<(), FilterError> {
        self.particles = resample_wheel(&self.particles, weights, &mut self.rng)?;
        Ok(())
    }

    /// Correction step: [ParticleFilter::score] followed by [ParticleFilter::resample].
    ///
    /// On [FilterError::DegenerateWeights] the population is left exactly as it was; the caller
    /// decides whether to skip this correction or abort.
    pub fn correct<A: DataAssociation + Sync + ?Sized>(
        &mut self,
        measurements: &[Measurement],
        landmarks: &[Landmark],
        association: &A,
    ) -> Result<StepSummary, FilterError> {
        let (weights, summary) = self.score(measurements, landmarks, association);
        if let Err(e) = self.resample(&weights) {
            warn!("Skipping resampling: {e}");
            return Err(e);
        }
        debug!(
            "Resampled {} particles ({} with evidence, ESS {:.1})",
            self.particles.len(),
            summary.particles_with_evidence,
            summary.effective_sample_size
        );
        Ok(summary)
    }

    /// Current pose estimate (mean position, circular mean heading).
    pub fn estimate(&self) -> Result<Pose, FilterError> {
        estimate(&self.particles)
    }

    /// Covariance of `[x, y, heading]` about the current estimate.
    pub fn covariance(&self) -> Result<Matrix3<f64>, FilterError> {
        let mean = self.estimate()?;
        covariance(&self.particles, &mean)
    }

    pub fn particles(&self) -> &[Pose] {
        &self.particles
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn motion_model(&self) -> &MotionModel {
        &self.motion
    }

    pub fn measurement_model(&self) -> &MeasurementModel {
        &self.measurement
    }
}
