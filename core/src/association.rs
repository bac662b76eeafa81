//! Data association between detected measurements and the landmark map.
//!
//! Association is pose dependent: the same detection can be matched to different landmarks (or
//! dropped) by different particles. The filter only depends on the [DataAssociation] trait; the
//! matching policy is up to the implementor. [NearestLandmark] projects each detection into the
//! map frame from the particle's scanner pose and pairs it with the closest landmark inside a
//! gating distance. Any closure with the right signature is also an association.
use crate::{Landmark, Measurement, Pose};

/// One detection paired with the landmark it is believed to observe.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Assignment {
    pub measurement: Measurement,
    pub landmark: Landmark,
}

/// Pairs detected measurements with map landmarks as seen from one candidate pose.
///
/// Implementations must be pure with respect to their inputs; they may be called concurrently
/// for different particles.
pub trait DataAssociation {
    /// Return zero or more assignments. Unmatched measurements are dropped.
    fn assign(
        &self,
        measurements: &[Measurement],
        pose: &Pose,
        scanner_displacement: f64,
        landmarks: &[Landmark],
    ) -> Vec<Assignment>;
}

impl<F> DataAssociation for F
where
    F: Fn(&[Measurement], &Pose, f64, &[Landmark]) -> Vec<Assignment>,
{
    fn assign(
        &self,
        measurements: &[Measurement],
        pose: &Pose,
        scanner_displacement: f64,
        landmarks: &[Landmark],
    ) -> Vec<Assignment> {
        self(measurements, pose, scanner_displacement, landmarks)
    }
}

/// Nearest-neighbour association with a distance gate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NearestLandmark {
    /// Maximum map-frame distance (mm) between a projected detection and its landmark
    pub max_distance: f64,
}
impl Default for NearestLandmark {
    fn default() -> Self {
        NearestLandmark {
            max_distance: 300.0,
        }
    }
}
impl NearestLandmark {
    pub fn new(max_distance: f64) -> Self {
        NearestLandmark { max_distance }
    }
}

/// Map-frame position of a detection seen from `pose`.
pub fn measurement_to_world(
    measurement: &Measurement,
    pose: &Pose,
    scanner_displacement: f64,
) -> (f64, f64) {
    let (scanner_x, scanner_y) = pose.scanner_position(scanner_displacement);
    let (local_x, local_y) = measurement.to_cartesian();
    let (sin, cos) = pose.heading.sin_cos();
    (
        scanner_x + cos * local_x - sin * local_y,
        scanner_y + sin * local_x + cos * local_y,
    )
}

impl DataAssociation for NearestLandmark {
    fn assign(
        &self,
        measurements: &[Measurement],
        pose: &Pose,
        scanner_displacement: f64,
        landmarks: &[Landmark],
    ) -> Vec<Assignment> {
        let max_distance_squared = self.max_distance * self.max_distance;
        measurements
            .iter()
            .filter_map(|measurement| {
                let (world_x, world_y) =
                    measurement_to_world(measurement, pose, scanner_displacement);
                landmarks
                    .iter()
                    .map(|landmark| {
                        let dx = landmark.x - world_x;
                        let dy = landmark.y - world_y;
                        (landmark, dx * dx + dy * dy)
                    })
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .filter(|(_, distance_squared)| *distance_squared < max_distance_squared)
                    .map(|(landmark, _)| Assignment {
                        measurement: *measurement,
                        landmark: *landmark,
                    })
            })
            .collect()
    }
}
