//! Error taxonomy for the localization filters.
//!
//! Every variant is local and recoverable by the caller. None of the filter
//! operations abort the process on their own; they report and leave the filter
//! state exactly as it was before the call.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// A control, measurement or pose record did not have the expected number of fields.
    #[error("Malformed {record} record: expected {expected} values, found {found}")]
    InputShape {
        record: &'static str,
        expected: usize,
        found: usize,
    },

    /// An input record contained NaN or an infinite value.
    #[error("Non-finite value in {0} record")]
    NonFiniteInput(&'static str),

    /// Every weight (or probability mass) was zero, so no distribution exists
    /// to draw from.
    #[error("Degenerate weights: cannot normalize by {max_weight}")]
    DegenerateWeights { max_weight: f64 },

    /// A weight handed to the resampler was negative, NaN or infinite.
    #[error("Invalid weight {weight} at index {index}: weights must be finite and non-negative")]
    InvalidWeight { index: usize, weight: f64 },

    /// An estimate was requested from an empty population.
    #[error("Cannot summarize an empty particle population")]
    EmptyPopulation,

    /// Filter parameters failed validation.
    #[error("Invalid filter configuration: {0}")]
    InvalidConfig(String),
}
