//! One-dimensional discrete Bayes filter.
//!
//! The belief over an integer grid of positions is a [Distribution]: a contiguous run of
//! probabilities starting at some offset, implicitly zero everywhere else. Motion is applied by
//! convolving the belief with the movement distribution and a measurement is incorporated by
//! multiplying the belief with the measurement distribution and renormalizing.
use log::debug;

use crate::error::FilterError;

/// Discrete distribution over consecutive integer positions.
#[derive(Clone, Debug, PartialEq)]
pub struct Distribution {
    offset: i64,
    values: Vec<f64>,
}

impl Distribution {
    /// Create a distribution whose first value sits at position `offset`.
    ///
    /// The values are taken as given (not normalized). They must be finite and non-negative.
    pub fn new(offset: i64, values: Vec<f64>) -> Result<Self, FilterError> {
        if values.is_empty() {
            return Err(FilterError::EmptyPopulation);
        }
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(FilterError::NonFiniteInput("distribution value"));
        }
        Ok(Distribution { offset, values })
    }

    /// All mass at a single position.
    pub fn unit_pulse(center: i64) -> Self {
        Distribution {
            offset: center,
            values: vec![1.0],
        }
    }

    /// Normalized triangle centered on `center` with the given half width.
    ///
    /// A half width of 1 degenerates into a unit pulse.
    pub fn triangle(center: i64, half_width: usize) -> Result<Self, FilterError> {
        if half_width == 0 {
            return Err(FilterError::EmptyPopulation);
        }
        let w = half_width as i64;
        let values = (-w + 1..w).map(|i| (w - i.abs()) as f64).collect();
        let mut triangle = Distribution::new(center - w + 1, values)?;
        triangle.normalize()?;
        Ok(triangle)
    }

    /// Normalized Gaussian with mean `mu` and standard deviation `sigma`, truncated `cut` standard
    /// deviations away from the mean.
    pub fn gaussian(mu: f64, sigma: f64, cut: f64) -> Result<Self, FilterError> {
        if !(mu.is_finite() && sigma.is_finite() && cut.is_finite()) {
            return Err(FilterError::NonFiniteInput("gaussian parameters"));
        }
        if sigma <= 0.0 || cut <= 0.0 {
            return Err(FilterError::InvalidConfig(format!(
                "gaussian needs positive sigma and cut, got sigma = {sigma}, cut = {cut}"
            )));
        }
        let extent = cut * sigma;
        let start = (mu - extent).floor() as i64;
        let stop = (mu + extent).ceil() as i64;
        let values = (start..=stop)
            .map(|x| {
                let d = (x as f64 - mu) / sigma;
                (-0.5 * d * d).exp()
            })
            .collect();
        let mut gaussian = Distribution::new(start, values)?;
        gaussian.normalize()?;
        Ok(gaussian)
    }

    /// First position with explicit storage.
    pub fn start(&self) -> i64 {
        self.offset
    }

    /// Last position with explicit storage.
    pub fn stop(&self) -> i64 {
        self.offset + self.values.len() as i64 - 1
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Probability at `position`, zero outside the stored range.
    pub fn value(&self, position: i64) -> f64 {
        let index = position - self.offset;
        if index < 0 {
            return 0.0;
        }
        self.values.get(index as usize).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Scale the values so they sum to one.
    pub fn normalize(&mut self) -> Result<(), FilterError> {
        let total = self.total();
        if !(total > 0.0 && total.is_finite()) {
            return Err(FilterError::DegenerateWeights { max_weight: total });
        }
        self.values.iter_mut().for_each(|v| *v /= total);
        Ok(())
    }

    /// Expected position.
    pub fn mean(&self) -> Result<f64, FilterError> {
        let total = self.total();
        if !(total > 0.0 && total.is_finite()) {
            return Err(FilterError::DegenerateWeights { max_weight: total });
        }
        let weighted: f64 = self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (self.offset + i as i64) as f64 * v)
            .sum();
        Ok(weighted / total)
    }

    /// The same distribution moved by `delta` positions.
    pub fn shifted(&self, delta: i64) -> Self {
        Distribution {
            offset: self.offset + delta,
            values: self.values.clone(),
        }
    }

    /// Distribution of the sum of two independent positions. Used for the prediction step.
    pub fn convolve(&self, other: &Distribution) -> Distribution {
        let mut values = vec![0.0; self.values.len() + other.values.len() - 1];
        for (i, a) in self.values.iter().enumerate() {
            for (j, b) in other.values.iter().enumerate() {
                values[i + j] += a * b;
            }
        }
        Distribution {
            offset: self.offset + other.offset,
            values,
        }
    }

    /// Normalized pointwise product over the union of both supports. Used for the correction step.
    ///
    /// # Errors
    /// [FilterError::DegenerateWeights] if the two distributions do not overlap.
    pub fn multiply(&self, other: &Distribution) -> Result<Distribution, FilterError> {
        let start = self.start().min(other.start());
        let stop = self.stop().max(other.stop());
        let values = (start..=stop)
            .map(|position| self.value(position) * other.value(position))
            .collect();
        let mut product = Distribution::new(start, values)?;
        product.normalize()?;
        Ok(product)
    }
}

/// Discrete Bayes filter over a one-dimensional position.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramFilter {
    belief: Distribution,
}
impl HistogramFilter {
    pub fn new(prior: Distribution) -> Self {
        HistogramFilter { belief: prior }
    }
    /// Move the belief by convolving it with the movement distribution.
    pub fn predict(&mut self, movement: &Distribution) {
        self.belief = self.belief.convolve(movement);
        debug!(
            "Histogram prediction spans [{}, {}]",
            self.belief.start(),
            self.belief.stop()
        );
    }
    /// Incorporate a position measurement. On error the belief is left unchanged.
    pub fn correct(&mut self, measurement: &Distribution) -> Result<(), FilterError> {
        self.belief = self.belief.multiply(measurement)?;
        debug!(
            "Histogram correction spans [{}, {}]",
            self.belief.start(),
            self.belief.stop()
        );
        Ok(())
    }
    pub fn belief(&self) -> &Distribution {
        &self.belief
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_unit_pulse() {
        let pulse = Distribution::unit_pulse(10);
        assert_eq!(pulse.start(), 10);
        assert_eq!(pulse.stop(), 10);
        assert_eq!(pulse.value(10), 1.0);
        assert_eq!(pulse.value(9), 0.0);
        assert_eq!(pulse.value(11), 0.0);
    }

    #[test]
    fn test_triangle() {
        let triangle = Distribution::triangle(20, 3).unwrap();
        assert_eq!(triangle.start(), 18);
        assert_eq!(triangle.stop(), 22);
        assert_approx_eq!(triangle.total(), 1.0, 1e-12);
        assert_approx_eq!(triangle.value(20), 3.0 / 9.0, 1e-12);
        assert_approx_eq!(triangle.value(18), 1.0 / 9.0, 1e-12);
        assert_approx_eq!(triangle.mean().unwrap(), 20.0, 1e-12);
        assert_eq!(Distribution::triangle(5, 1).unwrap(), Distribution::unit_pulse(5));
        assert!(Distribution::triangle(5, 0).is_err());
    }

    #[test]
    fn test_gaussian() {
        let gaussian = Distribution::gaussian(50.0, 4.0, 5.0).unwrap();
        assert_eq!(gaussian.start(), 30);
        assert_eq!(gaussian.stop(), 70);
        assert_approx_eq!(gaussian.total(), 1.0, 1e-12);
        assert_approx_eq!(gaussian.mean().unwrap(), 50.0, 1e-9);
        assert!(gaussian.value(50) > gaussian.value(45));
        assert!(Distribution::gaussian(0.0, 0.0, 5.0).is_err());
    }

    #[test]
    fn test_new_rejects_bad_values() {
        assert_eq!(
            Distribution::new(0, Vec::new()).unwrap_err(),
            FilterError::EmptyPopulation
        );
        assert!(Distribution::new(0, vec![0.5, f64::NAN]).is_err());
        assert!(Distribution::new(0, vec![0.5, -0.1]).is_err());
    }

    #[test]
    fn test_normalize_zero_mass() {
        let mut zero = Distribution::new(0, vec![0.0, 0.0]).unwrap();
        assert!(matches!(
            zero.normalize(),
            Err(FilterError::DegenerateWeights { .. })
        ));
        assert!(zero.mean().is_err());
    }

    #[test]
    fn test_shifted() {
        let moved = Distribution::triangle(10, 2).unwrap().shifted(15);
        assert_eq!(moved.start(), 24);
        assert_approx_eq!(moved.mean().unwrap(), 25.0, 1e-12);
    }

    #[test]
    fn test_convolve_with_pulse_is_shift() {
        let belief = Distribution::triangle(10, 3).unwrap();
        let moved = belief.convolve(&Distribution::unit_pulse(20));
        assert_eq!(moved, belief.shifted(20));
    }

    #[test]
    fn test_convolve_widens_and_keeps_mass() {
        let a = Distribution::triangle(10, 3).unwrap();
        let b = Distribution::triangle(20, 2).unwrap();
        let c = a.convolve(&b);
        assert_eq!(c.start(), a.start() + b.start());
        assert_eq!(c.values().len(), a.values().len() + b.values().len() - 1);
        assert_approx_eq!(c.total(), 1.0, 1e-12);
        assert_approx_eq!(c.mean().unwrap(), 30.0, 1e-9);
    }

    #[test]
    fn test_multiply_sharpens() {
        let a = Distribution::triangle(100, 10).unwrap();
        let b = Distribution::triangle(104, 10).unwrap();
        let c = a.multiply(&b).unwrap();
        assert_eq!(c.start(), a.start());
        assert_eq!(c.stop(), b.stop());
        assert_approx_eq!(c.total(), 1.0, 1e-12);
        assert_approx_eq!(c.mean().unwrap(), 102.0, 1e-9);
        assert!(c.value(102) > a.value(102));
    }

    #[test]
    fn test_multiply_disjoint_is_degenerate() {
        let a = Distribution::unit_pulse(0);
        let b = Distribution::unit_pulse(5);
        assert!(matches!(
            a.multiply(&b),
            Err(FilterError::DegenerateWeights { .. })
        ));
    }

    #[test]
    fn test_histogram_filter_tracks_motion() {
        let mut filter = HistogramFilter::new(Distribution::unit_pulse(10));
        let mut position = 10;
        for _ in 0..10 {
            position += 20;
            filter.predict(&Distribution::triangle(20, 10).unwrap());
            filter
                .correct(&Distribution::triangle(position, 30).unwrap())
                .unwrap();
        }
        assert_approx_eq!(filter.belief().mean().unwrap(), 210.0, 1e-6);
        assert_approx_eq!(filter.belief().total(), 1.0, 1e-9);
    }

    #[test]
    fn test_histogram_filter_failed_correction_keeps_belief() {
        let mut filter = HistogramFilter::new(Distribution::unit_pulse(0));
        let before = filter.belief().clone();
        assert!(filter.correct(&Distribution::unit_pulse(100)).is_err());
        assert_eq!(filter.belief(), &before);
    }
}
