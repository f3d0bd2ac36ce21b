//! DP-SGD gradient aggregation: clip, sum, noise, normalize.

use rand::Rng;

use crate::clipping::clip_and_sum;
use crate::error::{DpError, Result};
use crate::noise::GaussianMechanism;
use crate::tensor::Tensor;

/// One DP-SGD update rule: clip each gradient to `C`, sum, add
/// `N(0, (sigma C)^2)` noise, divide by the expected batch size.
#[derive(Clone, Debug)]
pub struct DpSgdAggregator {
    l2_clip_norm: f64,
    mechanism: GaussianMechanism,
    normalize_by: f64,
}

/// Output of one aggregation step.
#[derive(Clone, Debug)]
pub struct AggregatedGradient {
    /// Noisy, normalized gradient.
    pub gradient: Tensor,
    /// Per-example norms before clipping.
    pub norms: Vec<f64>,
    /// Number of examples whose gradient was clipped.
    pub num_clipped: usize,
}

impl DpSgdAggregator {
    /// Create a new DP-SGD aggregator.
    ///
    /// `noise_multiplier` may be 0 for a non-private baseline.
    pub fn new(l2_clip_norm: f64, noise_multiplier: f64, normalize_by: f64) -> Result<Self> {
        if !l2_clip_norm.is_finite() || l2_clip_norm <= 0.0 {
            return Err(DpError::invalid("l2_clip_norm must be positive and finite"));
        }
        if !normalize_by.is_finite() || normalize_by <= 0.0 {
            return Err(DpError::invalid("normalize_by must be positive"));
        }
        Ok(Self {
            l2_clip_norm,
            mechanism: GaussianMechanism::new(noise_multiplier, l2_clip_norm)?,
            normalize_by,
        })
    }

    /// Per-example L2 bound `C`.
    pub fn l2_clip_norm(&self) -> f64 {
        self.l2_clip_norm
    }

    /// Noise multiplier `sigma`.
    pub fn noise_multiplier(&self) -> f64 {
        self.mechanism.noise_multiplier()
    }

    /// Standard deviation of the noise added to the clipped sum.
    pub fn noise_stddev(&self) -> f64 {
        self.mechanism.stddev()
    }

    /// Aggregate per-example gradients of flat length `dim`.
    pub fn aggregate<R: Rng + ?Sized>(
        &self,
        per_example_grads: &[Tensor],
        dim: usize,
        rng: &mut R,
    ) -> Result<AggregatedGradient> {
        let clipped = clip_and_sum(per_example_grads, self.l2_clip_norm, dim)?;
        let mut gradient = clipped.sum;
        self.mechanism.apply(&mut gradient, rng)?;
        let denom = self.normalize_by;
        gradient.mapv_inplace(|v| v / denom);
        tracing::trace!(
            batch = per_example_grads.len(),
            num_clipped = clipped.num_clipped,
            "aggregated noisy gradient"
        );
        Ok(AggregatedGradient {
            gradient,
            norms: clipped.norms,
            num_clipped: clipped.num_clipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn noiseless_aggregate_is_mean_of_clipped() {
        let a = array![3.0, 4.0].into_dyn();
        let b = array![0.0, 0.5].into_dyn();
        let agg = DpSgdAggregator::new(1.0, 0.0, 2.0).expect("aggregator");
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = agg.aggregate(&[a, b], 2, &mut rng).expect("aggregate");
        assert!((out.gradient[[0]] - 0.3).abs() < 1e-12);
        assert!((out.gradient[[1]] - 0.65).abs() < 1e-12);
        assert_eq!(out.num_clipped, 1);
    }

    #[test]
    fn noise_scales_with_clip_norm() {
        let agg = DpSgdAggregator::new(2.0, 1.5, 4.0).expect("aggregator");
        assert!((agg.noise_stddev() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn aggregation_is_seed_deterministic() {
        let grads = vec![array![1.0, -1.0, 0.5].into_dyn()];
        let agg = DpSgdAggregator::new(1.0, 1.1, 1.0).expect("aggregator");
        let g1 = agg
            .aggregate(&grads, 3, &mut ChaCha8Rng::seed_from_u64(9))
            .expect("aggregate");
        let g2 = agg
            .aggregate(&grads, 3, &mut ChaCha8Rng::seed_from_u64(9))
            .expect("aggregate");
        assert_eq!(g1.gradient, g2.gradient);
    }

    #[test]
    fn rejects_negative_noise() {
        assert!(DpSgdAggregator::new(1.0, -0.1, 1.0).is_err());
        assert!(DpSgdAggregator::new(0.0, 1.0, 1.0).is_err());
    }
}
