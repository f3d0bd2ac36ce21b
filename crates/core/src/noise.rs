//! Gaussian noise on clipped gradient sums.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{DpError, Result};
use crate::tensor::Tensor;

/// Add independent `N(0, stddev^2)` noise to every entry.
///
/// `stddev == 0` leaves the tensor unchanged; a negative or non-finite
/// `stddev` is rejected.
pub fn add_gaussian_noise<R: Rng + ?Sized>(
    tensor: &mut Tensor,
    stddev: f64,
    rng: &mut R,
) -> Result<()> {
    if !stddev.is_finite() || stddev < 0.0 {
        return Err(DpError::invalid(format!(
            "noise stddev must be finite and non-negative, got {stddev}"
        )));
    }
    if stddev == 0.0 {
        return Ok(());
    }
    let normal = Normal::new(0.0, stddev)
        .map_err(|e| DpError::numerical(format!("gaussian noise: {e}")))?;
    for v in tensor.iter_mut() {
        *v += normal.sample(rng);
    }
    Ok(())
}

/// The Gaussian mechanism of DP-SGD: noise scaled to the clipping bound.
///
/// Each coordinate of the clipped sum receives `N(0, (sigma * C)^2)` noise,
/// where `sigma` is the noise multiplier and `C` the L2 sensitivity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GaussianMechanism {
    noise_multiplier: f64,
    l2_sensitivity: f64,
}

impl GaussianMechanism {
    /// Mechanism with the given noise multiplier (0 for none) and sensitivity.
    pub fn new(noise_multiplier: f64, l2_sensitivity: f64) -> Result<Self> {
        if !noise_multiplier.is_finite() || noise_multiplier < 0.0 {
            return Err(DpError::invalid(
                "noise_multiplier must be non-negative and finite",
            ));
        }
        if !l2_sensitivity.is_finite() || l2_sensitivity <= 0.0 {
            return Err(DpError::invalid("l2 sensitivity must be positive and finite"));
        }
        Ok(Self {
            noise_multiplier,
            l2_sensitivity,
        })
    }

    /// Noise multiplier `sigma`.
    pub fn noise_multiplier(&self) -> f64 {
        self.noise_multiplier
    }

    /// Per-coordinate standard deviation `sigma * C`.
    pub fn stddev(&self) -> f64 {
        self.noise_multiplier * self.l2_sensitivity
    }

    /// Whether the mechanism adds no noise at all.
    pub fn is_noiseless(&self) -> bool {
        self.noise_multiplier == 0.0
    }

    /// Privatize a clipped sum in place.
    pub fn apply<R: Rng + ?Sized>(&self, sum: &mut Tensor, rng: &mut R) -> Result<()> {
        add_gaussian_noise(sum, self.stddev(), rng)
    }
}
