//! DP training parameters.

use dp_mnist_core::{DpError, Result};

use crate::event::{dpsgd_event, DpEvent};
use crate::rdp::{validate_delta, validate_noise_multiplier};

/// Sampling method used by training.
///
/// Accounting always analyzes Poisson sampling at rate
/// `batch_size / num_samples`; `Shuffle` is the common approximation used by
/// fixed-size shuffled batches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Sampler {
    /// Poisson sampling (each example included independently).
    #[default]
    Poisson,
    /// Shuffle each epoch and cut into fixed-size batches.
    Shuffle,
}

/// Parameters for DP training.
#[derive(Clone, Debug, PartialEq)]
pub struct DpParams {
    /// Noise multiplier (sigma / clip norm).
    pub noise_multiplier: f64,
    /// Dataset size.
    pub num_samples: usize,
    /// Expected batch size.
    pub batch_size: usize,
    /// Target delta.
    pub delta: f64,
    /// Sampling method used by training.
    pub sampler: Sampler,
}

impl DpParams {
    /// Create new DP parameters.
    pub fn new(noise_mult: f64, num_samples: usize, batch_size: usize, delta: f64) -> Result<Self> {
        let params = Self {
            noise_multiplier: noise_mult,
            num_samples,
            batch_size,
            delta,
            sampler: Sampler::Poisson,
        };
        params.validate()?;
        Ok(params)
    }

    /// Set the sampling method.
    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Compute the sampling rate using the batch size.
    pub fn sampling_rate(&self) -> f64 {
        self.batch_size as f64 / self.num_samples as f64
    }

    /// Updates per epoch, `ceil(num_samples / batch_size)`.
    pub fn steps_per_epoch(&self) -> u64 {
        self.num_samples.div_ceil(self.batch_size) as u64
    }

    /// Total updates for `epochs` epochs.
    pub fn num_updates(&self, epochs: usize) -> u64 {
        self.steps_per_epoch().saturating_mul(epochs as u64)
    }

    /// The DP event of training for `epochs` epochs.
    pub fn dp_event(&self, epochs: usize) -> DpEvent {
        dpsgd_event(
            self.noise_multiplier,
            self.num_updates(epochs),
            self.sampling_rate(),
        )
    }

    /// Epsilon after `epochs` epochs at the configured delta.
    pub fn epsilon(&self, epochs: usize) -> Result<f64> {
        if epochs == 0 {
            return Ok(0.0);
        }
        self.dp_event(epochs).epsilon(self.delta)
    }

    /// Validate parameters.
    pub fn validate(&self) -> Result<()> {
        validate_noise_multiplier(self.noise_multiplier)?;
        if self.num_samples == 0 {
            return Err(DpError::invalid("num_samples must be positive"));
        }
        if self.batch_size == 0 || self.batch_size > self.num_samples {
            return Err(DpError::invalid("batch_size must be in (0, num_samples]"));
        }
        validate_delta(self.delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_params() {
        let p = DpParams::new(1.0, 10_000, 100, 1e-5).expect("valid params");
        assert!((p.sampling_rate() - 0.01).abs() < 1e-10);
        assert_eq!(p.steps_per_epoch(), 100);
        assert_eq!(p.num_updates(3), 300);
    }

    #[test]
    fn steps_per_epoch_rounds_up() {
        let p = DpParams::new(1.1, 8_000, 128, 1e-4).expect("valid params");
        assert_eq!(p.steps_per_epoch(), 63);
        assert_eq!(p.num_updates(20), 1260);
    }

    #[test]
    fn invalid_params_are_rejected() {
        assert!(DpParams::new(0.0, 100, 10, 1e-5).is_err());
        assert!(DpParams::new(1.0, 0, 10, 1e-5).is_err());
        assert!(DpParams::new(1.0, 100, 0, 1e-5).is_err());
        assert!(DpParams::new(1.0, 100, 101, 1e-5).is_err());
        assert!(DpParams::new(1.0, 100, 10, 0.0).is_err());
        assert!(DpParams::new(1.0, 100, 10, 1.0).is_err());
    }

    #[test]
    fn epsilon_grows_with_epochs() {
        let p = DpParams::new(1.1, 10_000, 128, 1e-5).expect("valid params");
        assert_eq!(p.epsilon(0).expect("eps"), 0.0);
        let e1 = p.epsilon(1).expect("eps");
        let e5 = p.epsilon(5).expect("eps");
        assert!(e1 > 0.0 && e5 > e1);
    }
}
