//! Batch sampling strategies for DP-SGD.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{DpError, Result};

/// Batch indices for a training step.
pub type BatchIndices = Vec<usize>;

/// Sample indices using Poisson sampling.
///
/// Each index is included independently with probability `q`.
pub fn poisson_sample<R: Rng + ?Sized>(n: usize, q: f64, rng: &mut R) -> BatchIndices {
    if n == 0 || !q.is_finite() || q <= 0.0 {
        return Vec::new();
    }

    let q = q.min(1.0);
    let mut indices = Vec::new();
    for i in 0..n {
        if rng.gen_bool(q) {
            indices.push(i);
        }
    }
    indices
}

/// How batches are drawn during one epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BatchSampler {
    /// `steps` independent Poisson samples with inclusion probability `q`.
    Poisson {
        /// Inclusion probability.
        q: f64,
        /// Batches per epoch.
        steps: usize,
    },
    /// One shuffle per epoch, cut into consecutive batches of `batch_size`.
    Shuffle {
        /// Batch size; the last batch may be smaller.
        batch_size: usize,
    },
}

impl BatchSampler {
    /// Poisson sampler matching an expected batch size over `n` examples.
    pub fn poisson(n: usize, batch_size: usize) -> Result<Self> {
        if n == 0 || batch_size == 0 || batch_size > n {
            return Err(DpError::invalid("batch_size must be in (0, num_samples]"));
        }
        Ok(Self::Poisson {
            q: batch_size as f64 / n as f64,
            steps: n.div_ceil(batch_size),
        })
    }

    /// Shuffling sampler with a fixed batch size.
    pub fn shuffle(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(DpError::invalid("batch_size must be positive"));
        }
        Ok(Self::Shuffle { batch_size })
    }

    /// Number of batches one epoch over `n` examples produces.
    pub fn steps_per_epoch(&self, n: usize) -> usize {
        match *self {
            BatchSampler::Poisson { steps, .. } => steps,
            BatchSampler::Shuffle { batch_size } => n.div_ceil(batch_size),
        }
    }

    /// Draw all batches for one epoch over `n` examples.
    pub fn epoch_batches<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<BatchIndices> {
        match *self {
            BatchSampler::Poisson { q, steps } => {
                (0..steps).map(|_| poisson_sample(n, q, rng)).collect()
            }
            BatchSampler::Shuffle { batch_size } => {
                let mut indices: Vec<usize> = (0..n).collect();
                indices.shuffle(rng);
                indices.chunks(batch_size).map(|c| c.to_vec()).collect()
            }
        }
    }
}
