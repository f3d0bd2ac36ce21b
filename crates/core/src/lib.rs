//! Core differentially private training primitives.
//!
//! This crate provides the framework-agnostic building blocks for DP-SGD:
//! per-example clipping, Gaussian noise, batch sampling and the aggregator
//! that ties them together, plus the workspace-wide error type.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clipping;
pub mod error;
pub mod noise;
pub mod sampling;
pub mod tensor;
pub mod transform;

pub use clipping::{clip_and_sum, clip_tensor, ClipReport, ClippedSum};
pub use error::{DpError, Result};
pub use noise::{add_gaussian_noise, GaussianMechanism};
pub use sampling::{poisson_sample, BatchIndices, BatchSampler};
pub use tensor::{ensure_shape, l2_norm, zero_non_finite, Scalar, Tensor};
pub use transform::{AggregatedGradient, DpSgdAggregator};

/// Common imports for downstream users.
pub mod prelude {
    pub use crate::{
        add_gaussian_noise, clip_and_sum, clip_tensor, ensure_shape, l2_norm,
        poisson_sample, AggregatedGradient, BatchIndices, BatchSampler, ClipReport, ClippedSum,
        DpError, DpSgdAggregator, GaussianMechanism, Result, Scalar, Tensor,
    };
}
