//! Per-example gradient clipping for bounded sensitivity.

use crate::error::{DpError, Result};
use crate::tensor::{l2_norm, zero_non_finite, Tensor};

/// Result of a clipping operation.
#[derive(Clone, Debug)]
pub struct ClipReport {
    /// Original L2 norm before clipping.
    pub original_norm: f64,
    /// Whether clipping was applied.
    pub clipped: bool,
    /// Scale factor applied (1.0 if not clipped).
    pub scale: f64,
}

/// Clip a tensor to a maximum L2 norm in-place.
///
/// NaN and infinite entries are zeroed first. A tensor whose norm is still
/// not finite, or a non-positive bound, yields an all-zero tensor.
pub fn clip_tensor(tensor: &mut Tensor, max_norm: f64) -> ClipReport {
    zero_non_finite(tensor);
    let norm = l2_norm(tensor);

    if !max_norm.is_finite() || max_norm <= 0.0 || !norm.is_finite() {
        tensor.fill(0.0);
        return ClipReport {
            original_norm: norm,
            clipped: true,
            scale: 0.0,
        };
    }

    if norm <= max_norm {
        return ClipReport {
            original_norm: norm,
            clipped: false,
            scale: 1.0,
        };
    }

    let scale = max_norm / norm;
    tensor.mapv_inplace(|x| x * scale);
    ClipReport {
        original_norm: norm,
        clipped: true,
        scale,
    }
}

/// Sum of clipped per-example gradients.
#[derive(Clone, Debug)]
pub struct ClippedSum {
    /// Sum of the clipped gradients.
    pub sum: Tensor,
    /// Norm of each example before clipping.
    pub norms: Vec<f64>,
    /// Number of examples whose gradient was scaled down.
    pub num_clipped: usize,
}

/// Clip every per-example gradient to `l2_clip_norm` and sum them.
///
/// `dim` is the flat gradient length; it is needed so that an empty batch
/// (possible under Poisson sampling) still produces a correctly sized zero sum.
pub fn clip_and_sum(examples: &[Tensor], l2_clip_norm: f64, dim: usize) -> Result<ClippedSum> {
    if !l2_clip_norm.is_finite() || l2_clip_norm <= 0.0 {
        return Err(DpError::invalid("l2_clip_norm must be positive and finite"));
    }

    let mut sum = Tensor::zeros(ndarray::IxDyn(&[dim]));
    let mut norms = Vec::with_capacity(examples.len());
    let mut num_clipped = 0usize;

    for ex in examples {
        if ex.len() != dim || ex.ndim() != 1 {
            return Err(DpError::shape(&[dim], ex.shape()));
        }
        let mut clipped = ex.clone();
        let report = clip_tensor(&mut clipped, l2_clip_norm);
        if report.clipped {
            num_clipped += 1;
        }
        norms.push(report.original_norm);
        sum += &clipped;
    }

    Ok(ClippedSum {
        sum,
        norms,
        num_clipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn test_no_clipping_needed() {
        let mut t = array![0.3, 0.4].into_dyn(); // norm = 0.5
        let report = clip_tensor(&mut t, 1.0);
        assert!((report.original_norm - 0.5).abs() < 1e-10);
        assert!(!report.clipped);
        assert_eq!(t, array![0.3, 0.4].into_dyn());
    }

    #[test]
    fn test_clipping_applied() {
        let mut t = array![3.0, 4.0].into_dyn(); // norm = 5.0
        let report = clip_tensor(&mut t, 1.0);
        assert!(report.clipped);
        assert!((report.scale - 0.2).abs() < 1e-12);
        assert!((l2_norm(&t) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn nan_entries_are_zeroed_before_clipping() {
        let mut t = array![f64::NAN, 3.0, 4.0].into_dyn();
        let report = clip_tensor(&mut t, 10.0);
        assert!((report.original_norm - 5.0).abs() < 1e-10);
        assert_eq!(t[[0]], 0.0);
    }

    #[test]
    fn clip_and_sum_bounds_each_contribution() {
        let ex1 = array![3.0, 4.0].into_dyn();
        let ex2 = array![0.6, 0.8].into_dyn();
        let out = clip_and_sum(&[ex1, ex2], 1.0, 2).expect("clip");
        assert_eq!(out.norms.len(), 2);
        assert_eq!(out.num_clipped, 1);
        assert!((out.sum[[0]] - 1.2).abs() < 1e-12);
        assert!((out.sum[[1]] - 1.6).abs() < 1e-12);
    }

    #[test]
    fn clip_and_sum_handles_empty_batch() {
        let out = clip_and_sum(&[], 1.0, 3).expect("clip");
        assert_eq!(out.sum.shape(), &[3]);
        assert!(out.sum.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn clip_and_sum_rejects_wrong_length() {
        let ex = array![1.0, 2.0, 3.0].into_dyn();
        let err = clip_and_sum(&[ex], 1.0, 2).unwrap_err();
        assert!(matches!(err, DpError::ShapeMismatch { .. }));
    }

    proptest! {
        #[test]
        fn prop_clip_tensor_respects_bound(
            vals in prop::collection::vec(-100.0f64..100.0, 1..32),
            clip_norm in 0.1f64..50.0,
        ) {
            let mut t = ndarray::Array1::from_vec(vals).into_dyn();
            clip_tensor(&mut t, clip_norm);
            let norm = l2_norm(&t);
            prop_assert!(norm.is_finite());
            prop_assert!(norm <= clip_norm + 1e-6);
        }
    }
}
