//! Gradient tensors and the checks run on them.

use ndarray::ArrayD;

use crate::error::{DpError, Result};

/// Scalar type used throughout the workspace.
pub type Scalar = f64;

/// Dynamic-rank array holding a gradient or a batch of images.
pub type Tensor = ArrayD<Scalar>;

/// Euclidean norm over every entry.
///
/// Any NaN entry makes the norm NaN; an infinite entry makes it infinite.
pub fn l2_norm(t: &Tensor) -> f64 {
    if t.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    t.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Overwrite NaN and infinite entries with 0, returning how many changed.
pub fn zero_non_finite(t: &mut Tensor) -> usize {
    let mut replaced = 0;
    for v in t.iter_mut().filter(|v| !v.is_finite()) {
        *v = 0.0;
        replaced += 1;
    }
    replaced
}

/// Check that `actual` equals `expected`, reporting both on mismatch.
pub fn ensure_shape(expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DpError::shape(expected, actual))
    }
}
