//! The binary classifier interface shared by every model.

use std::fmt;

use ndarray::ArrayViewD;
use serde::{Deserialize, Serialize};

use dp_mnist_core::{ensure_shape, DpError, Result, Tensor};

/// Model families the experiments can train.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Linear model over flattened pixels.
    Logistic,
    /// One convolution, pooling and a dense output.
    Cnn,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Logistic => f.write_str("logistic"),
            ModelKind::Cnn => f.write_str("cnn"),
        }
    }
}

/// A binary classifier with flat parameters, trained one example at a time.
///
/// Gradients are 1-D tensors of length [`Model::num_params`] so that they can
/// be clipped and aggregated without knowing the model's structure.
pub trait Model {
    /// Family of this model.
    fn kind(&self) -> ModelKind;

    /// Shape of a single input example.
    fn input_shape(&self) -> &[usize];

    /// Number of trainable scalars.
    fn num_params(&self) -> usize;

    /// Flat view of the parameters.
    fn params(&self) -> &[f64];

    /// Pre-sigmoid score for one example.
    fn logit(&self, x: ArrayViewD<'_, f64>) -> Result<f64>;

    /// Binary cross entropy and its gradient for one example.
    fn loss_and_grad(&self, x: ArrayViewD<'_, f64>, y: f64) -> Result<(f64, Tensor)>;

    /// Take a gradient step: `params -= learning_rate * gradient`.
    fn apply_update(&mut self, gradient: &Tensor, learning_rate: f64) -> Result<()>;

    /// Probability of the positive class for one example.
    fn predict_proba(&self, x: ArrayViewD<'_, f64>) -> Result<f64> {
        Ok(sigmoid(self.logit(x)?))
    }

    /// Check a whole batch shape `(n, ..input_shape)` against this model.
    fn validate_batch(&self, batch_shape: &[usize]) -> Result<()> {
        let n = batch_shape.first().copied().unwrap_or(0);
        let mut expected = Vec::with_capacity(self.input_shape().len() + 1);
        expected.push(n);
        expected.extend_from_slice(self.input_shape());
        ensure_shape(&expected, batch_shape)
    }
}

/// Logistic function.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Binary cross entropy of label `y` given logit `z`, without overflow.
pub fn bce_with_logit(z: f64, y: f64) -> f64 {
    z.max(0.0) - z * y + (-z.abs()).exp().ln_1p()
}

pub(crate) fn sgd_step(params: &mut [f64], gradient: &Tensor, learning_rate: f64) -> Result<()> {
    if gradient.ndim() != 1 || gradient.len() != params.len() {
        return Err(DpError::shape(&[params.len()], gradient.shape()));
    }
    if !learning_rate.is_finite() || learning_rate <= 0.0 {
        return Err(DpError::invalid("learning_rate must be positive and finite"));
    }
    for (p, g) in params.iter_mut().zip(gradient.iter()) {
        *p -= learning_rate * g;
    }
    Ok(())
}
