//! Logistic regression over flattened pixels.

use ndarray::{Array1, ArrayViewD};

use dp_mnist_core::{ensure_shape, DpError, Result, Tensor};

use crate::model::{bce_with_logit, sgd_step, sigmoid, Model, ModelKind};

/// `sigmoid(w . x + b)` with `w` over every input pixel.
///
/// Parameters are laid out as the weights followed by the bias.
#[derive(Clone, Debug, PartialEq)]
pub struct LogisticRegression {
    input_shape: Vec<usize>,
    params: Vec<f64>,
}

impl LogisticRegression {
    /// Zero-initialized model for inputs of `input_shape`.
    pub fn new(input_shape: &[usize]) -> Result<Self> {
        let dim: usize = input_shape.iter().product();
        if input_shape.is_empty() || dim == 0 {
            return Err(DpError::invalid("input shape must have at least one element"));
        }
        Ok(Self {
            input_shape: input_shape.to_vec(),
            params: vec![0.0; dim + 1],
        })
    }

    /// Weights, one per input pixel.
    pub fn weights(&self) -> &[f64] {
        &self.params[..self.params.len() - 1]
    }

    /// Bias term.
    pub fn bias(&self) -> f64 {
        self.params[self.params.len() - 1]
    }
}

impl Model for LogisticRegression {
    fn kind(&self) -> ModelKind {
        ModelKind::Logistic
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn num_params(&self) -> usize {
        self.params.len()
    }

    fn params(&self) -> &[f64] {
        &self.params
    }

    fn logit(&self, x: ArrayViewD<'_, f64>) -> Result<f64> {
        ensure_shape(&self.input_shape, x.shape())?;
        let dot: f64 = self.weights().iter().zip(x.iter()).map(|(w, v)| w * v).sum();
        Ok(dot + self.bias())
    }

    fn loss_and_grad(&self, x: ArrayViewD<'_, f64>, y: f64) -> Result<(f64, Tensor)> {
        let z = self.logit(x.view())?;
        let residual = sigmoid(z) - y;
        let mut grad = Array1::<f64>::zeros(self.params.len());
        for (g, v) in grad.iter_mut().zip(x.iter()) {
            *g = residual * v;
        }
        grad[self.params.len() - 1] = residual;
        Ok((bce_with_logit(z, y), grad.into_dyn()))
    }

    fn apply_update(&mut self, gradient: &Tensor, learning_rate: f64) -> Result<()> {
        sgd_step(&mut self.params, gradient, learning_rate)
    }
}
