//! A small convolutional classifier with hand-written backpropagation.
//!
//! Architecture, for a `(channels, height, width)` input:
//!
//! 1. `filters` 3x3 valid convolutions with bias, then ReLU;
//! 2. 2x2 average pooling with stride 2 (a trailing odd row or column is
//!    dropped);
//! 3. a dense layer from the pooled maps to one logit.
//!
//! Parameters are stored flat in the order conv weights `(f, c, kh, kw)`,
//! conv biases, dense weights `(f, ph, pw)`, dense bias.

use ndarray::{Array1, Array3, ArrayView3, ArrayViewD, Ix3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use dp_mnist_core::{ensure_shape, DpError, Result, Tensor};

use crate::model::{bce_with_logit, sgd_step, sigmoid, Model, ModelKind};

/// Convolution kernel side.
pub const KERNEL: usize = 3;
/// Pooling window side.
pub const POOL: usize = 2;

/// Conv, ReLU, average pool, dense, sigmoid.
#[derive(Clone, Debug, PartialEq)]
pub struct SmallCnn {
    input_shape: [usize; 3],
    filters: usize,
    params: Vec<f64>,
}

struct Forward {
    pre: Array3<f64>,
    pooled: Array3<f64>,
    logit: f64,
}

impl SmallCnn {
    /// He-initialized model for `(channels, height, width)` inputs.
    pub fn new(input_shape: (usize, usize, usize), filters: usize, seed: u64) -> Result<Self> {
        let (c, h, w) = input_shape;
        if c == 0 || filters == 0 {
            return Err(DpError::invalid("channels and filters must be positive"));
        }
        if h < KERNEL + POOL - 1 || w < KERNEL + POOL - 1 {
            return Err(DpError::invalid(format!(
                "input {h}x{w} is too small for a {KERNEL}x{KERNEL} kernel and {POOL}x{POOL} pooling"
            )));
        }

        let mut model = Self {
            input_shape: [c, h, w],
            filters,
            params: Vec::new(),
        };
        let fan_in = (c * KERNEL * KERNEL) as f64;
        let pooled_len = model.pooled_len();

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let conv = Normal::new(0.0, (2.0 / fan_in).sqrt())
            .map_err(|e| DpError::numerical(format!("conv init: {e}")))?;
        let dense = Normal::new(0.0, (1.0 / pooled_len as f64).sqrt())
            .map_err(|e| DpError::numerical(format!("dense init: {e}")))?;

        let mut params = Vec::with_capacity(model.param_count());
        params.extend((0..model.conv_weight_len()).map(|_| conv.sample(&mut rng)));
        params.extend(std::iter::repeat(0.0).take(filters));
        params.extend((0..pooled_len).map(|_| dense.sample(&mut rng)));
        params.push(0.0);
        model.params = params;

        tracing::debug!(
            filters,
            num_params = model.params.len(),
            "initialized small cnn"
        );
        Ok(model)
    }

    /// Number of convolution filters.
    pub fn filters(&self) -> usize {
        self.filters
    }

    fn conv_dims(&self) -> (usize, usize) {
        let [_, h, w] = self.input_shape;
        (h - KERNEL + 1, w - KERNEL + 1)
    }

    fn pool_dims(&self) -> (usize, usize) {
        let (ch, cw) = self.conv_dims();
        (ch / POOL, cw / POOL)
    }

    fn pooled_len(&self) -> usize {
        let (ph, pw) = self.pool_dims();
        self.filters * ph * pw
    }

    fn conv_weight_len(&self) -> usize {
        self.filters * self.input_shape[0] * KERNEL * KERNEL
    }

    fn param_count(&self) -> usize {
        self.conv_weight_len() + self.filters + self.pooled_len() + 1
    }

    fn conv_weight(&self, f: usize, c: usize, ki: usize, kj: usize) -> f64 {
        let channels = self.input_shape[0];
        self.params[((f * channels + c) * KERNEL + ki) * KERNEL + kj]
    }

    fn conv_bias(&self, f: usize) -> f64 {
        self.params[self.conv_weight_len() + f]
    }

    fn dense_offset(&self) -> usize {
        self.conv_weight_len() + self.filters
    }

    fn as_image<'a>(&self, x: ArrayViewD<'a, f64>) -> Result<ArrayView3<'a, f64>> {
        ensure_shape(&self.input_shape, x.shape())?;
        x.into_dimensionality::<Ix3>()
            .map_err(|e| DpError::numerical(format!("input view: {e}")))
    }

    fn forward(&self, x: &ArrayView3<'_, f64>) -> Forward {
        let channels = self.input_shape[0];
        let (ch, cw) = self.conv_dims();
        let (ph, pw) = self.pool_dims();

        let mut pre = Array3::<f64>::zeros((self.filters, ch, cw));
        for f in 0..self.filters {
            let bias = self.conv_bias(f);
            for i in 0..ch {
                for j in 0..cw {
                    let mut acc = bias;
                    for c in 0..channels {
                        for ki in 0..KERNEL {
                            for kj in 0..KERNEL {
                                acc += self.conv_weight(f, c, ki, kj) * x[[c, i + ki, j + kj]];
                            }
                        }
                    }
                    pre[[f, i, j]] = acc;
                }
            }
        }

        let scale = 1.0 / (POOL * POOL) as f64;
        let mut pooled = Array3::<f64>::zeros((self.filters, ph, pw));
        for f in 0..self.filters {
            for pi in 0..ph {
                for pj in 0..pw {
                    let mut acc = 0.0;
                    for di in 0..POOL {
                        for dj in 0..POOL {
                            acc += pre[[f, pi * POOL + di, pj * POOL + dj]].max(0.0);
                        }
                    }
                    pooled[[f, pi, pj]] = acc * scale;
                }
            }
        }

        let dense = &self.params[self.dense_offset()..];
        let logit = pooled
            .iter()
            .zip(dense.iter())
            .map(|(a, w)| a * w)
            .sum::<f64>()
            + dense[dense.len() - 1];

        Forward { pre, pooled, logit }
    }
}

impl Model for SmallCnn {
    fn kind(&self) -> ModelKind {
        ModelKind::Cnn
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
        let x = self.as_image(x)?;
        Ok(self.forward(&x).logit)
    }

    fn loss_and_grad(&self, x: ArrayViewD<'_, f64>, y: f64) -> Result<(f64, Tensor)> {
        let x = self.as_image(x)?;
        let fwd = self.forward(&x);
        let d_logit = sigmoid(fwd.logit) - y;

        let channels = self.input_shape[0];
        let (ch, cw) = self.conv_dims();
        let (ph, pw) = self.pool_dims();
        let dense_off = self.dense_offset();
        let mut grad = Array1::<f64>::zeros(self.params.len());

        for (k, a) in fwd.pooled.iter().enumerate() {
            grad[dense_off + k] = d_logit * a;
        }
        grad[self.params.len() - 1] = d_logit;

        let scale = 1.0 / (POOL * POOL) as f64;
        let mut d_pre = Array3::<f64>::zeros((self.filters, ch, cw));
        for f in 0..self.filters {
            for pi in 0..ph {
                for pj in 0..pw {
                    let k = (f * ph + pi) * pw + pj;
                    let d_pooled = d_logit * self.params[dense_off + k] * scale;
                    for di in 0..POOL {
                        for dj in 0..POOL {
                            let (i, j) = (pi * POOL + di, pj * POOL + dj);
                            if fwd.pre[[f, i, j]] > 0.0 {
                                d_pre[[f, i, j]] = d_pooled;
                            }
                        }
                    }
                }
            }
        }

        let bias_off = self.conv_weight_len();
        for f in 0..self.filters {
            let mut d_bias = 0.0;
            for i in 0..ch {
                for j in 0..cw {
                    let d = d_pre[[f, i, j]];
                    if d == 0.0 {
                        continue;
                    }
                    d_bias += d;
                    for c in 0..channels {
                        for ki in 0..KERNEL {
                            for kj in 0..KERNEL {
                                let idx = ((f * channels + c) * KERNEL + ki) * KERNEL + kj;
                                grad[idx] += d * x[[c, i + ki, j + kj]];
                            }
                        }
                    }
                }
            }
            grad[bias_off + f] = d_bias;
        }

        Ok((bce_with_logit(fwd.logit, y), grad.into_dyn()))
    }

    fn apply_update(&mut self, gradient: &Tensor, learning_rate: f64) -> Result<()> {
        sgd_step(&mut self.params, gradient, learning_rate)
    }
}
