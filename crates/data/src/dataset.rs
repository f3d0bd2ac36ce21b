//! In-memory labeled image dataset.

use ndarray::{Array1, Array2, ArrayD, ArrayViewD, Axis};

use dp_mnist_core::{DpError, Result};

/// Images with binary labels; axis 0 indexes examples.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    images: ArrayD<f64>,
    labels: Array1<f64>,
}

impl Dataset {
    /// Create a dataset, checking that labels are binary and line up with
    /// the example axis.
    pub fn new(images: ArrayD<f64>, labels: Array1<f64>) -> Result<Self> {
        if images.ndim() < 2 {
            return Err(DpError::data(
                "images need an example axis followed by at least one image axis",
            ));
        }
        if images.shape()[0] != labels.len() {
            return Err(DpError::data(format!(
                "{} images but {} labels",
                images.shape()[0],
                labels.len()
            )));
        }
        if labels.iter().any(|&y| y != 0.0 && y != 1.0) {
            return Err(DpError::data("labels must be 0 or 1"));
        }
        Ok(Self { images, labels })
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the dataset has no examples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Shape of a single example.
    pub fn image_shape(&self) -> &[usize] {
        &self.images.shape()[1..]
    }

    /// Number of scalar features per example.
    pub fn feature_dim(&self) -> usize {
        self.image_shape().iter().product()
    }

    /// All images, example axis first.
    pub fn images(&self) -> &ArrayD<f64> {
        &self.images
    }

    /// Images flattened to `(n, feature_dim)`.
    pub fn features(&self) -> Result<Array2<f64>> {
        let flat: Vec<f64> = self.images.iter().copied().collect();
        Array2::from_shape_vec((self.len(), self.feature_dim()), flat)
            .map_err(|e| DpError::data(format!("flatten images: {e}")))
    }

    /// All labels.
    pub fn labels(&self) -> &Array1<f64> {
        &self.labels
    }

    /// View of example `i`.
    pub fn example(&self, i: usize) -> ArrayViewD<'_, f64> {
        self.images.index_axis(Axis(0), i)
    }

    /// Label of example `i`.
    pub fn label(&self, i: usize) -> f64 {
        self.labels[i]
    }

    /// Fraction of examples labeled 1.
    pub fn positive_fraction(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.labels.sum() / self.len() as f64
    }

    /// Copy out the examples at `indices`, in order.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(DpError::data(format!(
                "index {bad} out of bounds for {} examples",
                self.len()
            )));
        }
        Ok(Self {
            images: self.images.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        })
    }

    /// Reshape `(n, h, w)` images to `(n, 1, h, w)` for convolutional models.
    pub fn with_channel_axis(self) -> Result<Self> {
        if self.images.ndim() != 3 {
            return Err(DpError::data(format!(
                "expected (n, height, width) images, got shape {:?}",
                self.images.shape()
            )));
        }
        Ok(Self {
            images: self.images.insert_axis(Axis(1)),
            labels: self.labels,
        })
    }

    /// Apply `f` to every pixel.
    pub fn map_pixels(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            images: self.images.mapv(f),
            labels: self.labels.clone(),
        }
    }

    /// Mutable per-example access, used by in-place preprocessing.
    pub(crate) fn images_mut(&mut self) -> &mut ArrayD<f64> {
        &mut self.images
    }
}
