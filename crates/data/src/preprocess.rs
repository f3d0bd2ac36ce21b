//! Two-class selection, binarization and norm bounding.

use ndarray::{Array1, Array3, ArrayD, Axis};

use dp_mnist_core::{DpError, Result};

use crate::dataset::Dataset;

/// Keep only `positive` and `negative` digits; `positive` is labeled 1.
///
/// Pixels are rescaled from `0..=255` to `[0, 1]`.
pub fn select_digits(
    images: &Array3<u8>,
    labels: &[u8],
    positive: u8,
    negative: u8,
) -> Result<Dataset> {
    if positive == negative {
        return Err(DpError::invalid("positive and negative digits must differ"));
    }
    if images.shape()[0] != labels.len() {
        return Err(DpError::data(format!(
            "{} images but {} labels",
            images.shape()[0],
            labels.len()
        )));
    }

    let keep: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, &l)| l == positive || l == negative)
        .map(|(i, _)| i)
        .collect();
    if keep.is_empty() {
        return Err(DpError::data(format!(
            "no examples of digits {positive} or {negative}"
        )));
    }

    let selected = images
        .select(Axis(0), &keep)
        .mapv(|p| p as f64 / 255.0)
        .into_dyn();
    let binary: Array1<f64> = keep
        .iter()
        .map(|&i| if labels[i] == positive { 1.0 } else { 0.0 })
        .collect();

    tracing::debug!(
        positive,
        negative,
        kept = keep.len(),
        total = labels.len(),
        "selected digit pair"
    );
    Dataset::new(selected, binary)
}

/// Map every pixel to 1 if it is at least `threshold`, else 0.
pub fn binarize(ds: &Dataset, threshold: f64) -> Dataset {
    ds.map_pixels(|p| if p >= threshold { 1.0 } else { 0.0 })
}

/// Scale each example down so its L2 norm is at most `max_norm`.
///
/// Examples already within the bound are left as they are.
pub fn normalize_rows(ds: &Dataset, max_norm: f64) -> Result<Dataset> {
    if !max_norm.is_finite() || max_norm <= 0.0 {
        return Err(DpError::invalid("max_norm must be positive and finite"));
    }
    let mut out = ds.clone();
    for mut example in out.images_mut().axis_iter_mut(Axis(0)) {
        let norm = example.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > max_norm {
            let scale = max_norm / norm;
            example.mapv_inplace(|v| v * scale);
        }
    }
    Ok(out)
}

/// Preprocessing applied to every split: binarize, then bound the norm.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Preprocessing {
    /// Binarization threshold on `[0, 1]` pixels.
    pub threshold: f64,
    /// Per-example L2 norm bound.
    pub max_norm: f64,
}

impl Default for Preprocessing {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            max_norm: 1.0,
        }
    }
}

impl Preprocessing {
    /// Apply to a dataset.
    pub fn apply(&self, ds: &Dataset) -> Result<Dataset> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(DpError::invalid("threshold must be in [0, 1]"));
        }
        normalize_rows(&binarize(ds, self.threshold), self.max_norm)
    }
}

/// Largest per-example L2 norm in `images` (example axis first).
pub fn max_example_norm(images: &ArrayD<f64>) -> f64 {
    images
        .axis_iter(Axis(0))
        .map(|ex| ex.iter().map(|v| v * v).sum::<f64>().sqrt())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> (Array3<u8>, Vec<u8>) {
        let images = Array3::from_shape_fn((4, 2, 2), |(i, r, c)| (i * 60 + r * 2 + c) as u8);
        (images, vec![3, 7, 3, 1])
    }

    #[test]
    fn select_digits_filters_and_labels() {
        let (images, labels) = raw();
        let ds = select_digits(&images, &labels, 7, 3).expect("select");
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.labels().to_vec(), vec![0.0, 1.0, 0.0]);
        assert!((ds.example(1)[[0, 0]] - 60.0 / 255.0).abs() < 1e-12);
    }

    #[test]
    fn select_digits_rejects_missing_classes() {
        let (images, labels) = raw();
        assert!(select_digits(&images, &labels, 5, 6).is_err());
        assert!(select_digits(&images, &labels, 3, 3).is_err());
    }

    #[test]
    fn preprocessing_yields_binary_bounded_examples() {
        let (images, labels) = raw();
        let ds = select_digits(&images, &labels, 7, 3).expect("select");
        let binary = binarize(&ds, 0.5);
        assert!(binary.images().iter().all(|&p| p == 0.0 || p == 1.0));

        let out = Preprocessing::default().apply(&ds).expect("preprocess");
        assert!(max_example_norm(out.images()) <= 1.0 + 1e-12);
        assert!(out
            .images()
            .iter()
            .all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn normalize_leaves_small_examples_alone() {
        let (images, labels) = raw();
        let ds = select_digits(&images, &labels, 7, 3).expect("select");
        let out = normalize_rows(&ds, 100.0).expect("normalize");
        assert_eq!(out, ds);
        assert!(normalize_rows(&ds, 0.0).is_err());
    }
}
