//! Experiment configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file describes the standard sweep:
//! digits 1 vs 0, `delta = 1e-5`, batch 128, 20 epochs, clip 1.0,
//! learning rate 0.1 and target epsilons 0.5 to 8 for both models.
//!
//! ```toml
//! seed = 3
//! models = ["logistic"]
//!
//! [privacy]
//! epsilons = [1.0, 4.0]
//!
//! [training]
//! epochs = 5
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use dp_mnist_accounting::Sampler;
use dp_mnist_core::{DpError, Result};
use dp_mnist_data::{Preprocessing, SplitSizes};
use dp_mnist_models::ModelKind;

/// Which digits to keep and how to split and preprocess them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Digit labeled 1.
    pub positive_digit: u8,
    /// Digit labeled 0.
    pub negative_digit: u8,
    /// Training examples.
    pub train: usize,
    /// Validation examples.
    pub validation: usize,
    /// Test examples.
    pub test: usize,
    /// Binarization threshold on `[0, 1]` pixels.
    pub binarize_threshold: f64,
    /// Per-example L2 norm bound after binarization.
    pub max_norm: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            positive_digit: 1,
            negative_digit: 0,
            train: 8000,
            validation: 1000,
            test: 2000,
            binarize_threshold: 0.5,
            max_norm: 1.0,
        }
    }
}

impl DataConfig {
    /// Requested split sizes.
    pub fn split_sizes(&self) -> SplitSizes {
        SplitSizes {
            train: self.train,
            validation: self.validation,
            test: self.test,
        }
    }

    /// Preprocessing applied after digit selection.
    pub fn preprocessing(&self) -> Preprocessing {
        Preprocessing {
            threshold: self.binarize_threshold,
            max_norm: self.max_norm,
        }
    }
}

/// The privacy settings swept over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Target epsilons; the noise multiplier is calibrated for each.
    pub epsilons: Vec<f64>,
    /// Fixed noise multipliers, trained as given.
    pub noise_multipliers: Vec<f64>,
    /// Target delta.
    pub delta: f64,
    /// Batch sampling scheme.
    #[serde(with = "dp_mnist_models::trainer::sampler_serde")]
    pub sampler: Sampler,
    /// Bisection tolerance on the calibrated noise multiplier.
    pub calibration_tolerance: f64,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            epsilons: vec![0.5, 1.0, 2.0, 4.0, 8.0],
            noise_multipliers: Vec::new(),
            delta: 1e-5,
            sampler: Sampler::Poisson,
            calibration_tolerance: 1e-3,
        }
    }
}

/// Optimizer and model hyperparameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Expected batch size.
    pub batch_size: usize,
    /// Passes over the training set.
    pub epochs: usize,
    /// Per-example gradient clipping bound.
    pub l2_clip_norm: f64,
    /// SGD step size.
    pub learning_rate: f64,
    /// Convolution filters of the CNN.
    pub cnn_filters: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            epochs: 20,
            l2_clip_norm: 1.0,
            learning_rate: 0.1,
            cnn_filters: 8,
        }
    }
}

/// A full privacy/utility sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Seed for splitting, initialization, sampling and noise.
    pub seed: u64,
    /// Models to train at every privacy setting.
    pub models: Vec<ModelKind>,
    /// Data selection and preprocessing.
    pub data: DataConfig,
    /// Privacy settings.
    pub privacy: PrivacyConfig,
    /// Training hyperparameters.
    pub training: TrainingConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            models: vec![ModelKind::Logistic, ModelKind::Cnn],
            data: DataConfig::default(),
            privacy: PrivacyConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| DpError::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded experiment config");
        Ok(config)
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| DpError::config(format!("serialize config: {e}")))
    }

    /// Reject values that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(DpError::config("at least one model is required"));
        }
        let d = &self.data;
        if d.positive_digit > 9 || d.negative_digit > 9 {
            return Err(DpError::config("digits must be in 0..=9"));
        }
        if d.positive_digit == d.negative_digit {
            return Err(DpError::config("positive and negative digits must differ"));
        }
        if d.train == 0 || d.test == 0 {
            return Err(DpError::config("train and test splits must be non-empty"));
        }
        if d.split_sizes().total().is_none() {
            return Err(DpError::config("train + validation + test overflows"));
        }
        if !(0.0..=1.0).contains(&d.binarize_threshold) {
            return Err(DpError::config("binarize_threshold must be in [0, 1]"));
        }
        if !d.max_norm.is_finite() || d.max_norm <= 0.0 {
            return Err(DpError::config("max_norm must be positive"));
        }

        let p = &self.privacy;
        if p.epsilons.is_empty() && p.noise_multipliers.is_empty() {
            return Err(DpError::config(
                "give at least one target epsilon or noise multiplier",
            ));
        }
        if p.epsilons.iter().any(|&e| !e.is_finite() || e <= 0.0) {
            return Err(DpError::config("target epsilons must be positive"));
        }
        if p.noise_multipliers.iter().any(|&s| !s.is_finite() || s < 0.0) {
            return Err(DpError::config("noise multipliers must be non-negative"));
        }
        if !p.delta.is_finite() || p.delta <= 0.0 || p.delta >= 1.0 {
            return Err(DpError::config("delta must be in (0, 1)"));
        }
        if !p.calibration_tolerance.is_finite() || p.calibration_tolerance <= 0.0 {
            return Err(DpError::config("calibration_tolerance must be positive"));
        }

        let t = &self.training;
        if t.batch_size == 0 || t.batch_size > d.train {
            return Err(DpError::config("batch_size must be in (0, train]"));
        }
        if t.epochs == 0 {
            return Err(DpError::config("epochs must be positive"));
        }
        if total_updates(d.train, t.batch_size, t.epochs).is_none() {
            return Err(DpError::config("number of training steps overflows"));
        }
        if !t.l2_clip_norm.is_finite() || t.l2_clip_norm <= 0.0 {
            return Err(DpError::config("l2_clip_norm must be positive"));
        }
        if !t.learning_rate.is_finite() || t.learning_rate <= 0.0 {
            return Err(DpError::config("learning_rate must be positive"));
        }
        if self.models.contains(&ModelKind::Cnn) && t.cnn_filters == 0 {
            return Err(DpError::config("cnn_filters must be positive"));
        }
        Ok(())
    }
}

/// Noisy updates of a run, `ceil(num_train / batch_size) * epochs`.
///
/// `None` when `batch_size` is 0 or the count does not fit in a `u64`.
pub(crate) fn total_updates(num_train: usize, batch_size: usize, epochs: usize) -> Option<u64> {
    if batch_size == 0 {
        return None;
    }
    let updates = num_train.div_ceil(batch_size).checked_mul(epochs)?;
    u64::try_from(updates).ok()
}
