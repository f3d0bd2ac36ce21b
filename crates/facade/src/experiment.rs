//! The privacy/utility sweep: calibrate, train, evaluate, record.

use ndarray::Array3;

use dp_mnist_accounting::calibrate_noise_multiplier;
use dp_mnist_core::{DpError, Result};
use dp_mnist_data::{select_digits, split_dataset, DataSplits, Dataset};
use dp_mnist_models::{
    evaluate, DpSgdConfig, DpSgdTrainer, LogisticRegression, Model, ModelKind, SmallCnn,
};

use crate::config::{total_updates, ExperimentConfig};
use crate::report::{Report, ReportRow};

/// How the noise of one run is chosen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PrivacySetting {
    /// Calibrate the noise multiplier to reach this epsilon.
    TargetEpsilon(f64),
    /// Train with this noise multiplier.
    NoiseMultiplier(f64),
}

impl ExperimentConfig {
    /// Every privacy setting of the sweep, targets first.
    pub fn privacy_settings(&self) -> Vec<PrivacySetting> {
        self.privacy
            .epsilons
            .iter()
            .map(|&e| PrivacySetting::TargetEpsilon(e))
            .chain(
                self.privacy
                    .noise_multipliers
                    .iter()
                    .map(|&s| PrivacySetting::NoiseMultiplier(s)),
            )
            .collect()
    }
}

/// Select the digit pair, preprocess and split raw `u8` images.
pub fn prepare_data(
    config: &ExperimentConfig,
    images: &Array3<u8>,
    labels: &[u8],
) -> Result<DataSplits> {
    let data = &config.data;
    let selected = select_digits(images, labels, data.positive_digit, data.negative_digit)?;
    let processed = data.preprocessing().apply(&selected)?;
    let splits = split_dataset(&processed, data.split_sizes(), config.seed)?;
    tracing::info!(
        train = splits.train.len(),
        validation = splits.validation.len(),
        test = splits.test.len(),
        positive_fraction = splits.train.positive_fraction(),
        "prepared data"
    );
    Ok(splits)
}

/// Build an untrained model for examples of `image_shape`.
///
/// The CNN expects `(channels, height, width)`; a bare `(height, width)`
/// shape is read as a single channel.
pub fn build_model(
    kind: ModelKind,
    image_shape: &[usize],
    cnn_filters: usize,
    seed: u64,
) -> Result<Box<dyn Model>> {
    match kind {
        ModelKind::Logistic => Ok(Box::new(LogisticRegression::new(image_shape)?)),
        ModelKind::Cnn => {
            let (c, h, w) = match *image_shape {
                [h, w] => (1, h, w),
                [c, h, w] => (c, h, w),
                _ => {
                    return Err(DpError::invalid(format!(
                        "cnn needs 2-D or 3-D images, got {image_shape:?}"
                    )))
                }
            };
            Ok(Box::new(SmallCnn::new((c, h, w), cnn_filters, seed)?))
        }
    }
}

fn model_view(kind: ModelKind, splits: &DataSplits) -> Result<DataSplits> {
    match kind {
        ModelKind::Cnn if splits.train.image_shape().len() == 2 => {
            splits.clone().with_channel_axis()
        }
        _ => Ok(splits.clone()),
    }
}

/// Noise multiplier for `setting` given the training set size.
pub fn resolve_noise_multiplier(
    config: &ExperimentConfig,
    setting: PrivacySetting,
    num_train: usize,
) -> Result<f64> {
    match setting {
        PrivacySetting::NoiseMultiplier(sigma) => Ok(sigma),
        PrivacySetting::TargetEpsilon(target) => {
            let batch = config.training.batch_size;
            if batch == 0 || batch > num_train {
                return Err(DpError::invalid("batch_size must be in (0, num_train]"));
            }
            let q = batch as f64 / num_train as f64;
            let updates = total_updates(num_train, batch, config.training.epochs)
                .ok_or_else(|| DpError::invalid("number of training steps overflows"))?;
            calibrate_noise_multiplier(
                target,
                q,
                updates,
                config.privacy.delta,
                config.privacy.calibration_tolerance,
            )
        }
    }
}

/// Train and evaluate one model at one privacy setting.
pub fn run_single(
    config: &ExperimentConfig,
    kind: ModelKind,
    setting: PrivacySetting,
    splits: &DataSplits,
) -> Result<ReportRow> {
    let view = model_view(kind, splits)?;
    let sigma = resolve_noise_multiplier(config, setting, view.train.len())?;

    let mut model = build_model(
        kind,
        view.train.image_shape(),
        config.training.cnn_filters,
        config.seed,
    )?;
    let trainer = DpSgdTrainer::new(DpSgdConfig {
        l2_clip_norm: config.training.l2_clip_norm,
        noise_multiplier: sigma,
        learning_rate: config.training.learning_rate,
        epochs: config.training.epochs,
        batch_size: config.training.batch_size,
        sampler: config.privacy.sampler,
        delta: config.privacy.delta,
        seed: config.seed,
    })?;
    let summary = trainer.fit(&mut *model, &view.train)?;

    let test = evaluate(&*model, &view.test)?;
    let validation_f1 = non_empty(&view.validation)
        .map(|v| evaluate(&*model, v).map(|e| e.f1))
        .transpose()?;

    let target_epsilon = match setting {
        PrivacySetting::TargetEpsilon(e) => Some(e),
        PrivacySetting::NoiseMultiplier(_) => None,
    };
    tracing::info!(
        model = %kind,
        target_epsilon,
        noise_multiplier = sigma,
        epsilon = summary.epsilon,
        f1 = test.f1,
        accuracy = test.accuracy,
        "experiment finished"
    );

    Ok(ReportRow {
        model: kind,
        target_epsilon,
        noise_multiplier: summary.noise_multiplier,
        epsilon: summary.epsilon,
        delta: summary.delta,
        steps: summary.steps,
        f1: test.f1,
        accuracy: test.accuracy,
        precision: test.precision,
        recall: test.recall,
        validation_f1,
    })
}

fn non_empty(ds: &Dataset) -> Option<&Dataset> {
    if ds.is_empty() {
        None
    } else {
        Some(ds)
    }
}

/// Run every (model, privacy setting) pair of `config` on prepared splits.
pub fn run_sweep(config: &ExperimentConfig, splits: &DataSplits) -> Result<Report> {
    config.validate()?;
    let settings = config.privacy_settings();
    let mut report = Report::default();
    for &kind in &config.models {
        for &setting in &settings {
            report.push(run_single(config, kind, setting, splits)?);
        }
    }
    Ok(report)
}

/// [`prepare_data`] then [`run_sweep`].
pub fn run_sweep_on_raw(
    config: &ExperimentConfig,
    images: &Array3<u8>,
    labels: &[u8],
) -> Result<Report> {
    let splits = prepare_data(config, images, labels)?;
    run_sweep(config, &splits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dp_mnist_data::synthetic_digits;

    fn small_config() -> ExperimentConfig {
        let mut cfg = ExperimentConfig::default();
        cfg.seed = 4;
        cfg.models = vec![ModelKind::Logistic];
        cfg.data.train = 300;
        cfg.data.validation = 50;
        cfg.data.test = 100;
        cfg.privacy.epsilons = vec![2.0];
        cfg.privacy.noise_multipliers = vec![0.0];
        cfg.training.batch_size = 30;
        cfg.training.epochs = 3;
        cfg.training.learning_rate = 0.5;
        cfg
    }

    #[test]
    fn settings_list_targets_then_multipliers() {
        let cfg = small_config();
        assert_eq!(
            cfg.privacy_settings(),
            vec![
                PrivacySetting::TargetEpsilon(2.0),
                PrivacySetting::NoiseMultiplier(0.0)
            ]
        );
    }

    #[test]
    fn calibrated_run_spends_about_the_target() {
        let cfg = small_config();
        let (images, labels) = synthetic_digits(600, 1);
        let splits = prepare_data(&cfg, &images, &labels).expect("data");
        let row = run_single(
            &cfg,
            ModelKind::Logistic,
            PrivacySetting::TargetEpsilon(2.0),
            &splits,
        )
        .expect("run");
        assert!(row.epsilon <= 2.0 + 1e-6);
        assert!(row.epsilon > 1.9);
        assert_eq!(row.steps, 30);
        assert!(row.validation_f1.is_some());
    }

    #[test]
    fn build_model_adds_implicit_channel() {
        let m = build_model(ModelKind::Cnn, &[28, 28], 2, 0).expect("model");
        assert_eq!(m.input_shape(), &[1, 28, 28]);
        assert!(build_model(ModelKind::Cnn, &[784], 2, 0).is_err());
        let m = build_model(ModelKind::Logistic, &[28, 28], 2, 0).expect("model");
        assert_eq!(m.num_params(), 785);
    }

    #[test]
    fn too_few_examples_is_an_error() {
        let cfg = small_config();
        let (images, labels) = synthetic_digits(100, 1);
        assert!(prepare_data(&cfg, &images, &labels).is_err());
    }
}
