//! The DP-SGD training loop with built-in privacy accounting.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use dp_mnist_accounting::{EpsilonConversion, RdpAccountant, Sampler};
use dp_mnist_core::{BatchSampler, DpError, DpSgdAggregator, Result, Tensor};
use dp_mnist_data::Dataset;

use crate::metrics::evaluate;
use crate::model::Model;

/// Hyperparameters of one DP-SGD run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DpSgdConfig {
    /// Per-example gradient L2 bound `C`.
    pub l2_clip_norm: f64,
    /// Noise multiplier `sigma`; 0 trains without privacy.
    pub noise_multiplier: f64,
    /// SGD step size.
    pub learning_rate: f64,
    /// Passes over the training set.
    pub epochs: usize,
    /// Expected (Poisson) or exact (shuffle) batch size.
    pub batch_size: usize,
    /// Batch sampling scheme.
    #[serde(with = "sampler_serde")]
    pub sampler: Sampler,
    /// Target delta for the reported epsilon.
    pub delta: f64,
    /// Seed for batch sampling and noise.
    pub seed: u64,
}

impl Default for DpSgdConfig {
    fn default() -> Self {
        Self {
            l2_clip_norm: 1.0,
            noise_multiplier: 1.1,
            learning_rate: 0.1,
            epochs: 20,
            batch_size: 128,
            sampler: Sampler::Poisson,
            delta: 1e-5,
            seed: 0,
        }
    }
}

impl DpSgdConfig {
    /// Reject values no training run can use.
    pub fn validate(&self) -> Result<()> {
        if !self.l2_clip_norm.is_finite() || self.l2_clip_norm <= 0.0 {
            return Err(DpError::invalid("l2_clip_norm must be positive and finite"));
        }
        if !self.noise_multiplier.is_finite() || self.noise_multiplier < 0.0 {
            return Err(DpError::invalid(
                "noise_multiplier must be non-negative and finite",
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(DpError::invalid("learning_rate must be positive and finite"));
        }
        if self.epochs == 0 {
            return Err(DpError::invalid("epochs must be positive"));
        }
        if self.batch_size == 0 {
            return Err(DpError::invalid("batch_size must be positive"));
        }
        if !self.delta.is_finite() || self.delta <= 0.0 || self.delta >= 1.0 {
            return Err(DpError::invalid("delta must be in (0, 1)"));
        }
        Ok(())
    }
}

/// Serde adapter writing [`Sampler`] as `"poisson"` or `"shuffle"`.
pub mod sampler_serde {
    use dp_mnist_accounting::Sampler;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as a lowercase name.
    pub fn serialize<S: Serializer>(sampler: &Sampler, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(match sampler {
            Sampler::Poisson => "poisson",
            Sampler::Shuffle => "shuffle",
        })
    }

    /// Deserialize from a lowercase name.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Sampler, D::Error> {
        let name = String::deserialize(d)?;
        match name.as_str() {
            "poisson" => Ok(Sampler::Poisson),
            "shuffle" => Ok(Sampler::Shuffle),
            other => Err(serde::de::Error::unknown_variant(
                other,
                &["poisson", "shuffle"],
            )),
        }
    }
}

/// Progress after one epoch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean training loss over the examples sampled this epoch.
    pub loss: f64,
    /// Training accuracy at the end of the epoch.
    pub accuracy: f64,
    /// Cumulative epsilon spent so far.
    pub epsilon: f64,
}

/// Outcome of a training run.
///
/// `noise_multiplier` and `sampling_rate` are the values both the updates
/// and the accountant used, so `epsilon` holds for the trained parameters.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainingSummary {
    /// Per-epoch progress.
    pub history: Vec<EpochStats>,
    /// Noise multiplier used.
    pub noise_multiplier: f64,
    /// Sampling rate `batch_size / n` used by the accountant.
    pub sampling_rate: f64,
    /// Number of noisy updates taken.
    pub steps: u64,
    /// Final epsilon; infinite when trained without noise.
    pub epsilon: f64,
    /// Delta the epsilon is stated for.
    pub delta: f64,
    /// Renyi order achieving `epsilon`, if any noise was added.
    pub order: Option<f64>,
}

/// Runs DP-SGD on a [`Model`].
#[derive(Clone, Debug, Default)]
pub struct DpSgdTrainer {
    config: DpSgdConfig,
    conversion: EpsilonConversion,
}

impl DpSgdTrainer {
    /// Trainer with the given hyperparameters.
    pub fn new(config: DpSgdConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            conversion: EpsilonConversion::default(),
        })
    }

    /// Use a different RDP to (epsilon, delta) conversion for reporting.
    pub fn with_conversion(mut self, conversion: EpsilonConversion) -> Self {
        self.conversion = conversion;
        self
    }

    /// Hyperparameters.
    pub fn config(&self) -> &DpSgdConfig {
        &self.config
    }

    /// Train `model` on `train` in place.
    ///
    /// The data shape is checked against the model before any update.
    pub fn fit<M: Model + ?Sized>(&self, model: &mut M, train: &Dataset) -> Result<TrainingSummary> {
        let cfg = &self.config;
        model.validate_batch(train.images().shape())?;
        let n = train.len();
        if cfg.batch_size > n {
            return Err(DpError::invalid(format!(
                "batch_size {} exceeds the {n} training examples",
                cfg.batch_size
            )));
        }

        let sampler = match cfg.sampler {
            Sampler::Poisson => BatchSampler::poisson(n, cfg.batch_size)?,
            Sampler::Shuffle => BatchSampler::shuffle(cfg.batch_size)?,
        };
        let sampling_rate = cfg.batch_size as f64 / n as f64;
        let aggregator =
            DpSgdAggregator::new(cfg.l2_clip_norm, cfg.noise_multiplier, cfg.batch_size as f64)?;
        let private = cfg.noise_multiplier > 0.0;
        let mut accountant = RdpAccountant::new().with_conversion(self.conversion);
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        let dim = model.num_params();

        tracing::info!(
            model = %model.kind(),
            examples = n,
            num_params = dim,
            noise_multiplier = cfg.noise_multiplier,
            sampling_rate,
            epochs = cfg.epochs,
            "starting DP-SGD"
        );

        let mut history = Vec::with_capacity(cfg.epochs);
        let mut steps = 0u64;
        let mut epsilon = if private { 0.0 } else { f64::INFINITY };
        let mut order = None;

        for epoch in 1..=cfg.epochs {
            let batches = sampler.epoch_batches(n, &mut rng);
            let mut loss_sum = 0.0;
            let mut seen = 0usize;
            let mut clipped = 0usize;

            for batch in &batches {
                let mut grads: Vec<Tensor> = Vec::with_capacity(batch.len());
                for &i in batch {
                    let (loss, grad) = model.loss_and_grad(train.example(i), train.label(i))?;
                    loss_sum += loss;
                    grads.push(grad);
                }
                seen += batch.len();
                let update = aggregator.aggregate(&grads, dim, &mut rng)?;
                clipped += update.num_clipped;
                model.apply_update(&update.gradient, cfg.learning_rate)?;
            }

            let epoch_steps = batches.len() as u64;
            steps += epoch_steps;
            if private {
                accountant.compose(cfg.noise_multiplier, sampling_rate, epoch_steps)?;
                let (eps, alpha) = accountant.get_epsilon_and_order(cfg.delta)?;
                epsilon = eps;
                order = Some(alpha);
            }

            let accuracy = evaluate(&*model, train)?.accuracy;
            let loss = if seen == 0 { 0.0 } else { loss_sum / seen as f64 };
            tracing::info!(
                epoch,
                loss,
                accuracy,
                epsilon,
                clipped_fraction = if seen == 0 { 0.0 } else { clipped as f64 / seen as f64 },
                "epoch finished"
            );
            history.push(EpochStats {
                epoch,
                loss,
                accuracy,
                epsilon,
            });
        }

        Ok(TrainingSummary {
            history,
            noise_multiplier: cfg.noise_multiplier,
            sampling_rate,
            steps,
            epsilon,
            delta: cfg.delta,
            order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnn::SmallCnn;
    use crate::logistic::LogisticRegression;
    use dp_mnist_accounting::compute_dpsgd_epsilon;
    use ndarray::{Array1, ArrayD, IxDyn};

    /// Two linearly separable blobs in 4 features.
    fn blobs(n: usize) -> Dataset {
        let images = ArrayD::from_shape_fn(IxDyn(&[n, 4]), |idx| {
            let positive = idx[0] % 2 == 0;
            let jitter = ((idx[0] * 7 + idx[1] * 3) % 5) as f64 * 0.02;
            match (positive, idx[1] < 2) {
                (true, true) | (false, false) => 0.45 + jitter,
                _ => jitter,
            }
        });
        let labels = Array1::from_shape_fn(n, |i| if i % 2 == 0 { 1.0 } else { 0.0 });
        Dataset::new(images, labels).expect("dataset")
    }

    fn config() -> DpSgdConfig {
        DpSgdConfig {
            noise_multiplier: 0.8,
            learning_rate: 0.5,
            epochs: 5,
            batch_size: 20,
            delta: 1e-4,
            seed: 7,
            ..DpSgdConfig::default()
        }
    }

    #[test]
    fn learns_separable_data_and_reports_epsilon() {
        let data = blobs(200);
        let mut model = LogisticRegression::new(&[4]).expect("model");
        let trainer = DpSgdTrainer::new(config()).expect("trainer");
        let summary = trainer.fit(&mut model, &data).expect("fit");

        assert_eq!(summary.history.len(), 5);
        assert_eq!(summary.steps, 50);
        assert!((summary.sampling_rate - 0.1).abs() < 1e-12);
        assert!(summary.history.last().map(|s| s.accuracy).unwrap_or(0.0) > 0.9);

        let expected = compute_dpsgd_epsilon(0.1, 0.8, 50, 1e-4).expect("epsilon");
        assert!((summary.epsilon - expected).abs() < 1e-9);
        let eps: Vec<f64> = summary.history.iter().map(|s| s.epsilon).collect();
        assert!(eps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn training_is_seed_deterministic() {
        let data = blobs(100);
        let trainer = DpSgdTrainer::new(config()).expect("trainer");
        let mut a = LogisticRegression::new(&[4]).expect("model");
        let mut b = LogisticRegression::new(&[4]).expect("model");
        trainer.fit(&mut a, &data).expect("fit");
        trainer.fit(&mut b, &data).expect("fit");
        assert_eq!(a, b);
    }

    #[test]
    fn shape_mismatch_is_rejected_before_any_update() {
        let images = ArrayD::zeros(IxDyn(&[40, 8, 8]));
        let labels = Array1::from_shape_fn(40, |i| (i % 2) as f64);
        let data = Dataset::new(images, labels).expect("dataset");

        let mut model = SmallCnn::new((1, 8, 8), 2, 0).expect("model");
        let before = model.clone();
        let trainer = DpSgdTrainer::new(config()).expect("trainer");
        let err = trainer.fit(&mut model, &data).unwrap_err();
        assert!(matches!(err, DpError::ShapeMismatch { .. }));
        assert_eq!(model, before);

        let fixed = data.with_channel_axis().expect("reshape");
        assert!(trainer.fit(&mut model, &fixed).is_ok());
    }

    #[test]
    fn zero_noise_reports_infinite_epsilon() {
        let data = blobs(60);
        let mut model = LogisticRegression::new(&[4]).expect("model");
        let cfg = DpSgdConfig {
            noise_multiplier: 0.0,
            epochs: 1,
            ..config()
        };
        let summary = DpSgdTrainer::new(cfg)
            .expect("trainer")
            .fit(&mut model, &data)
            .expect("fit");
        assert!(summary.epsilon.is_infinite());
        assert!(summary.order.is_none());
    }

    #[test]
    fn shuffle_sampler_visits_every_example() {
        let data = blobs(50);
        let mut model = LogisticRegression::new(&[4]).expect("model");
        let cfg = DpSgdConfig {
            sampler: Sampler::Shuffle,
            batch_size: 16,
            epochs: 2,
            ..config()
        };
        let summary = DpSgdTrainer::new(cfg)
            .expect("trainer")
            .fit(&mut model, &data)
            .expect("fit");
        assert_eq!(summary.steps, 8);
        assert!(summary.epsilon.is_finite());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = DpSgdConfig {
            l2_clip_norm: 0.0,
            ..DpSgdConfig::default()
        };
        assert!(DpSgdTrainer::new(bad).is_err());
        let bad = DpSgdConfig {
            delta: 1.0,
            ..DpSgdConfig::default()
        };
        assert!(DpSgdTrainer::new(bad).is_err());

        let data = blobs(10);
        let mut model = LogisticRegression::new(&[4]).expect("model");
        let trainer = DpSgdTrainer::new(config()).expect("trainer");
        assert!(trainer.fit(&mut model, &data).is_err());
    }
}
