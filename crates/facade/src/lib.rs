//! Facade crate: differentially private binary MNIST experiments.
//!
//! Re-exports the workspace crates and adds the experiment layer that sweeps
//! privacy budgets, trains both models with DP-SGD and reports F1 against
//! epsilon.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod experiment;
pub mod report;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use dp_mnist_accounting as accounting;
pub use dp_mnist_core as core;
pub use dp_mnist_data as data;
pub use dp_mnist_models as models;

pub use accounting::{
    calibrate_dp_mechanism, calibrate_noise_multiplier, calibrate_num_updates,
    compute_dpsgd_epsilon, compute_rdp, default_orders, dpsgd_event, epsilon_from_rdp,
    gaussian_rdp_epsilon, DpEvent, DpParams, EpsilonConversion, RdpAccountant, Sampler,
};
pub use config::{DataConfig, ExperimentConfig, PrivacyConfig, TrainingConfig};
pub use dp_mnist_core::{DpError, Result};
pub use data::{load_idx_pair, synthetic_digits, DataSplits, Dataset};
pub use experiment::{
    build_model, prepare_data, resolve_noise_multiplier, run_single, run_sweep, run_sweep_on_raw,
    PrivacySetting,
};
pub use models::{
    evaluate, ConfusionMatrix, DpSgdConfig, DpSgdTrainer, Evaluation, LogisticRegression, Model,
    ModelKind, SmallCnn, TrainingSummary,
};
pub use report::{Report, ReportRow};

/// Convenience prelude covering the whole pipeline.
pub mod prelude {
    pub use crate::config::{DataConfig, ExperimentConfig, PrivacyConfig, TrainingConfig};
    pub use crate::experiment::{prepare_data, run_single, run_sweep, PrivacySetting};
    pub use crate::report::{Report, ReportRow};
    pub use dp_mnist_accounting::prelude::*;
    pub use dp_mnist_core::prelude::*;
    pub use dp_mnist_data::prelude::*;
    pub use dp_mnist_models::prelude::*;
}
