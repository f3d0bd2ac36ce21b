//! Binary image classifiers and the DP-SGD loop that trains them.
//!
//! Models expose flat parameters and per-example gradients through the
//! [`Model`] trait, which is all the trainer needs to clip, noise and
//! account for every update.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cnn;
pub mod logistic;
pub mod metrics;
pub mod model;
pub mod trainer;

pub use cnn::SmallCnn;
pub use logistic::LogisticRegression;
pub use metrics::{evaluate, predict_dataset, ConfusionMatrix, Evaluation};
pub use model::{bce_with_logit, sigmoid, Model, ModelKind};
pub use trainer::{DpSgdConfig, DpSgdTrainer, EpochStats, TrainingSummary};

/// Common imports for training.
pub mod prelude {
    pub use crate::{
        evaluate, ConfusionMatrix, DpSgdConfig, DpSgdTrainer, EpochStats, Evaluation,
        LogisticRegression, Model, ModelKind, SmallCnn, TrainingSummary,
    };
}
