//! Binary classification metrics at a 0.5 decision threshold.

use serde::Serialize;

use dp_mnist_core::{DpError, Result};
use dp_mnist_data::Dataset;

use crate::model::{bce_with_logit, sigmoid, Model};

/// Decision threshold on the predicted probability.
pub const THRESHOLD: f64 = 0.5;

/// Counts of a binary confusion matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    /// Predicted 1, label 1.
    pub true_positives: usize,
    /// Predicted 1, label 0.
    pub false_positives: usize,
    /// Predicted 0, label 0.
    pub true_negatives: usize,
    /// Predicted 0, label 1.
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    /// Tally predictions (`proba >= 0.5` is positive) against 0/1 labels.
    pub fn from_probabilities(probabilities: &[f64], labels: &[f64]) -> Result<Self> {
        if probabilities.len() != labels.len() {
            return Err(DpError::shape(&[labels.len()], &[probabilities.len()]));
        }
        let mut cm = Self::default();
        for (&p, &y) in probabilities.iter().zip(labels) {
            cm.record(p >= THRESHOLD, y >= THRESHOLD);
        }
        Ok(cm)
    }

    /// Add one prediction.
    pub fn record(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_negatives += 1,
        }
    }

    /// Number of predictions tallied.
    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    /// `tp / (tp + fp)`, or 0 with no positive predictions.
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// `tp / (tp + fn)`, or 0 with no positive labels.
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Fraction of correct predictions.
    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    /// Harmonic mean of precision and recall; 0 when both are 0.
    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Metrics of a model over a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Evaluation {
    /// Mean binary cross entropy.
    pub loss: f64,
    /// Confusion counts.
    pub confusion: ConfusionMatrix,
    /// Accuracy.
    pub accuracy: f64,
    /// Precision.
    pub precision: f64,
    /// Recall.
    pub recall: f64,
    /// F1 score.
    pub f1: f64,
}

/// Positive-class probabilities for every example.
pub fn predict_dataset<M: Model + ?Sized>(model: &M, data: &Dataset) -> Result<Vec<f64>> {
    model.validate_batch(data.images().shape())?;
    (0..data.len())
        .map(|i| model.predict_proba(data.example(i)))
        .collect()
}

/// Evaluate `model` on `data`.
pub fn evaluate<M: Model + ?Sized>(model: &M, data: &Dataset) -> Result<Evaluation> {
    model.validate_batch(data.images().shape())?;
    if data.is_empty() {
        return Err(DpError::data("cannot evaluate on an empty dataset"));
    }

    let mut confusion = ConfusionMatrix::default();
    let mut loss = 0.0;
    for i in 0..data.len() {
        let z = model.logit(data.example(i))?;
        let y = data.label(i);
        loss += bce_with_logit(z, y);
        confusion.record(sigmoid(z) >= THRESHOLD, y >= THRESHOLD);
    }

    Ok(Evaluation {
        loss: loss / data.len() as f64,
        confusion,
        accuracy: confusion.accuracy(),
        precision: confusion.precision(),
        recall: confusion.recall(),
        f1: confusion.f1(),
    })
}
