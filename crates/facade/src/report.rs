//! Sweep results as CSV and JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use dp_mnist_core::{DpError, Result};
use dp_mnist_models::ModelKind;

/// One trained configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    /// Model family.
    pub model: ModelKind,
    /// Requested epsilon, when the noise was calibrated to one.
    pub target_epsilon: Option<f64>,
    /// Noise multiplier used in training.
    pub noise_multiplier: f64,
    /// Epsilon spent by training; infinite without noise.
    #[serde(with = "epsilon_serde")]
    pub epsilon: f64,
    /// Delta of the guarantee.
    pub delta: f64,
    /// Noisy updates taken.
    pub steps: u64,
    /// Test F1.
    pub f1: f64,
    /// Test accuracy.
    pub accuracy: f64,
    /// Test precision.
    pub precision: f64,
    /// Test recall.
    pub recall: f64,
    /// Validation F1, if a validation split exists.
    pub validation_f1: Option<f64>,
}

/// Serde adapter writing an infinite epsilon as `"inf"`.
mod epsilon_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(epsilon: &f64, s: S) -> Result<S::Ok, S::Error> {
        if *epsilon == f64::INFINITY {
            s.serialize_str("inf")
        } else {
            s.serialize_f64(*epsilon)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(t) if t == "inf" => Ok(f64::INFINITY),
            Repr::Text(t) => Err(serde::de::Error::invalid_value(
                serde::de::Unexpected::Str(&t),
                &"a number or \"inf\"",
            )),
        }
    }
}

const CSV_HEADER: &str = "model,target_epsilon,noise_multiplier,epsilon,delta,steps,f1,accuracy,precision,recall,validation_f1";

/// Collected rows of a sweep.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Rows in the order they were run.
    pub rows: Vec<ReportRow>,
}

impl Report {
    /// Append a row.
    pub fn push(&mut self, row: ReportRow) {
        self.rows.push(row);
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the report has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `(epsilon, f1)` points for one model, sorted by epsilon.
    pub fn f1_vs_epsilon(&self, model: ModelKind) -> Vec<(f64, f64)> {
        let mut points: Vec<(f64, f64)> = self
            .rows
            .iter()
            .filter(|r| r.model == model)
            .map(|r| (r.epsilon, r.f1))
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        points
    }

    /// Render as CSV with a header line. Missing values are empty cells.
    pub fn to_csv(&self) -> String {
        let mut out = String::with_capacity(CSV_HEADER.len() + 1 + 96 * self.rows.len());
        out.push_str(CSV_HEADER);
        out.push('\n');
        for r in &self.rows {
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{}\n",
                r.model,
                opt(r.target_epsilon),
                r.noise_multiplier,
                r.epsilon,
                r.delta,
                r.steps,
                r.f1,
                r.accuracy,
                r.precision,
                r.recall,
                opt(r.validation_f1),
            ));
        }
        out
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DpError::serialization(format!("encode report: {e}")))
    }

    /// Parse a report written by [`Report::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DpError::serialization(format!("decode report: {e}")))
    }

    /// Write [`Report::to_csv`] to `path`.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_csv())?;
        tracing::info!(path = %path.as_ref().display(), rows = self.len(), "wrote CSV report");
        Ok(())
    }

    /// Write [`Report::to_json`] to `path`.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        tracing::info!(path = %path.as_ref().display(), rows = self.len(), "wrote JSON report");
        Ok(())
    }
}

fn opt(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(model: ModelKind, epsilon: f64, f1: f64) -> ReportRow {
        ReportRow {
            model,
            target_epsilon: Some(epsilon),
            noise_multiplier: 1.0,
            epsilon,
            delta: 1e-5,
            steps: 100,
            f1,
            accuracy: 0.9,
            precision: 0.8,
            recall: 0.7,
            validation_f1: None,
        }
    }

    #[test]
    fn csv_has_header_and_one_line_per_row() {
        let mut report = Report::default();
        report.push(row(ModelKind::Logistic, 1.0, 0.75));
        report.push(row(ModelKind::Cnn, 2.0, 0.5));
        let csv = report.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "logistic,1,1,1,0.00001,100,0.75,0.9,0.8,0.7,");
        let columns = CSV_HEADER.split(',').count();
        assert!(lines.iter().all(|l| l.split(',').count() == columns));
    }

    #[test]
    fn json_lists_rows() {
        let mut report = Report::default();
        report.push(row(ModelKind::Cnn, 4.0, 0.9));
        let json = report.to_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["rows"][0]["model"], "cnn");
        assert_eq!(value["rows"][0]["f1"], 0.9);
    }

    #[test]
    fn json_keeps_an_unbounded_epsilon() {
        let mut report = Report::default();
        let mut baseline = row(ModelKind::Logistic, f64::INFINITY, 0.97);
        baseline.target_epsilon = None;
        baseline.noise_multiplier = 0.0;
        report.push(baseline);
        report.push(row(ModelKind::Cnn, 2.0, 0.9));

        let json = report.to_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["rows"][0]["epsilon"], "inf");
        assert_eq!(value["rows"][1]["epsilon"], 2.0);

        let back = Report::from_json(&json).expect("decode");
        assert_eq!(back, report);
        assert!(back.rows[0].epsilon.is_infinite());
        assert!(report.to_csv().lines().nth(1).expect("row").contains(",inf,"));
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let err = Report::from_json("{\"rows\": [{\"epsilon\": \"lots\"}]}").unwrap_err();
        assert!(matches!(err, DpError::SerializationError { .. }));
        assert!(Report::from_json("not json").is_err());
    }

    #[test]
    fn f1_curve_is_sorted_per_model() {
        let mut report = Report::default();
        report.push(row(ModelKind::Logistic, 8.0, 0.95));
        report.push(row(ModelKind::Cnn, 1.0, 0.6));
        report.push(row(ModelKind::Logistic, 0.5, 0.7));
        assert_eq!(
            report.f1_vs_epsilon(ModelKind::Logistic),
            vec![(0.5, 0.7), (8.0, 0.95)]
        );
    }

    #[test]
    fn writes_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut report = Report::default();
        report.push(row(ModelKind::Logistic, 1.0, 0.8));
        let csv = dir.path().join("sweep.csv");
        let json = dir.path().join("sweep.json");
        report.write_csv(&csv).expect("csv");
        report.write_json(&json).expect("json");
        assert!(std::fs::read_to_string(csv).expect("read").starts_with("model,"));
        let back = Report::from_json(&std::fs::read_to_string(json).expect("read")).expect("parse");
        assert_eq!(back, report);
    }
}
