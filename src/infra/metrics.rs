// ============================================================
// Layer 6 — Training Metrics
// ============================================================
// Two things live here:
//
//   EarlyStopping  tracks the best validation loss seen so far
//                  and says when `patience` epochs have passed
//                  without improvement
//
//   MetricsRecord  the flat key → value map written to a
//                  version's metrics.json
//
// metrics.json only holds scalars and lists of scalars. Nested
// objects are flattened into `parent_child` keys. Values that
// cannot be stored (null, NaN, infinities, lists containing
// objects) are dropped with a warning; the rest is still saved.

use std::{collections::BTreeMap, fs, path::Path};

use serde_json::{Number, Value};

use crate::domain::{
    error::PipelineResult,
    report::{EvaluationReport, TrainingHistory},
};

pub const EARLY_STOPPING_PATIENCE: usize = 3;

// ─── EarlyStopping ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Improved,
    NoImprovement,
    Stop,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience:   usize,
    best_loss:  f64,
    best_epoch: usize,
    bad_epochs: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self { patience, best_loss: f64::INFINITY, best_epoch: 0, bad_epochs: 0 }
    }

    /// Record one epoch's validation loss. NaN never counts as improvement.
    pub fn observe(&mut self, epoch: usize, val_loss: f64) -> Observation {
        if val_loss < self.best_loss {
            self.best_loss  = val_loss;
            self.best_epoch = epoch;
            self.bad_epochs = 0;
            return Observation::Improved;
        }
        self.bad_epochs += 1;
        if self.bad_epochs >= self.patience {
            Observation::Stop
        } else {
            Observation::NoImprovement
        }
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }
}

// ─── MetricsRecord ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsRecord {
    values: BTreeMap<String, Value>,
}

impl MetricsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match value {
            Value::Null => tracing::warn!("Dropping metric '{}': null value", key),
            Value::Object(map) => {
                for (k, v) in map {
                    self.insert(format!("{key}_{k}"), v);
                }
            }
            Value::Array(items) => {
                if items.iter().all(is_storable_list_item) {
                    self.values.insert(key, Value::Array(items));
                } else {
                    tracing::warn!("Dropping metric '{}': list holds non-scalar values", key);
                }
            }
            scalar => {
                self.values.insert(key, scalar);
            }
        }
    }

    pub fn insert_f64(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        match Number::from_f64(value) {
            Some(n) => {
                self.values.insert(key, Value::Number(n));
            }
            None => tracing::warn!("Dropping metric '{}': non-finite value {}", key, value),
        }
    }

    /// Serialise anything and store it; a serialisation failure only
    /// drops this key.
    pub fn insert_serialized<T: serde::Serialize>(&mut self, key: impl Into<String>, value: &T) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(v)  => self.insert(key, v),
            Err(e) => tracing::warn!("Dropping metric '{}': {}", key, e),
        }
    }

    /// Add an evaluation report under `prefix_` keys, e.g. `val_accuracy`.
    pub fn insert_report(&mut self, prefix: &str, report: &EvaluationReport) {
        self.insert_f64(format!("{prefix}_accuracy"),  report.accuracy);
        self.insert_f64(format!("{prefix}_precision"), report.precision);
        self.insert_f64(format!("{prefix}_recall"),    report.recall);
        self.insert_f64(format!("{prefix}_f1"),        report.f1);
        match report.roc_auc {
            Some(v) => self.insert_f64(format!("{prefix}_roc_auc"), v),
            None => tracing::warn!("No {}_roc_auc: only one class present", prefix),
        }
        match report.pr_auc {
            Some(v) => self.insert_f64(format!("{prefix}_pr_auc"), v),
            None => tracing::warn!("No {}_pr_auc: only one class present", prefix),
        }
        self.insert_serialized(format!("{prefix}_confusion_matrix"), &report.confusion_matrix);
        self.insert_serialized(format!("{prefix}_per_class"), &report.per_class);
        self.insert_f64(format!("{prefix}_threshold"), f64::from(report.threshold));
    }

    pub fn insert_history(&mut self, history: &TrainingHistory) {
        self.insert("epochs_run", Value::from(history.epochs.len()));
        self.insert("best_epoch", Value::from(history.best_epoch));
        self.insert("stopped_early", Value::from(history.stopped_early));
        self.insert_f64("training_seconds", history.training_seconds);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn write(&self, path: &Path) -> PipelineResult<()> {
        fs::write(path, serde_json::to_string_pretty(&self.values)?)?;
        tracing::debug!("Wrote {} metrics to '{}'", self.values.len(), path.display());
        Ok(())
    }

    pub fn read(path: &Path) -> PipelineResult<Self> {
        let values: BTreeMap<String, Value> = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Self { values })
    }
}

fn is_storable_list_item(v: &Value) -> bool {
    match v {
        Value::Null | Value::Object(_) => false,
        Value::Array(inner) => inner.iter().all(is_storable_list_item),
        _ => true,
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_early_stopping_after_patience() {
        let mut es = EarlyStopping::new(3);
        assert_eq!(es.observe(1, 0.9), Observation::Improved);
        assert_eq!(es.observe(2, 0.7), Observation::Improved);
        assert_eq!(es.observe(3, 0.8), Observation::NoImprovement);
        assert_eq!(es.observe(4, f64::NAN), Observation::NoImprovement);
        assert_eq!(es.observe(5, 0.7), Observation::Stop);
        assert_eq!(es.best_epoch(), 2);
    }

    #[test]
    fn test_bad_values_dropped_not_fatal() {
        let mut m = MetricsRecord::new();
        m.insert_f64("val_accuracy", 0.9);
        m.insert_f64("val_roc_auc", f64::NAN);
        m.insert("model", Value::Null);
        m.insert("val_cm", json!([[1, 2], [3, 4]]));
        m.insert("val_bad_list", json!([1, {"x": 1}]));
        m.insert("val_per_class", json!({"relevant": {"f1": 0.5}}));

        assert_eq!(m.get_f64("val_accuracy"), Some(0.9));
        assert!(m.get("val_roc_auc").is_none());
        assert!(m.get("model").is_none());
        assert!(m.get("val_bad_list").is_none());
        assert_eq!(m.get("val_cm"), Some(&json!([[1, 2], [3, 4]])));
        assert_eq!(m.get_f64("val_per_class_relevant_f1"), Some(0.5));
    }

    #[test]
    fn test_write_read_round_trip() {
        let tmp  = TempDir::new().unwrap();
        let path = tmp.path().join("metrics.json");
        let mut m = MetricsRecord::new();
        m.insert_f64("test_f1", 0.75);
        m.insert("train_size", json!(12));
        m.write(&path).unwrap();
        assert_eq!(MetricsRecord::read(&path).unwrap(), m);
    }
}
