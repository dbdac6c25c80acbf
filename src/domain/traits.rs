// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer only ever talks to these traits:
//
//   TextClassifier   one trained model family (transformer,
//                    GBDT over TF-IDF, LSTM)
//   TrainerFactory   builds a fresh TextClassifier per tag
//   ArticleSource    where raw rows come from
//   RunLogStore      append-only audit trail
//   PredictionStore  stored predictions, insert-or-ignore
//   Summariser       optional text condensing collaborator
//
// Tests swap in fakes for every one of them.

use std::path::{Path, PathBuf};

use crate::domain::{
    algorithm::Algorithm,
    article::ArticleRow,
    error::{PipelineError, PipelineResult},
    prediction::{PredictionKey, PredictionRecord},
    report::{binarize, EvaluationReport, Predictions, TrainingHistory},
    run_log::RunLogEntry,
};

// ─── TextClassifier ───────────────────────────────────────────────────────────
/// Capability set shared by every trainer.
///
/// `predict_proba` returns the positive-class probability per text;
/// `predict` and `evaluate` are built on top of it so all three
/// families binarize with the same `>=` rule.
pub trait TextClassifier {
    fn algorithm(&self) -> Algorithm;

    /// Fit from scratch. Neural trainers stop early after 3 epochs
    /// without validation-loss improvement and keep the best weights.
    fn train(
        &mut self,
        train_texts:  &[String],
        train_labels: &[bool],
        val_texts:    &[String],
        val_labels:   &[bool],
        epochs:       usize,
        batch_size:   usize,
    ) -> PipelineResult<TrainingHistory>;

    fn predict_proba(&self, texts: &[String]) -> PipelineResult<Vec<f32>>;

    fn predict(&self, texts: &[String], threshold: f32) -> PipelineResult<Predictions> {
        let probabilities = self.predict_proba(texts)?;
        let labels = probabilities.iter().map(|&p| binarize(p, threshold)).collect();
        Ok(Predictions { labels, probabilities })
    }

    fn evaluate(
        &self,
        texts:     &[String],
        labels:    &[bool],
        threshold: f32,
    ) -> PipelineResult<EvaluationReport> {
        if texts.len() != labels.len() {
            return Err(PipelineError::data(format!(
                "{} texts but {} labels", texts.len(), labels.len()
            )));
        }
        let probabilities = self.predict_proba(texts)?;
        Ok(crate::ml::evaluation::evaluate_binary(labels, &probabilities, threshold))
    }

    /// Write every artifact into `dir` and return the written paths.
    fn save(&self, dir: &Path) -> PipelineResult<Vec<PathBuf>>;

    /// Restore from `dir`. A missing file is a `ModelLoad` error.
    fn load(&mut self, dir: &Path) -> PipelineResult<()>;

    fn hyperparameters(&self) -> serde_json::Value;
}

// ─── TrainerFactory ───────────────────────────────────────────────────────────
/// Builds a brand-new, untrained classifier for a tag.
pub trait TrainerFactory {
    fn create(&self, algorithm: Algorithm) -> PipelineResult<Box<dyn TextClassifier>>;
}

impl<F> TrainerFactory for F
where
    F: Fn(Algorithm) -> PipelineResult<Box<dyn TextClassifier>>,
{
    fn create(&self, algorithm: Algorithm) -> PipelineResult<Box<dyn TextClassifier>> {
        self(algorithm)
    }
}

// ─── ArticleSource ────────────────────────────────────────────────────────────
/// Rows returned by a source, with the count of lines that could not
/// be parsed and were skipped.
#[derive(Debug, Clone, Default)]
pub struct LoadedRows {
    pub rows:      Vec<ArticleRow>,
    pub malformed: usize,
}

pub trait ArticleSource {
    fn teams(&self) -> anyhow::Result<Vec<String>>;

    fn subjects(&self, team: &str) -> anyhow::Result<Vec<String>>;

    fn load_rows(&self, team: &str, subject: &str) -> anyhow::Result<LoadedRows>;
}

// ─── RunLogStore ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub success:       bool,
    pub model_version: Option<String>,
    pub error:         Option<String>,
}

pub trait RunLogStore {
    /// Persist a pending entry and return its id.
    fn start(&mut self, entry: RunLogEntry) -> PipelineResult<u64>;

    /// Complete an entry. A second call for the same id is an error.
    fn finish(&mut self, id: u64, outcome: RunOutcome) -> PipelineResult<()>;

    fn entries(&self) -> PipelineResult<Vec<RunLogEntry>>;
}

// ─── PredictionStore ──────────────────────────────────────────────────────────
pub trait PredictionStore {
    fn contains(&self, key: &PredictionKey) -> bool;

    fn get(&self, key: &PredictionKey) -> Option<PredictionRecord>;

    /// Insert records whose key is not stored yet; existing keys keep
    /// their original record. Returns how many rows were inserted.
    fn insert_ignore_conflicts(&mut self, records: Vec<PredictionRecord>) -> PipelineResult<usize>;
}

// ─── Summariser ───────────────────────────────────────────────────────────────
pub trait Summariser: Send + Sync {
    fn summarise(&self, text: &str) -> String;
}
