use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw article row as handed over by the surrounding application.
/// `label` is present for annotated rows and absent for the unlabeled pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleRow {
    pub id:             u64,
    pub title:          String,
    #[serde(default)]
    pub summary:        Option<String>,
    pub discovery_date: DateTime<Utc>,
    #[serde(default)]
    pub label:          Option<bool>,
}

impl ArticleRow {
    /// Title and summary joined, before any cleaning.
    pub fn raw_text(&self) -> String {
        match self.summary.as_deref() {
            Some(s) if !s.trim().is_empty() => format!("{} {}", self.title, s),
            _ => self.title.clone(),
        }
    }
}

/// Where a label came from. Pseudo labels keep the confidence they were
/// promoted with and the 1-based self-training round that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provenance", rename_all = "snake_case")]
pub enum Provenance {
    Annotated,
    Pseudo { confidence: f32, source_iteration: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub id:    u64,
    pub text:  String,
    pub label: bool,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl LabeledExample {
    pub fn annotated(id: u64, text: impl Into<String>, label: bool) -> Self {
        Self { id, text: text.into(), label, provenance: Provenance::Annotated }
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(self.provenance, Provenance::Pseudo { .. })
    }

    pub fn confidence(&self) -> Option<f32> {
        match self.provenance {
            Provenance::Pseudo { confidence, .. } => Some(confidence),
            Provenance::Annotated => None,
        }
    }

    pub fn source_iteration(&self) -> Option<usize> {
        match self.provenance {
            Provenance::Pseudo { source_iteration, .. } => Some(source_iteration),
            Provenance::Annotated => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlabeledExample {
    pub id:   u64,
    pub text: String,
}

/// Disjoint, class-stratified partitions of one assembled dataset.
#[derive(Debug, Clone, Default)]
pub struct DatasetSplit {
    pub train:      Vec<LabeledExample>,
    pub validation: Vec<LabeledExample>,
    pub test:       Vec<LabeledExample>,
}

impl DatasetSplit {
    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.train.len(), self.validation.len(), self.test.len())
    }
}

/// Split examples into the parallel text/label vectors trainers consume.
pub fn texts_and_labels(examples: &[LabeledExample]) -> (Vec<String>, Vec<bool>) {
    examples.iter().map(|e| (e.text.clone(), e.label)).unzip()
}
