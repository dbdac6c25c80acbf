// ============================================================
// Layer 6 — Prediction Store
// ============================================================
// Stored predictions keyed by (article, subject, algorithm,
// model_version). Inserts ignore conflicts: a key that is already
// stored keeps its original record, so re-running prediction is
// idempotent.
//
//   JsonlPredictionStore  <models_dir>/predictions.jsonl, one
//                         record per line, appended
//   MemoryPredictionStore dry-run sink

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use crate::domain::{
    error::PipelineResult,
    prediction::{PredictionKey, PredictionRecord},
    traits::PredictionStore,
};

pub const PREDICTIONS_FILE: &str = "predictions.jsonl";

/// Keep only records whose key is neither stored nor repeated earlier
/// in the same batch.
fn new_records(
    index:   &BTreeMap<PredictionKey, PredictionRecord>,
    records: Vec<PredictionRecord>,
) -> Vec<PredictionRecord> {
    let mut fresh: BTreeMap<PredictionKey, PredictionRecord> = BTreeMap::new();
    let mut order = Vec::new();
    for record in records {
        let key = record.key();
        if index.contains_key(&key) || fresh.contains_key(&key) {
            tracing::debug!("Prediction for article {} already stored, ignoring", key.article_id);
            continue;
        }
        order.push(key.clone());
        fresh.insert(key, record);
    }
    order.into_iter().filter_map(|k| fresh.remove(&k)).collect()
}

// ─── JsonlPredictionStore ─────────────────────────────────────────────────────
pub struct JsonlPredictionStore {
    path:  PathBuf,
    index: BTreeMap<PredictionKey, PredictionRecord>,
}

impl JsonlPredictionStore {
    /// Open (or start) the store under `dir`. Unreadable lines are skipped.
    pub fn open(dir: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = dir.as_ref().join(PREDICTIONS_FILE);
        let mut index = BTreeMap::new();
        if path.exists() {
            let file = fs::File::open(&path)?;
            for (n, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<PredictionRecord>(&line) {
                    // First record for a key wins, matching insert semantics.
                    Ok(r) => {
                        index.entry(r.key()).or_insert(r);
                    }
                    Err(e) => tracing::warn!("Skipping unreadable prediction line {}: {}", n + 1, e),
                }
            }
        }
        Ok(Self { path, index })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl PredictionStore for JsonlPredictionStore {
    fn contains(&self, key: &PredictionKey) -> bool {
        self.index.contains_key(key)
    }

    fn get(&self, key: &PredictionKey) -> Option<PredictionRecord> {
        self.index.get(key).cloned()
    }

    fn insert_ignore_conflicts(&mut self, records: Vec<PredictionRecord>) -> PipelineResult<usize> {
        let fresh = new_records(&self.index, records);
        if fresh.is_empty() {
            return Ok(0);
        }

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
        for r in &fresh {
            writeln!(f, "{}", serde_json::to_string(r)?)?;
        }

        let inserted = fresh.len();
        for r in fresh {
            self.index.insert(r.key(), r);
        }
        Ok(inserted)
    }
}

// ─── MemoryPredictionStore ────────────────────────────────────────────────────
#[derive(Debug, Default)]
pub struct MemoryPredictionStore {
    index: BTreeMap<PredictionKey, PredictionRecord>,
}

impl MemoryPredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }
}

impl PredictionStore for MemoryPredictionStore {
    fn contains(&self, key: &PredictionKey) -> bool {
        self.index.contains_key(key)
    }

    fn get(&self, key: &PredictionKey) -> Option<PredictionRecord> {
        self.index.get(key).cloned()
    }

    fn insert_ignore_conflicts(&mut self, records: Vec<PredictionRecord>) -> PipelineResult<usize> {
        let fresh    = new_records(&self.index, records);
        let inserted = fresh.len();
        for r in fresh {
            self.index.insert(r.key(), r);
        }
        Ok(inserted)
    }
}
