// ============================================================
// Layer 5 — Pseudo-Labeling (self-training)
// ============================================================
// Grows a small annotated training set with a model's own
// confident predictions on the unlabeled pool.
//
//   Init → TrainIteration → Predict → Filter
//        → (Promote → TrainIteration) | Terminate
//
// Every iteration trains a fresh classifier from the factory
// against the same validation set. An example is promoted when
// max(p, 1 − p) >= confidence_threshold; it takes the predicted
// class as its label and leaves the pool for good.
//
// The loop ends when the pool is empty, the iteration cap is
// reached, or a round promotes nothing. None of these is an
// error.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    algorithm::Algorithm,
    article::{texts_and_labels, LabeledExample, Provenance, UnlabeledExample},
    error::{PipelineError, PipelineResult},
    report::{binarize, confidence},
    traits::TrainerFactory,
};

pub const PSEUDO_LABEL_DIR: &str = "pseudo_labels";

/// Decision threshold used to pick the predicted class before the
/// confidence filter is applied.
const CLASS_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PseudoLabelConfig {
    pub confidence_threshold: f32,
    pub max_iterations:       usize,
    /// Epochs per self-training round; lighter than the final fit.
    pub epochs:               usize,
    pub batch_size:           usize,
}

impl Default for PseudoLabelConfig {
    fn default() -> Self {
        Self { confidence_threshold: 0.9, max_iterations: 7, epochs: 5, batch_size: 16 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    PoolExhausted,
    MaxIterations,
    NoConfidentPredictions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub relevant:     usize,
    pub not_relevant: usize,
}

impl ClassCounts {
    fn add(&mut self, label: bool) {
        if label { self.relevant += 1 } else { self.not_relevant += 1 }
    }

    pub fn total(&self) -> usize {
        self.relevant + self.not_relevant
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationStats {
    pub iteration:  usize,
    pub train_size: usize,
    pub pool_size:  usize,
    pub promoted:   ClassCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PseudoLabelStats {
    pub iterations_run:     usize,
    pub termination:        Termination,
    pub per_iteration:      Vec<IterationStats>,
    pub original_examples:  usize,
    pub pseudo_examples:    usize,
    pub min_confidence:     Option<f32>,
    pub average_confidence: Option<f32>,
    pub max_confidence:     Option<f32>,
    /// Labels over the whole output set, annotated and pseudo.
    pub class_distribution: ClassCounts,
}

impl PseudoLabelStats {
    fn summarise(examples: &[LabeledExample], termination: Termination, per_iteration: Vec<IterationStats>) -> Self {
        let mut class_distribution = ClassCounts::default();
        let mut confidences = Vec::new();
        for ex in examples {
            class_distribution.add(ex.label);
            confidences.extend(ex.confidence());
        }
        let pseudo = confidences.len();
        Self {
            iterations_run: per_iteration.len(),
            termination,
            per_iteration,
            original_examples: examples.len() - pseudo,
            pseudo_examples: pseudo,
            min_confidence: confidences.iter().copied().reduce(f32::min),
            average_confidence: (pseudo > 0).then(|| confidences.iter().sum::<f32>() / pseudo as f32),
            max_confidence: confidences.iter().copied().reduce(f32::max),
            class_distribution,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PseudoLabelOutcome {
    /// Annotated training rows followed by promoted rows in promotion order.
    pub examples:  Vec<LabeledExample>,
    /// Pool entries never promoted.
    pub remaining: Vec<UnlabeledExample>,
    pub stats:     PseudoLabelStats,
}

pub struct PseudoLabeler<'a> {
    factory: &'a dyn TrainerFactory,
    config:  PseudoLabelConfig,
}

impl<'a> PseudoLabeler<'a> {
    pub fn new(factory: &'a dyn TrainerFactory, config: PseudoLabelConfig) -> PipelineResult<Self> {
        let t = config.confidence_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(PipelineError::data(format!("confidence threshold {t} outside (0, 1]")));
        }
        Ok(Self { factory, config })
    }

    pub fn run(
        &self,
        algorithm:  Algorithm,
        train:      &[LabeledExample],
        validation: &[LabeledExample],
        unlabeled:  &[UnlabeledExample],
    ) -> PipelineResult<PseudoLabelOutcome> {
        let cfg = &self.config;
        let mut labeled   = train.to_vec();
        let mut remaining = unlabeled.to_vec();
        let mut per_iteration = Vec::new();
        let (val_texts, val_labels) = texts_and_labels(validation);

        tracing::info!(
            "Pseudo-labeling [{}]: {} labeled, {} unlabeled, confidence >= {}, max {} iterations",
            algorithm, labeled.len(), remaining.len(), cfg.confidence_threshold, cfg.max_iterations
        );

        let termination = loop {
            if remaining.is_empty() {
                break Termination::PoolExhausted;
            }
            if per_iteration.len() >= cfg.max_iterations {
                break Termination::MaxIterations;
            }
            let iteration = per_iteration.len() + 1;

            // ── Step 1: fresh trainer on the current labeled set ──────────────
            let mut trainer = self.factory.create(algorithm)?;
            let (train_texts, train_labels) = texts_and_labels(&labeled);
            trainer.train(&train_texts, &train_labels, &val_texts, &val_labels, cfg.epochs, cfg.batch_size)?;

            // ── Step 2: score the pool ────────────────────────────────────────
            let pool_texts: Vec<String> = remaining.iter().map(|u| u.text.clone()).collect();
            let probabilities = trainer.predict_proba(&pool_texts)?;

            // ── Step 3: filter + promote ──────────────────────────────────────
            let mut promoted = ClassCounts::default();
            let mut kept     = Vec::with_capacity(remaining.len());
            for (item, p) in remaining.drain(..).zip(probabilities) {
                let conf = confidence(p);
                if conf >= cfg.confidence_threshold {
                    let label = binarize(p, CLASS_THRESHOLD);
                    promoted.add(label);
                    labeled.push(LabeledExample {
                        id:         item.id,
                        text:       item.text,
                        label,
                        provenance: Provenance::Pseudo { confidence: conf, source_iteration: iteration },
                    });
                } else {
                    kept.push(item);
                }
            }
            remaining = kept;

            tracing::info!(
                "Iteration {}/{}: promoted {} ({} relevant), {} left in pool",
                iteration, cfg.max_iterations, promoted.total(), promoted.relevant, remaining.len()
            );
            let none_promoted = promoted.total() == 0;
            per_iteration.push(IterationStats {
                iteration,
                train_size: train_texts.len(),
                pool_size:  pool_texts.len(),
                promoted,
            });
            if none_promoted {
                break Termination::NoConfidentPredictions;
            }
        };

        let stats = PseudoLabelStats::summarise(&labeled, termination, per_iteration);
        tracing::info!(
            "Pseudo-labeling finished after {} iterations ({:?}): {} examples, {} pseudo-labeled",
            stats.iterations_run, termination, labeled.len(), stats.pseudo_examples
        );
        Ok(PseudoLabelOutcome { examples: labeled, remaining, stats })
    }
}

// ─── Export / reload ──────────────────────────────────────────────────────────

/// Write `examples` as JSONL to `<dir>/<algo>_<YYYYMMDD_HHMMSS>.jsonl`,
/// adding `_2`, `_3`… when that name is taken.
pub fn export_pseudo_labels(
    dir:       &Path,
    algorithm: Algorithm,
    examples:  &[LabeledExample],
    now:       DateTime<Utc>,
) -> PipelineResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let stem = format!("{}_{}", algorithm, now.format("%Y%m%d_%H%M%S"));

    let mut path   = dir.join(format!("{stem}.jsonl"));
    let mut suffix = 1;
    while path.exists() {
        suffix += 1;
        path = dir.join(format!("{stem}_{suffix}.jsonl"));
    }

    let mut out = BufWriter::new(File::create(&path)?);
    for ex in examples {
        serde_json::to_writer(&mut out, ex)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    tracing::info!("Saved {} pseudo-labeling rows to {}", examples.len(), path.display());
    Ok(path)
}

#[derive(Debug, Clone, Default)]
pub struct PseudoFilter {
    pub min_confidence:   Option<f32>,
    pub max_iteration:    Option<usize>,
    pub include_original: bool,
}

/// Reload an export, keeping annotated rows (if asked) followed by the
/// pseudo rows that pass both filters.
pub fn load_and_filter(path: &Path, filter: &PseudoFilter) -> PipelineResult<Vec<LabeledExample>> {
    let reader = BufReader::new(File::open(path)?);
    let mut original = Vec::new();
    let mut pseudo   = Vec::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let ex: LabeledExample = serde_json::from_str(&line)
            .map_err(|e| PipelineError::data(format!("{}:{}: {}", path.display(), n + 1, e)))?;
        match ex.provenance {
            Provenance::Annotated => {
                if filter.include_original {
                    original.push(ex);
                }
            }
            Provenance::Pseudo { confidence, source_iteration } => {
                let conf_ok = filter.min_confidence.map_or(true, |m| confidence >= m);
                let iter_ok = filter.max_iteration.map_or(true, |m| source_iteration <= m);
                if conf_ok && iter_ok {
                    pseudo.push(ex);
                }
            }
        }
    }
    original.extend(pseudo);
    Ok(original)
}

/// Promoted counts keyed by iteration, for reporting.
pub fn promoted_per_iteration(stats: &PseudoLabelStats) -> BTreeMap<usize, usize> {
    stats.per_iteration.iter().map(|s| (s.iteration, s.promoted.total())).collect()
}
