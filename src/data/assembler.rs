// ============================================================
// Layer 4 — Dataset Assembler
// ============================================================
// Raw rows for one team+subject in, a stratified DatasetSplit
// plus the unlabeled pool out.
//
//   Step 1: lookback window on discovery_date
//   Step 2: optional summarisation of the summary field
//   Step 3: clean + 10-word quality gate
//   Step 4: class-count checks (fail fast, with the counts)
//   Step 5: stratified split
//
// Each stage takes an owned collection and returns a new one;
// nothing is mutated in place across stages.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::data::{
    preprocessor::Preprocessor,
    splitter::{stratified_split, SplitConfig, MIN_SPLITTABLE_CLASS},
    summariser::summarise_bulk,
};
use crate::domain::{
    article::{ArticleRow, DatasetSplit, LabeledExample, UnlabeledExample},
    error::{PipelineError, PipelineResult},
    traits::{LoadedRows, Summariser},
};

#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    /// `None` means every row regardless of age.
    pub lookback_days:          Option<u32>,
    pub min_examples_per_class: usize,
    pub unlabeled_limit:        usize,
    pub split:                  SplitConfig,
    pub parallel_summaries:     bool,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            lookback_days:          Some(90),
            min_examples_per_class: 3,
            unlabeled_limit:        100,
            split:                  SplitConfig::default(),
            parallel_summaries:     false,
        }
    }
}

/// Counts gathered while assembling, reported even on dry runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssemblyReport {
    pub total_rows:     usize,
    pub malformed:      usize,
    pub outside_window: usize,
    pub duplicates:     usize,
    pub empty:          usize,
    pub too_short:      usize,
    pub labeled:        usize,
    pub unlabeled:      usize,
    pub negatives:      usize,
    pub positives:      usize,
    pub train:          usize,
    pub validation:     usize,
    pub test:           usize,
}

#[derive(Debug, Clone)]
pub struct AssembledDataset {
    pub split:     DatasetSplit,
    pub unlabeled: Vec<UnlabeledExample>,
    pub report:    AssemblyReport,
}

pub struct DatasetAssembler {
    config:       AssemblyConfig,
    preprocessor: Preprocessor,
    summariser:   Option<Arc<dyn Summariser>>,
}

impl DatasetAssembler {
    pub fn new(config: AssemblyConfig) -> Self {
        Self { config, preprocessor: Preprocessor::new(), summariser: None }
    }

    pub fn with_summariser(mut self, summariser: Arc<dyn Summariser>) -> Self {
        self.summariser = Some(summariser);
        self
    }

    pub fn assemble(&self, loaded: LoadedRows, now: DateTime<Utc>) -> PipelineResult<AssembledDataset> {
        let mut report = AssemblyReport {
            total_rows: loaded.rows.len(),
            malformed:  loaded.malformed,
            ..AssemblyReport::default()
        };

        // ── Step 1: lookback window + duplicate ids ──────────────────────────
        let rows = self.within_window(loaded.rows, now, &mut report);

        // ── Step 2: texts (optionally summarised) ────────────────────────────
        let texts = self.row_texts(&rows);

        // ── Step 3: clean + quality gate ─────────────────────────────────────
        let mut labeled   = Vec::new();
        let mut unlabeled = Vec::new();
        for (row, raw) in rows.iter().zip(texts) {
            let cleaned = self.preprocessor.clean_text(&raw);
            if cleaned.is_empty() {
                report.empty += 1;
                continue;
            }
            if !self.preprocessor.passes_quality_gate(&cleaned) {
                report.too_short += 1;
                continue;
            }
            match row.label {
                Some(label) => labeled.push(LabeledExample::annotated(row.id, cleaned, label)),
                None => unlabeled.push((row.discovery_date, UnlabeledExample { id: row.id, text: cleaned })),
            }
        }

        // Newest first, capped.
        unlabeled.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.id.cmp(&b.1.id)));
        let unlabeled: Vec<UnlabeledExample> = unlabeled
            .into_iter()
            .take(self.config.unlabeled_limit)
            .map(|(_, u)| u)
            .collect();

        report.labeled   = labeled.len();
        report.unlabeled = unlabeled.len();
        report.positives = labeled.iter().filter(|e| e.label).count();
        report.negatives = labeled.len() - report.positives;

        // ── Step 4: class counts ─────────────────────────────────────────────
        check_class_counts(report.negatives, report.positives, self.config.min_examples_per_class)?;

        // ── Step 5: stratified split ─────────────────────────────────────────
        let split = stratified_split(labeled, &self.config.split)?;
        (report.train, report.validation, report.test) = split.sizes();

        tracing::info!(
            "Assembled {} labeled ({} pos / {} neg), {} unlabeled; skipped {} empty, {} short, {} outside window",
            report.labeled, report.positives, report.negatives, report.unlabeled,
            report.empty, report.too_short, report.outside_window,
        );

        Ok(AssembledDataset { split, unlabeled, report })
    }

    fn within_window(&self, rows: Vec<ArticleRow>, now: DateTime<Utc>, report: &mut AssemblyReport) -> Vec<ArticleRow> {
        let cutoff = self.config.lookback_days.map(|d| now - Duration::days(i64::from(d)));
        let mut seen = HashSet::new();
        rows.into_iter()
            .filter(|row| {
                if cutoff.is_some_and(|c| row.discovery_date < c) {
                    report.outside_window += 1;
                    return false;
                }
                if !seen.insert(row.id) {
                    report.duplicates += 1;
                    return false;
                }
                true
            })
            .collect()
    }

    fn row_texts(&self, rows: &[ArticleRow]) -> Vec<String> {
        let Some(summariser) = &self.summariser else {
            return rows.iter().map(ArticleRow::raw_text).collect();
        };

        let summaries: Vec<String> = rows
            .iter()
            .map(|r| self.preprocessor.clean_html(r.summary.as_deref().unwrap_or("")))
            .collect();
        let condensed = summarise_bulk(summariser.as_ref(), &summaries, self.config.parallel_summaries);

        rows.iter()
            .zip(condensed)
            .map(|(r, s)| if s.is_empty() { r.title.clone() } else { format!("{} {}", r.title, s) })
            .collect()
    }
}

/// Fail with both counts in the message when a class is too small to
/// stratify or below the caller's minimum.
///
/// The effective minimum is `max(min_examples_per_class, 3)`: the
/// splitter puts at least one row of each class in train, validation
/// and test, so a class of 2 can never be split. Asking for
/// `min_examples_per_class = 2` therefore still needs 3 of each, and
/// this check says so up front instead of letting the split fail later.
pub fn check_class_counts(negatives: usize, positives: usize, min_examples_per_class: usize) -> PipelineResult<()> {
    let smallest = negatives.min(positives);
    if smallest < 2 {
        return Err(PipelineError::data(format!(
            "cannot stratify: class counts are {negatives} negative / {positives} positive (need at least 2 of each)"
        )));
    }
    let required = min_examples_per_class.max(MIN_SPLITTABLE_CLASS);
    if smallest < required {
        return Err(PipelineError::data(format!(
            "not enough examples per class: {negatives} negative / {positives} positive (need at least {required} of each)"
        )));
    }
    Ok(())
}
