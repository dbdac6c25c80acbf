// ============================================================
// Layer 2 — PredictUseCase
// ============================================================
// Scores articles with a stored model version:
//
//   Step 1: Resolve + load version    (Layer 6 - infra)
//   Step 2: Collect candidate rows    (Layer 4 - data)
//   Step 3: Skip already-predicted    (Layer 6 - infra)
//   Step 4: Predict with threshold    (Layer 5 - ml)
//   Step 5: Insert, ignoring dupes    (Layer 6 - infra)
//
// Predictions are keyed by (article, subject, algorithm,
// version), so re-running the same version never adds a
// second row for an article. A row that cannot be cleaned or
// scored is counted as a failure and the batch continues.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::application::{
    scope::{resolve_units, WorkUnit},
    train_use_case::validate_threshold,
};
use crate::data::{loader::JsonlArticleSource, preprocessor::Preprocessor};
use crate::domain::{
    algorithm::Algorithm,
    article::ArticleRow,
    error::PipelineError,
    prediction::{PredictionKey, PredictionRecord},
    report::binarize,
    run_log::{RunLogEntry, RunType},
    traits::{ArticleSource, PredictionStore, RunLogStore, RunOutcome, TextClassifier, TrainerFactory},
};
use crate::infra::{
    prediction_store::{JsonlPredictionStore, MemoryPredictionStore},
    registry::{ModelKey, ModelRegistry},
    run_log::{JsonRunLog, MemoryRunLog},
};
use crate::ml::{factory::DefaultTrainerFactory, params::TrainerParams};

#[derive(Debug, Clone)]
pub struct PredictConfig {
    pub data_dir:       PathBuf,
    pub models_dir:     PathBuf,
    pub team:           Option<String>,
    pub subject:        Option<String>,
    pub algorithms:     Vec<Algorithm>,
    /// `None` loads the latest version.
    pub model_version:  Option<String>,
    /// `None` scores every article.
    pub lookback_days:  Option<u32>,
    pub prob_threshold: f32,
    /// Score this JSONL batch instead of the subject's articles.
    pub input:          Option<PathBuf>,
    pub dry_run:        bool,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            data_dir:       PathBuf::from("data"),
            models_dir:     PathBuf::from("models"),
            team:           None,
            subject:        None,
            algorithms:     Algorithm::ALL.to_vec(),
            model_version:  None,
            lookback_days:  Some(90),
            prob_threshold: 0.8,
            input:          None,
            dry_run:        false,
        }
    }
}

/// One line of a `--input` batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputText {
    pub id:   u64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PredictStats {
    pub processed:       usize,
    pub skipped:         usize,
    pub failures:        usize,
    pub new_predictions: usize,
}

#[derive(Debug, Clone)]
pub struct PredictUnitReport {
    pub unit:    WorkUnit,
    pub version: Option<String>,
    pub stats:   PredictStats,
    /// Thresholded results in input order, including dry runs.
    pub records: Vec<PredictionRecord>,
    pub error:   Option<String>,
}

impl PredictUnitReport {
    fn failed(unit: &WorkUnit, error: String) -> Self {
        Self {
            unit:    unit.clone(),
            version: None,
            stats:   PredictStats::default(),
            records: Vec::new(),
            error:   Some(error),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PredictReport {
    pub units: Vec<PredictUnitReport>,
}

impl PredictReport {
    pub fn failures(&self) -> usize {
        self.units.iter().filter(|u| !u.succeeded()).count()
    }

    pub fn totals(&self) -> PredictStats {
        self.units.iter().fold(PredictStats::default(), |acc, u| PredictStats {
            processed:       acc.processed + u.stats.processed,
            skipped:         acc.skipped + u.stats.skipped,
            failures:        acc.failures + u.stats.failures,
            new_predictions: acc.new_predictions + u.stats.new_predictions,
        })
    }
}

// ─── PredictUseCase ───────────────────────────────────────────────────────────
pub struct PredictUseCase {
    config:   PredictConfig,
    source:   Box<dyn ArticleSource>,
    factory:  Box<dyn TrainerFactory>,
    registry: ModelRegistry,
}

impl PredictUseCase {
    pub fn new(config: PredictConfig) -> Self {
        Self {
            source:   Box::new(JsonlArticleSource::new(&config.data_dir)),
            factory:  Box::new(DefaultTrainerFactory::new(TrainerParams::default())),
            registry: ModelRegistry::new(&config.models_dir),
            config,
        }
    }

    #[cfg(test)]
    pub fn with_factory(mut self, factory: Box<dyn TrainerFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn execute(&self) -> Result<PredictReport> {
        let cfg = &self.config;
        validate_threshold(cfg.prob_threshold)?;

        let units = resolve_units(
            self.source.as_ref(),
            cfg.team.as_deref(),
            cfg.subject.as_deref(),
            &cfg.algorithms,
        )?;
        let supplied = cfg.input.as_ref().map(|p| read_input(p)).transpose()?;

        let mut run_log: Box<dyn RunLogStore> = if cfg.dry_run {
            Box::new(MemoryRunLog::new())
        } else {
            Box::new(JsonRunLog::new(&cfg.models_dir))
        };
        self.predict_all(&units, supplied.as_deref(), run_log.as_mut())
    }

    fn predict_all(
        &self,
        units:    &[WorkUnit],
        supplied: Option<&[InputText]>,
        run_log:  &mut dyn RunLogStore,
    ) -> Result<PredictReport> {
        let mut store = JsonlPredictionStore::open(&self.config.models_dir)?;
        // Dry runs insert here instead, so duplicate ids still collapse.
        let mut scratch = self.config.dry_run.then(MemoryPredictionStore::new);

        let mut report = PredictReport::default();
        for unit in units {
            report.units.push(self.run_unit(unit, supplied, &mut store, scratch.as_mut(), run_log));
        }
        Ok(report)
    }

    /// One unit between its run-log start and finish. Any failure,
    /// including the run log itself, ends up in the returned report.
    fn run_unit(
        &self,
        unit:     &WorkUnit,
        supplied: Option<&[InputText]>,
        store:    &mut dyn PredictionStore,
        scratch:  Option<&mut MemoryPredictionStore>,
        run_log:  &mut dyn RunLogStore,
    ) -> PredictUnitReport {
        let entry = RunLogEntry::start(&unit.team, &unit.subject, unit.algorithm, RunType::Predict);
        let id = match run_log.start(entry) {
            Ok(id) => id,
            Err(e) => return PredictUnitReport::failed(unit, format!("cannot write run log: {e}")),
        };

        let report = match self.predict_unit(unit, supplied, store, scratch, Utc::now()) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("{} failed: {:#}", unit, e);
                PredictUnitReport::failed(unit, format!("{e:#}"))
            }
        };

        let outcome = RunOutcome {
            success:       report.succeeded(),
            model_version: report.version.clone(),
            error:         report.error.clone(),
        };
        if let Err(e) = run_log.finish(id, outcome) {
            tracing::warn!("Cannot finish run-log entry {} for {}: {}", id, unit, e);
        }
        report
    }

    fn predict_unit(
        &self,
        unit:     &WorkUnit,
        supplied: Option<&[InputText]>,
        store:    &mut dyn PredictionStore,
        scratch:  Option<&mut MemoryPredictionStore>,
        now:      DateTime<Utc>,
    ) -> Result<PredictUnitReport> {
        let cfg = &self.config;
        let key = ModelKey::new(&unit.team, &unit.subject, unit.algorithm);

        // ── Step 1: Load the model version ────────────────────────────────────
        let mut trainer = self.factory.create(unit.algorithm)?;
        let version = self.registry.load_into(&key, cfg.model_version.as_deref(), trainer.as_mut())?;
        match self.registry.read_metrics(&key, &version) {
            Ok(m) => tracing::debug!(
                "{} v{} trained with val_f1={:?} test_f1={:?}",
                unit, version, m.get_f64("val_f1"), m.get_f64("test_f1")
            ),
            Err(e) => tracing::debug!("{} v{}: no metrics ({})", unit, version, e),
        }

        // ── Step 2: Candidate rows ────────────────────────────────────────────
        let candidates = match supplied {
            Some(batch) => batch.to_vec(),
            None => self.subject_rows(unit, now)?,
        };

        // ── Step 3: Skip rows already predicted for this version ──────────────
        let mut stats   = PredictStats::default();
        let preprocessor = Preprocessor::new();
        let mut pending: Vec<(u64, String)> = Vec::new();
        for item in candidates {
            let pk = PredictionKey {
                article_id:    item.id,
                subject:       unit.subject.clone(),
                algorithm:     unit.algorithm,
                model_version: version.clone(),
            };
            if store.contains(&pk) {
                stats.skipped += 1;
                continue;
            }
            let cleaned = preprocessor.clean_text(&item.text);
            if cleaned.is_empty() {
                tracing::warn!("Article {}: no text left after cleaning", item.id);
                stats.failures += 1;
                continue;
            }
            pending.push((item.id, cleaned));
        }

        // ── Step 4: Predict ───────────────────────────────────────────────────
        let scored = score(trainer.as_ref(), &pending, &mut stats);
        let records: Vec<PredictionRecord> = scored
            .into_iter()
            .map(|(article_id, probability)| PredictionRecord {
                article_id,
                team:          unit.team.clone(),
                subject:       unit.subject.clone(),
                algorithm:     unit.algorithm,
                model_version: version.clone(),
                probability,
                relevant:      binarize(probability, cfg.prob_threshold),
                created_at:    now,
            })
            .collect();
        stats.processed = records.len();

        // ── Step 5: Store ─────────────────────────────────────────────────────
        stats.new_predictions = match scratch {
            Some(sink) => sink.insert_ignore_conflicts(records.clone())?,
            None => store.insert_ignore_conflicts(records.clone())?,
        };

        tracing::info!(
            "{} v{}: processed={} skipped={} failures={} new={}",
            unit, version, stats.processed, stats.skipped, stats.failures, stats.new_predictions
        );
        Ok(PredictUnitReport { unit: unit.clone(), version: Some(version), stats, records, error: None })
    }

    fn subject_rows(&self, unit: &WorkUnit, now: DateTime<Utc>) -> Result<Vec<InputText>> {
        let loaded = self.source.load_rows(&unit.team, &unit.subject)?;
        let cutoff = self.config.lookback_days.map(|d| now - Duration::days(i64::from(d)));
        Ok(loaded
            .rows
            .into_iter()
            .filter(|r| cutoff.map_or(true, |c| r.discovery_date >= c))
            .map(|r: ArticleRow| InputText { id: r.id, text: r.raw_text() })
            .collect())
    }
}

/// Probabilities for `pending`, batch first. If the batch call fails,
/// or returns a different number of probabilities than rows (so they
/// cannot be matched to ids), every row is retried alone and the ones
/// that still fail are counted. Rows are never dropped silently.
fn score(trainer: &dyn TextClassifier, pending: &[(u64, String)], stats: &mut PredictStats) -> Vec<(u64, f32)> {
    if pending.is_empty() {
        return Vec::new();
    }
    let texts: Vec<String> = pending.iter().map(|(_, t)| t.clone()).collect();
    let batch = trainer.predict_proba(&texts).and_then(|probs| {
        if probs.len() == pending.len() {
            Ok(probs)
        } else {
            Err(PipelineError::data(format!("{} probabilities for {} rows", probs.len(), pending.len())))
        }
    });
    match batch {
        Ok(probs) => pending.iter().map(|(id, _)| *id).zip(probs).collect(),
        Err(e) => {
            tracing::warn!("Batch prediction failed ({}), retrying row by row", e);
            let mut out = Vec::with_capacity(pending.len());
            for (id, text) in pending {
                match trainer.predict_proba(std::slice::from_ref(text)) {
                    Ok(p) if p.len() == 1 => out.push((*id, p[0])),
                    Ok(p) => {
                        tracing::warn!("Article {}: {} probabilities for one row", id, p.len());
                        stats.failures += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Article {}: {}", id, e);
                        stats.failures += 1;
                    }
                }
            }
            out
        }
    }
}

fn read_input(path: &Path) -> Result<Vec<InputText>> {
    let file = File::open(path).with_context(|| format!("Cannot open '{}'", path.display()))?;
    let mut out = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item: InputText = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid input row", path.display(), n + 1))?;
        out.push(item);
    }
    Ok(out)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{
        test_support::{gbdt_factory, write_subject, Corpus},
        train_use_case::{TrainConfig, TrainUseCase},
    };
    use crate::domain::error::PipelineResult;
    use crate::infra::prediction_store::PREDICTIONS_FILE;
    use tempfile::TempDir;

    fn trained(tmp: &TempDir, version: &str) {
        write_subject(&tmp.path().join("data"), "team-a", "ms", &Corpus::new(5, 5, 4).rows());
        let cfg = TrainConfig {
            data_dir:      tmp.path().join("data"),
            models_dir:    tmp.path().join("models"),
            algorithms:    vec![Algorithm::GbdtTfidf],
            model_version: Some(version.into()),
            ..TrainConfig::default()
        };
        let report = TrainUseCase::new(cfg).with_factory(gbdt_factory()).execute().unwrap();
        assert!(report.all_succeeded());
    }

    fn config(tmp: &TempDir) -> PredictConfig {
        PredictConfig {
            data_dir:   tmp.path().join("data"),
            models_dir: tmp.path().join("models"),
            algorithms: vec![Algorithm::GbdtTfidf],
            ..PredictConfig::default()
        }
    }

    #[test]
    fn test_second_run_skips_existing_predictions() {
        let tmp = TempDir::new().unwrap();
        trained(&tmp, "v1");

        let first = PredictUseCase::new(config(&tmp)).with_factory(gbdt_factory()).execute().unwrap();
        let stats = first.units[0].stats;
        assert_eq!(first.units[0].version.as_deref(), Some("v1"));
        assert_eq!(stats.processed, 14);
        assert_eq!(stats.new_predictions, 14);

        let second = PredictUseCase::new(config(&tmp)).with_factory(gbdt_factory()).execute().unwrap();
        assert_eq!(second.totals(), PredictStats { processed: 0, skipped: 14, failures: 0, new_predictions: 0 });

        let lines = std::fs::read_to_string(tmp.path().join("models").join(PREDICTIONS_FILE)).unwrap();
        assert_eq!(lines.lines().count(), 14);
    }

    #[test]
    fn test_supplied_batch_and_dry_run() {
        let tmp = TempDir::new().unwrap();
        trained(&tmp, "v1");
        let input = tmp.path().join("texts.jsonl");
        std::fs::write(
            &input,
            "{\"id\":501,\"text\":\"Relapse rate in multiple sclerosis after ocrelizumab\"}\n\
             {\"id\":502,\"text\":\"<p>!!!</p>\"}\n",
        ).unwrap();

        let cfg = PredictConfig { input: Some(input), dry_run: true, ..config(&tmp) };
        let report = PredictUseCase::new(cfg).with_factory(gbdt_factory()).execute().unwrap();
        let unit = &report.units[0];
        assert_eq!(unit.stats, PredictStats { processed: 1, skipped: 0, failures: 1, new_predictions: 1 });
        assert!((0.0..=1.0).contains(&unit.records[0].probability));
        assert!(!tmp.path().join("models").join(PREDICTIONS_FILE).exists());
    }

    #[test]
    fn test_missing_version_fails_unit_only() {
        let tmp = TempDir::new().unwrap();
        trained(&tmp, "v1");
        let cfg = PredictConfig { model_version: Some("v9".into()), ..config(&tmp) };
        let report = PredictUseCase::new(cfg).with_factory(gbdt_factory()).execute().unwrap();
        assert_eq!(report.failures(), 1);
        assert!(report.units[0].error.as_ref().unwrap().contains("v9"));
    }

    /// Fails on any batch larger than one row and on texts mentioning "poison".
    struct Picky;

    impl TextClassifier for Picky {
        fn algorithm(&self) -> Algorithm { Algorithm::GbdtTfidf }
        fn train(&mut self, _: &[String], _: &[bool], _: &[String], _: &[bool], _: usize, _: usize)
            -> PipelineResult<crate::domain::report::TrainingHistory> { unreachable!() }
        fn predict_proba(&self, texts: &[String]) -> PipelineResult<Vec<f32>> {
            if texts.len() > 1 || texts[0].contains("poison") {
                return Err(PipelineError::data("refused"));
            }
            Ok(vec![0.9])
        }
        fn save(&self, _: &Path) -> PipelineResult<Vec<PathBuf>> { Ok(vec![]) }
        fn load(&mut self, _: &Path) -> PipelineResult<()> { Ok(()) }
        fn hyperparameters(&self) -> serde_json::Value { serde_json::json!({}) }
    }

    #[test]
    fn test_row_fallback_counts_failures() {
        let pending = vec![(1, "fine".to_string()), (2, "poison pill".to_string()), (3, "also fine".to_string())];
        let mut stats = PredictStats::default();
        let scored = score(&Picky, &pending, &mut stats);
        assert_eq!(scored, vec![(1, 0.9), (3, 0.9)]);
        assert_eq!(stats.failures, 1);
    }

    /// Answers every batch with one probability too few; single rows work.
    struct Short {
        single: bool,
    }

    impl TextClassifier for Short {
        fn algorithm(&self) -> Algorithm { Algorithm::GbdtTfidf }
        fn train(&mut self, _: &[String], _: &[bool], _: &[String], _: &[bool], _: usize, _: usize)
            -> PipelineResult<crate::domain::report::TrainingHistory> { unreachable!() }
        fn predict_proba(&self, texts: &[String]) -> PipelineResult<Vec<f32>> {
            if texts.len() == 1 && self.single {
                return Ok(vec![0.7]);
            }
            Ok(vec![0.7; texts.len() - 1])
        }
        fn save(&self, _: &Path) -> PipelineResult<Vec<PathBuf>> { Ok(vec![]) }
        fn load(&mut self, _: &Path) -> PipelineResult<()> { Ok(()) }
        fn hyperparameters(&self) -> serde_json::Value { serde_json::json!({}) }
    }

    #[test]
    fn test_short_batch_result_is_not_dropped() {
        let pending = vec![(1, "a".to_string()), (2, "b".to_string()), (3, "c".to_string())];

        let mut stats = PredictStats::default();
        let scored = score(&Short { single: true }, &pending, &mut stats);
        assert_eq!(scored, vec![(1, 0.7), (2, 0.7), (3, 0.7)]);
        assert_eq!(stats.failures, 0);

        let mut stats = PredictStats::default();
        let scored = score(&Short { single: false }, &pending, &mut stats);
        assert!(scored.is_empty());
        assert_eq!(stats.failures, 3);
    }

    /// Refuses the first `start`, then behaves like the in-memory log.
    struct FlakyLog {
        refused: bool,
        inner:   MemoryRunLog,
    }

    impl RunLogStore for FlakyLog {
        fn start(&mut self, entry: RunLogEntry) -> PipelineResult<u64> {
            if !self.refused {
                self.refused = true;
                return Err(PipelineError::RunLog("disk full".into()));
            }
            self.inner.start(entry)
        }
        fn finish(&mut self, id: u64, outcome: RunOutcome) -> PipelineResult<()> {
            self.inner.finish(id, outcome)
        }
        fn entries(&self) -> PipelineResult<Vec<RunLogEntry>> {
            self.inner.entries()
        }
    }

    #[test]
    fn test_run_log_failure_fails_one_unit_only() {
        let tmp = TempDir::new().unwrap();
        write_subject(&tmp.path().join("data"), "team-a", "alz", &Corpus::new(5, 5, 4).rows());
        trained(&tmp, "v1");

        let use_case = PredictUseCase::new(config(&tmp)).with_factory(gbdt_factory());
        let units = resolve_units(use_case.source.as_ref(), None, None, &[Algorithm::GbdtTfidf]).unwrap();
        assert_eq!(units.len(), 2);

        let mut log = FlakyLog { refused: false, inner: MemoryRunLog::new() };
        let report = use_case.predict_all(&units, None, &mut log).unwrap();

        assert_eq!(report.units.len(), 2);
        assert_eq!(report.failures(), 1);
        assert!(report.units[0].error.as_ref().unwrap().contains("run log"));
        assert_eq!(report.units[1].stats.processed, 14);

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].success, Some(true));
    }
}
