// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Runs one training job per (team, subject, algorithm) unit:
//
//   Step 1: Load rows                 (Layer 4 - data)
//   Step 2: Assemble + split          (Layer 4 - data)
//   Step 3: Pseudo-label (optional)   (Layer 5 - ml)
//   Step 4: Resolve target version    (Layer 6 - infra)
//   Step 5: Train a fresh classifier  (Layer 5 - ml)
//   Step 6: Evaluate val then test    (Layer 5 - ml)
//   Step 7: Persist artifacts         (Layer 6 - infra)
//
// Each unit is wrapped in a run-log entry. A failing unit is
// recorded and the batch moves on to the next one.
//
// Dry run executes every step but writes nothing: the run log
// is kept in memory, pseudo labels are not exported and the
// version that would have been created is only reported.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use crate::application::scope::{resolve_units, WorkUnit};
use crate::data::{
    assembler::{AssemblyConfig, AssemblyReport, DatasetAssembler},
    loader::JsonlArticleSource,
    splitter::SplitConfig,
    summariser::shared_summariser,
};
use crate::domain::{
    algorithm::Algorithm,
    article::texts_and_labels,
    run_log::{RunLogEntry, RunType},
    traits::{ArticleSource, RunLogStore, RunOutcome, TrainerFactory},
};
use crate::infra::{
    metrics::MetricsRecord,
    registry::{ModelKey, ModelRegistry},
    run_log::{JsonRunLog, MemoryRunLog},
};
use crate::ml::{
    factory::DefaultTrainerFactory,
    params::TrainerParams,
    pseudo::{export_pseudo_labels, promoted_per_iteration, PseudoLabelConfig, PseudoLabelStats, PseudoLabeler, PSEUDO_LABEL_DIR},
};

// ─── Training Configuration ──────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub data_dir:               PathBuf,
    pub models_dir:             PathBuf,
    pub team:                   Option<String>,
    pub subject:                Option<String>,
    pub algorithms:             Vec<Algorithm>,
    /// `None` trains on every row regardless of age.
    pub lookback_days:          Option<u32>,
    pub prob_threshold:         f32,
    pub pseudo_label:           bool,
    pub pseudo:                 PseudoLabelConfig,
    pub epochs:                 usize,
    pub batch_size:             usize,
    pub model_version:          Option<String>,
    pub dry_run:                bool,
    pub min_examples_per_class: usize,
    pub unlabeled_limit:        usize,
    pub summarise:              bool,
    pub parallel_summaries:     bool,
    pub params:                 TrainerParams,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir:               PathBuf::from("data"),
            models_dir:             PathBuf::from("models"),
            team:                   None,
            subject:                None,
            algorithms:             Algorithm::ALL.to_vec(),
            lookback_days:          Some(90),
            prob_threshold:         0.8,
            pseudo_label:           false,
            pseudo:                 PseudoLabelConfig::default(),
            epochs:                 10,
            batch_size:             16,
            model_version:          None,
            dry_run:                false,
            min_examples_per_class: 3,
            unlabeled_limit:        100,
            summarise:              false,
            parallel_summaries:     false,
            params:                 TrainerParams::default(),
        }
    }
}

/// The decision threshold must lie strictly between 0 and 1.
pub fn validate_threshold(threshold: f32) -> Result<()> {
    if !(threshold > 0.0 && threshold < 1.0) {
        bail!("probability threshold must be in (0, 1), got {threshold}");
    }
    Ok(())
}

// ─── Reports ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit:    WorkUnit,
    /// Saved version, or the one a dry run would have created.
    pub version: Option<String>,
    pub dataset: Option<AssemblyReport>,
    pub pseudo:  Option<PseudoLabelStats>,
    pub metrics: MetricsRecord,
    pub error:   Option<String>,
}

impl UnitReport {
    fn failed(unit: &WorkUnit, error: String) -> Self {
        Self {
            unit: unit.clone(),
            version: None,
            dataset: None,
            pseudo: None,
            metrics: MetricsRecord::new(),
            error: Some(error),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub units: Vec<UnitReport>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.units.iter().filter(|u| !u.succeeded()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures() == 0
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config:   TrainConfig,
    source:   Box<dyn ArticleSource>,
    factory:  Box<dyn TrainerFactory>,
    registry: ModelRegistry,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self {
            source:   Box::new(JsonlArticleSource::new(&config.data_dir)),
            factory:  Box::new(DefaultTrainerFactory::new(config.params.clone())),
            registry: ModelRegistry::new(&config.models_dir),
            config,
        }
    }

    #[cfg(test)]
    pub fn with_factory(mut self, factory: Box<dyn TrainerFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Run every unit in scope. Per-unit failures are reported, not returned.
    pub fn execute(&self) -> Result<BatchReport> {
        let cfg = &self.config;
        validate_threshold(cfg.prob_threshold)?;

        let units = resolve_units(
            self.source.as_ref(),
            cfg.team.as_deref(),
            cfg.subject.as_deref(),
            &cfg.algorithms,
        )?;
        tracing::info!("Training {} unit(s){}", units.len(), if cfg.dry_run { " (dry run)" } else { "" });

        let mut run_log: Box<dyn RunLogStore> = if cfg.dry_run {
            Box::new(MemoryRunLog::new())
        } else {
            Box::new(JsonRunLog::new(&cfg.models_dir))
        };

        let mut report = BatchReport::default();
        for unit in &units {
            report.units.push(self.run_unit(unit, run_log.as_mut()));
        }
        Ok(report)
    }

    fn run_unit(&self, unit: &WorkUnit, run_log: &mut dyn RunLogStore) -> UnitReport {
        let entry = RunLogEntry::start(&unit.team, &unit.subject, unit.algorithm, RunType::Train);
        let id = match run_log.start(entry) {
            Ok(id) => id,
            Err(e) => return UnitReport::failed(unit, format!("cannot write run log: {e}")),
        };

        tracing::info!("── {} ──", unit);
        let report = match self.train_unit(unit, Utc::now()) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("{} failed: {:#}", unit, e);
                UnitReport::failed(unit, format!("{e:#}"))
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

    fn train_unit(&self, unit: &WorkUnit, now: DateTime<Utc>) -> Result<UnitReport> {
        let cfg = &self.config;
        let key = ModelKey::new(&unit.team, &unit.subject, unit.algorithm);

        // ── Step 1: Load rows ─────────────────────────────────────────────────
        let loaded = self.source.load_rows(&unit.team, &unit.subject)?;

        // ── Step 2: Assemble, clean and split ─────────────────────────────────
        let mut assembler = DatasetAssembler::new(AssemblyConfig {
            lookback_days:          cfg.lookback_days,
            min_examples_per_class: cfg.min_examples_per_class,
            unlabeled_limit:        cfg.unlabeled_limit,
            split:                  SplitConfig { seed: cfg.params.seed, ..SplitConfig::default() },
            parallel_summaries:     cfg.parallel_summaries,
        });
        if cfg.summarise {
            assembler = assembler.with_summariser(shared_summariser());
        }
        let dataset = assembler.assemble(loaded, now).context("assembling dataset")?;
        let split   = dataset.split;

        // ── Step 3: Pseudo-label the unlabeled pool ───────────────────────────
        let (train_examples, pseudo_stats) = if cfg.pseudo_label {
            let labeler = PseudoLabeler::new(self.factory.as_ref(), cfg.pseudo.clone())?;
            let outcome = labeler
                .run(unit.algorithm, &split.train, &split.validation, &dataset.unlabeled)
                .context("pseudo-labeling")?;
            if !cfg.dry_run && outcome.stats.pseudo_examples > 0 {
                let dir = cfg.models_dir.join(&unit.team).join(&unit.subject).join(PSEUDO_LABEL_DIR);
                export_pseudo_labels(&dir, unit.algorithm, &outcome.examples, now)?;
            }
            (outcome.examples, Some(outcome.stats))
        } else {
            (split.train.clone(), None)
        };

        // ── Step 4: Target version ────────────────────────────────────────────
        let planned = self.registry.plan_version(&key, cfg.model_version.as_deref(), now.date_naive())?;

        // ── Step 5: Train ─────────────────────────────────────────────────────
        let (train_texts, train_labels) = texts_and_labels(&train_examples);
        let (val_texts, val_labels)     = texts_and_labels(&split.validation);
        let (test_texts, test_labels)   = texts_and_labels(&split.test);

        let mut trainer = self.factory.create(unit.algorithm)?;
        let history = trainer
            .train(&train_texts, &train_labels, &val_texts, &val_labels, cfg.epochs, cfg.batch_size)
            .context("training")?;

        // ── Step 6: Evaluate ──────────────────────────────────────────────────
        let val_report  = trainer.evaluate(&val_texts, &val_labels, cfg.prob_threshold)?;
        let test_report = trainer.evaluate(&test_texts, &test_labels, cfg.prob_threshold)?;
        tracing::info!(
            "{}: val_acc={:.3} test_acc={:.3} val_f1={:.3} test_f1={:.3}",
            unit, val_report.accuracy, test_report.accuracy, val_report.f1, test_report.f1
        );

        let mut metrics = MetricsRecord::new();
        metrics.insert_report("val", &val_report);
        metrics.insert_report("test", &test_report);
        metrics.insert_history(&history);
        metrics.insert("train_size", train_texts.len().into());
        metrics.insert("validation_size", val_texts.len().into());
        metrics.insert("test_size", test_texts.len().into());
        if let Some(stats) = &pseudo_stats {
            metrics.insert("pseudo_examples", stats.pseudo_examples.into());
            metrics.insert("pseudo_iterations", stats.iterations_run.into());
            let promoted: Vec<usize> = promoted_per_iteration(stats).into_values().collect();
            metrics.insert("pseudo_promoted_per_iteration", promoted.into());
        }

        // ── Step 7: Persist ───────────────────────────────────────────────────
        let version = if cfg.dry_run {
            tracing::info!("Dry run: would save {} as version {}", unit, planned);
            planned
        } else {
            self.registry
                .save(&key, cfg.model_version.as_deref(), trainer.as_ref(), &metrics, now.date_naive())?
                .version
        };

        Ok(UnitReport {
            unit:    unit.clone(),
            version: Some(version),
            dataset: Some(dataset.report),
            pseudo:  pseudo_stats,
            metrics,
            error:   None,
        })
    }
}
