// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `predict`, and all
// their configurable flags.
//
// Both share the scope flags (--team, --subject, --algo) and
// the directory flags, which can also come from the
// GREGORY_DATA_DIR / GREGORY_MODELS_DIR environment variables.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::application::{predict_use_case::PredictConfig, train_use_case::TrainConfig};
use crate::domain::algorithm::Algorithm;
use crate::ml::{
    params::TrainerParams,
    pseudo::{PseudoFilter, PseudoLabelConfig},
};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train classifiers for every selected team / subject / algorithm
    Train(TrainArgs),

    /// Score articles with a stored model version
    Predict(PredictArgs),

    /// Summarise a pseudo-label export
    Audit(AuditArgs),
}

/// Which units to run and where the files live.
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    /// Root holding `<team>/<subject>/articles.jsonl`
    #[arg(long, env = "GREGORY_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Root of the model registry, run log and prediction store
    #[arg(long, env = "GREGORY_MODELS_DIR", default_value = "models")]
    pub models_dir: PathBuf,

    /// Team slug; all teams when omitted
    #[arg(long)]
    pub team: Option<String>,

    /// Subject slug; all subjects of the team when omitted
    #[arg(long)]
    pub subject: Option<String>,

    /// Comma separated algorithms: pubmed_bert, lgbm_tfidf, lstm
    #[arg(long, default_value = "pubmed_bert,lgbm_tfidf,lstm")]
    pub algo: String,

    /// Only use articles discovered in the last N days
    #[arg(long, default_value_t = 90, conflicts_with = "all_articles")]
    pub lookback_days: u32,

    /// Ignore the lookback window
    #[arg(long)]
    pub all_articles: bool,

    /// Probability at or above which an article is relevant
    #[arg(long, default_value_t = 0.8)]
    pub prob_threshold: f32,

    /// Run everything but write nothing to disk
    #[arg(long)]
    pub dry_run: bool,
}

impl ScopeArgs {
    fn lookback(&self) -> Option<u32> {
        (!self.all_articles).then_some(self.lookback_days)
    }

    fn algorithms(&self) -> Result<Vec<Algorithm>> {
        Algorithm::parse_list(&self.algo).with_context(|| format!("Invalid --algo '{}'", self.algo))
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Self-train on the unlabeled pool before the final fit
    #[arg(long)]
    pub pseudo_label: bool,

    /// Minimum confidence for promoting a pseudo label
    #[arg(long, default_value_t = 0.9)]
    pub confidence_threshold: f32,

    /// Upper bound on self-training rounds
    #[arg(long, default_value_t = 7)]
    pub max_iterations: usize,

    /// Write into this version directory instead of minting a new one
    #[arg(long)]
    pub model_version: Option<String>,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    /// Classes with fewer annotated rows fail the unit (never below 3)
    #[arg(long, default_value_t = 3)]
    pub min_examples_per_class: usize,

    /// Most unlabeled rows offered to pseudo-labeling
    #[arg(long, default_value_t = 100)]
    pub unlabeled_limit: usize,

    /// Condense summaries before cleaning
    #[arg(long)]
    pub summarise: bool,

    /// Summarise batches on the rayon pool
    #[arg(long, requires = "summarise")]
    pub parallel_summaries: bool,

    /// TOML file overriding any trainer hyperparameters
    #[arg(long)]
    pub hyperparams: Option<PathBuf>,
}

impl TryFrom<TrainArgs> for TrainConfig {
    type Error = anyhow::Error;

    fn try_from(a: TrainArgs) -> Result<Self> {
        let params = match &a.hyperparams {
            Some(path) => load_hyperparams(path)?,
            None => TrainerParams::default(),
        };
        let lookback_days = a.scope.lookback();
        let algorithms    = a.scope.algorithms()?;
        Ok(TrainConfig {
            data_dir:               a.scope.data_dir,
            models_dir:             a.scope.models_dir,
            team:                   a.scope.team,
            subject:                a.scope.subject,
            algorithms,
            lookback_days,
            prob_threshold:         a.scope.prob_threshold,
            pseudo_label:           a.pseudo_label,
            pseudo: PseudoLabelConfig {
                confidence_threshold: a.confidence_threshold,
                max_iterations:       a.max_iterations,
                ..PseudoLabelConfig::default()
            },
            epochs:                 a.epochs,
            batch_size:             a.batch_size,
            model_version:          a.model_version,
            dry_run:                a.scope.dry_run,
            min_examples_per_class: a.min_examples_per_class,
            unlabeled_limit:        a.unlabeled_limit,
            summarise:              a.summarise,
            parallel_summaries:     a.parallel_summaries,
            params,
        })
    }
}

fn load_hyperparams(path: &Path) -> Result<TrainerParams> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read hyperparameters '{}'", path.display()))?;
    TrainerParams::from_toml_str(&text)
        .with_context(|| format!("Invalid hyperparameters in '{}'", path.display()))
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Version to load; the latest when omitted
    #[arg(long)]
    pub model_version: Option<String>,

    /// JSONL of `{"id": .., "text": ..}` to score instead of stored articles
    #[arg(long)]
    pub input: Option<PathBuf>,
}

impl TryFrom<PredictArgs> for PredictConfig {
    type Error = anyhow::Error;

    fn try_from(a: PredictArgs) -> Result<Self> {
        let lookback_days = a.scope.lookback();
        let algorithms    = a.scope.algorithms()?;
        Ok(PredictConfig {
            data_dir:       a.scope.data_dir,
            models_dir:     a.scope.models_dir,
            team:           a.scope.team,
            subject:        a.scope.subject,
            algorithms,
            model_version:  a.model_version,
            lookback_days,
            prob_threshold: a.scope.prob_threshold,
            input:          a.input,
            dry_run:        a.scope.dry_run,
        })
    }
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Export written under `<models_dir>/<team>/<subject>/pseudo_labels/`
    pub file: PathBuf,

    /// Drop pseudo rows promoted with lower confidence
    #[arg(long)]
    pub min_confidence: Option<f32>,

    /// Drop pseudo rows from later self-training rounds
    #[arg(long)]
    pub max_iteration: Option<usize>,

    /// Also count the annotated rows
    #[arg(long)]
    pub include_original: bool,
}

impl From<&AuditArgs> for PseudoFilter {
    fn from(a: &AuditArgs) -> Self {
        PseudoFilter {
            min_confidence:   a.min_confidence,
            max_iteration:    a.max_iteration,
            include_original: a.include_original,
        }
    }
}
