// ============================================================
// Layer 3 — Pipeline Error Taxonomy
// ============================================================
// Every failure a trainer, the registry or the data layer can
// raise. Orchestration wraps these in anyhow with context, so
// the variants only need to say what went wrong, not where.
//
//   Data            malformed, empty or insufficient rows
//   ModelNotReady   predict/evaluate/save before train/load
//   ModelLoad       missing or partial artifact directory
//   VersionNotFound explicit version absent on disk
//   NoVersions      nothing trained yet under a base path

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("data error: {0}")]
    Data(String),

    #[error("model not ready: call train() or load() before {0}()")]
    ModelNotReady(&'static str),

    #[error("cannot load model: missing or unreadable artifact '{}'", path.display())]
    ModelLoad { path: PathBuf },

    #[error("model version '{version}' not found under '{}'", base.display())]
    VersionNotFound { version: String, base: PathBuf },

    #[error("no trained versions found under '{}'", base.display())]
    NoVersions { base: PathBuf },

    #[error("unsupported algorithm '{0}' (expected one of: pubmed_bert, lgbm_tfidf, lstm)")]
    UnsupportedAlgorithm(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("tensor backend error: {0}")]
    Backend(String),

    #[error("run log error: {0}")]
    RunLog(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn model_load(path: impl Into<PathBuf>) -> Self {
        Self::ModelLoad { path: path.into() }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
