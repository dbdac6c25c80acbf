// ============================================================
// Layer 5 — Trainer Hyperparameters
// ============================================================
// Defaults for every algorithm family. Any subset can be
// overridden from a TOML file, e.g.
//
//   seed = 7
//   [recurrent]
//   hidden_units = 32
//   [gbdt]
//   num_rounds = 200
//
// The values actually used are written next to each trained
// model as hyperparameters.json.

use serde::{Deserialize, Serialize};

use crate::data::splitter::DEFAULT_SEED;
use crate::infra::metrics::EARLY_STOPPING_PATIENCE;
use crate::ml::{gbdt::GbdtParams, tfidf::TfidfParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerParams {
    /// Tokens kept per text at training time. A reloaded model uses
    /// the length stored in its transformer_config.json instead.
    pub max_len:       usize,
    /// Vocabulary cap, including the special tokens.
    pub max_tokens:    usize,
    pub d_model:       usize,
    pub num_heads:     usize,
    pub num_layers:    usize,
    pub d_ff:          usize,
    pub dense_units:   usize,
    pub dropout:       f64,
    pub learning_rate: f64,
    pub patience:      usize,
}

impl Default for TransformerParams {
    fn default() -> Self {
        Self {
            max_len:       400,
            max_tokens:    30_000,
            d_model:       64,
            num_heads:     2,
            num_layers:    2,
            d_ff:          128,
            dense_units:   48,
            dropout:       0.1,
            learning_rate: 2e-4,
            patience:      EARLY_STOPPING_PATIENCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecurrentParams {
    pub max_tokens:      usize,
    /// Truncation length at training time; saved with the model.
    pub sequence_length: usize,
    pub embedding_dim:   usize,
    pub hidden_units:    usize,
    /// Applied to the embeddings and again to the pooled output.
    pub dropout:         f64,
    pub learning_rate:   f64,
    pub patience:        usize,
}

impl Default for RecurrentParams {
    fn default() -> Self {
        Self {
            max_tokens:      10_000,
            sequence_length: 100,
            embedding_dim:   128,
            hidden_units:    64,
            dropout:         0.3,
            learning_rate:   1e-3,
            patience:        EARLY_STOPPING_PATIENCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerParams {
    pub seed:        u64,
    pub transformer: TransformerParams,
    pub recurrent:   RecurrentParams,
    pub tfidf:       TfidfParams,
    pub gbdt:        GbdtParams,
}

impl Default for TrainerParams {
    fn default() -> Self {
        Self {
            seed:        DEFAULT_SEED,
            transformer: TransformerParams::default(),
            recurrent:   RecurrentParams::default(),
            tfidf:       TfidfParams::default(),
            gbdt:        GbdtParams::default(),
        }
    }
}

impl TrainerParams {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_overrides_only_given_keys() {
        let p = TrainerParams::from_toml_str(
            "seed = 7\n[recurrent]\nhidden_units = 32\n[gbdt]\nnum_rounds = 200\n",
        ).unwrap();
        assert_eq!(p.seed, 7);
        assert_eq!(p.recurrent.hidden_units, 32);
        assert_eq!(p.recurrent.sequence_length, 100);
        assert_eq!(p.gbdt.num_rounds, 200);
        assert_eq!(p.transformer, TransformerParams::default());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(TrainerParams::from_toml_str("").unwrap(), TrainerParams::default());
    }
}
