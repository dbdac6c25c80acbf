// ============================================================
// Layer 5 — Transformer Trainer (`pubmed_bert`)
// ============================================================
// Word-level tokenizer built from the training texts, then a
// small encoder classifier trained with the shared fit loop.
//
// Artifacts written by save():
//   transformer_weights.mpk   full-precision weights
//   transformer_config.json   architecture (burn Config)
//   tokenizer.json            vocabulary

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::config::Config;
use tokenizers::Tokenizer;

use crate::data::dataset::TextDataset;
use crate::domain::{
    algorithm::Algorithm,
    error::{PipelineError, PipelineResult},
    report::TrainingHistory,
    traits::TextClassifier,
};
use crate::infra::tokenizer_store::{encode_texts, vocab_size, TokenizerStore};
use crate::ml::{
    model::{TransformerClassifier, TransformerClassifierConfig},
    params::TransformerParams,
    trainer::{
        check_inputs, device, fit, load_weights, predict_probabilities, save_weights,
        seed_backend, FitConfig, InferBackend, TrainBackend,
    },
};

const WEIGHTS_STEM: &str = "transformer_weights";
const CONFIG_FILE:  &str = "transformer_config.json";
const PREDICT_BATCH: usize = 32;

struct Trained {
    model:     TransformerClassifier<InferBackend>,
    config:    TransformerClassifierConfig,
    tokenizer: Tokenizer,
}

pub struct TransformerTrainer {
    params: TransformerParams,
    seed:   u64,
    state:  Option<Trained>,
}

impl TransformerTrainer {
    pub fn new(params: TransformerParams, seed: u64) -> Self {
        Self { params, seed, state: None }
    }

    fn trained(&self, op: &'static str) -> PipelineResult<&Trained> {
        self.state.as_ref().ok_or(PipelineError::ModelNotReady(op))
    }
}

impl TextClassifier for TransformerTrainer {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Transformer
    }

    fn train(
        &mut self,
        train_texts:  &[String],
        train_labels: &[bool],
        val_texts:    &[String],
        val_labels:   &[bool],
        epochs:       usize,
        batch_size:   usize,
    ) -> PipelineResult<TrainingHistory> {
        check_inputs(train_texts, train_labels, val_texts, val_labels)?;
        let p = &self.params;
        seed_backend(self.seed);

        // ── Step 1: tokenizer + encoding ──────────────────────────────────────
        let tokenizer = TokenizerStore::build(train_texts, p.max_tokens)?;
        let train_ids = encode_texts(&tokenizer, train_texts, p.max_len)?;
        let val_ids   = encode_texts(&tokenizer, val_texts, p.max_len)?;

        // ── Step 2: model ─────────────────────────────────────────────────────
        let config = TransformerClassifierConfig::new(
            vocab_size(&tokenizer), p.max_len, p.d_model,
            p.num_heads, p.num_layers, p.d_ff, p.dense_units, p.dropout,
        );
        let model: TransformerClassifier<TrainBackend> = config.init(&device());
        tracing::info!(
            "Transformer ready: {} layers, d_model={}, vocab={}",
            p.num_layers, p.d_model, config.vocab_size
        );

        // ── Step 3: fit ───────────────────────────────────────────────────────
        let fit_cfg = FitConfig {
            epochs,
            batch_size,
            learning_rate: p.learning_rate,
            patience:      p.patience,
            seed:          self.seed,
        };
        let (model, history) = fit(
            model,
            TextDataset::from_encoded(train_ids, train_labels),
            TextDataset::from_encoded(val_ids, val_labels),
            &fit_cfg,
        )?;

        self.state = Some(Trained { model, config, tokenizer });
        Ok(history)
    }

    fn predict_proba(&self, texts: &[String]) -> PipelineResult<Vec<f32>> {
        let t   = self.trained("predict")?;
        let ids = encode_texts(&t.tokenizer, texts, t.config.max_seq_len)?;
        predict_probabilities(&t.model, &ids, PREDICT_BATCH)
    }

    fn save(&self, dir: &Path) -> PipelineResult<Vec<PathBuf>> {
        let t = self.trained("save")?;
        fs::create_dir_all(dir)?;

        let weights  = save_weights::<InferBackend, _>(&t.model, &dir.join(WEIGHTS_STEM))?;
        let cfg_path = dir.join(CONFIG_FILE);
        t.config.save(&cfg_path)?;
        let tok_path = TokenizerStore::new(dir).save(&t.tokenizer)?;

        Ok(vec![weights, cfg_path, tok_path])
    }

    fn load(&mut self, dir: &Path) -> PipelineResult<()> {
        for name in self.algorithm().artifact_files() {
            let path = dir.join(name);
            if !path.is_file() {
                return Err(PipelineError::model_load(path));
            }
        }

        let cfg_path = dir.join(CONFIG_FILE);
        let config = TransformerClassifierConfig::load(&cfg_path).map_err(|e| {
            tracing::error!("Cannot parse '{}': {:?}", cfg_path.display(), e);
            PipelineError::model_load(&cfg_path)
        })?;
        let tokenizer = TokenizerStore::new(dir).load()?;

        let device = device();
        let model  = load_weights(config.init::<InferBackend>(&device), &dir.join(WEIGHTS_STEM), &device)?;

        self.state = Some(Trained { model, config, tokenizer });
        Ok(())
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::json!({ "seed": self.seed, "transformer": self.params })
    }
}
