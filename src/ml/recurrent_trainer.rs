// ============================================================
// Layer 5 — Recurrent Trainer (`lstm`)
// ============================================================
// Same flow as the transformer trainer with a shorter sequence
// length and a smaller vocabulary.
//
// How a text reaches the LSTM:
//   1. The WordLevel tokenizer fitted on the training texts maps
//      each word to an id (unknown words share one id)
//   2. Ids are cut to at most `sequence_length`
//   3. The batcher right-pads each batch to its longest row and
//      builds the matching 0/1 attention mask
//
// Step 2 is why the length is part of the model: a model that
// learnt from 100-token rows must not be fed 20-token ones. It
// is saved in lstm_config.json and a reload always uses the saved
// value.
//
// Artifacts: lstm_weights.mpk, lstm_config.json, tokenizer.json

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
    params::RecurrentParams,
    recurrent::{LstmClassifier, LstmClassifierConfig},
    trainer::{
        check_inputs, device, fit, load_weights, predict_probabilities, save_weights,
        seed_backend, FitConfig, InferBackend, TrainBackend,
    },
};

const WEIGHTS_STEM: &str = "lstm_weights";
const CONFIG_FILE:  &str = "lstm_config.json";
const PREDICT_BATCH: usize = 64;

struct Trained {
    model:      LstmClassifier<InferBackend>,
    config:     LstmClassifierConfig,
    tokenizer:  Tokenizer,
}

/// `lstm` trainer. Untrained until `train` or `load` succeeds.
pub struct RecurrentTrainer {
    params: RecurrentParams,
    seed:   u64,
    state:  Option<Trained>,
}

impl RecurrentTrainer {
    pub fn new(params: RecurrentParams, seed: u64) -> Self {
        Self { params, seed, state: None }
    }

    fn trained(&self, op: &'static str) -> PipelineResult<&Trained> {
        self.state.as_ref().ok_or(PipelineError::ModelNotReady(op))
    }
}

impl TextClassifier for RecurrentTrainer {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Recurrent
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

        let tokenizer = TokenizerStore::build(train_texts, p.max_tokens)?;
        let train_ids = encode_texts(&tokenizer, train_texts, p.sequence_length)?;
        let val_ids   = encode_texts(&tokenizer, val_texts, p.sequence_length)?;

        let config = LstmClassifierConfig::new(
            vocab_size(&tokenizer), p.embedding_dim, p.hidden_units, p.dropout,
        )
        .with_sequence_length(p.sequence_length);
        let model: LstmClassifier<TrainBackend> = config.init(&device());
        tracing::info!(
            "LSTM ready: embedding={}, hidden={}, vocab={}",
            p.embedding_dim, p.hidden_units, config.vocab_size
        );

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
        let ids = encode_texts(&t.tokenizer, texts, t.config.sequence_length)?;
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
        if let Some(missing) = self
            .algorithm()
            .artifact_files()
            .iter()
            .map(|name| dir.join(name))
            .find(|path| !path.is_file())
        {
            return Err(PipelineError::model_load(missing));
        }

        let cfg_path = dir.join(CONFIG_FILE);
        let config = LstmClassifierConfig::load(&cfg_path).map_err(|e| {
            tracing::error!("Cannot parse '{}': {:?}", cfg_path.display(), e);
            PipelineError::model_load(&cfg_path)
        })?;
        let tokenizer = TokenizerStore::new(dir).load()?;

        let device = device();
        let model  = load_weights(config.init::<InferBackend>(&device), &dir.join(WEIGHTS_STEM), &device)?;

        // Truncation comes from the saved config, not self.params.
        self.state = Some(Trained { model, config, tokenizer });
        Ok(())
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::json!({ "seed": self.seed, "recurrent": self.params })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tiny() -> RecurrentTrainer {
        with_length(12)
    }

    fn with_length(sequence_length: usize) -> RecurrentTrainer {
        let params = RecurrentParams {
            sequence_length, embedding_dim: 8, hidden_units: 6, dropout: 0.0,
            ..RecurrentParams::default()
        };
        RecurrentTrainer::new(params, 69)
    }

    fn data() -> (Vec<String>, Vec<bool>) {
        let texts = vec![
            "natalizumab lesion activity sclerosis cohort".to_string(),
            "sclerosis progression biomarker neurofilament".to_string(),
            "annual staff picnic schedule".to_string(),
            "new parking permits available".to_string(),
        ];
        (texts, vec![true, true, false, false])
    }

    #[test]
    fn test_history_has_one_record_per_epoch_or_fewer() {
        let (texts, labels) = data();
        let mut t = tiny();
        let history = t.train(&texts, &labels, &texts, &labels, 3, 2).unwrap();
        assert!(!history.epochs.is_empty() && history.epochs.len() <= 3);
        assert!(history.best_epoch >= 1);
    }

    #[test]
    fn test_probabilities_in_unit_interval_after_reload() {
        let (texts, labels) = data();
        let mut t = tiny();
        t.train(&texts, &labels, &texts, &labels, 1, 4).unwrap();

        let tmp = TempDir::new().unwrap();
        let files = t.save(tmp.path()).unwrap();
        assert_eq!(files.len(), 3);

        let mut loaded = tiny();
        loaded.load(tmp.path()).unwrap();
        let before = t.predict_proba(&texts).unwrap();
        let after  = loaded.predict_proba(&texts).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((0.0..=1.0).contains(a));
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_length_mismatch_is_data_error() {
        let (texts, _) = data();
        let err = tiny().train(&texts, &[true], &texts, &[true, false, true, false], 1, 2).unwrap_err();
        assert!(matches!(err, PipelineError::Data(_)));
    }

    #[test]
    fn test_reload_keeps_trained_sequence_length() {
        let (texts, labels) = data();
        let mut t = tiny();
        t.train(&texts, &labels, &texts, &labels, 2, 2).unwrap();

        let tmp = TempDir::new().unwrap();
        t.save(tmp.path()).unwrap();

        // A loader configured for much shorter inputs must still cut at 12.
        let mut loaded = with_length(2);
        loaded.load(tmp.path()).unwrap();
        assert_eq!(loaded.trained("check").unwrap().config.sequence_length, 12);

        let before = t.predict_proba(&texts).unwrap();
        let after  = loaded.predict_proba(&texts).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_blank_training_text_is_data_error() {
        let (mut texts, labels) = data();
        texts[2] = "   ".into();
        let err = tiny().train(&texts, &labels, &texts, &labels, 1, 2).unwrap_err();
        assert!(matches!(err, PipelineError::Data(_)));
    }
}
