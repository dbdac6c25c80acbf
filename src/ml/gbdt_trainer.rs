// ============================================================
// Layer 5 — GBDT Trainer (`lgbm_tfidf`)
// ============================================================
// TF-IDF features fitted on the training texts, then boosted
// trees with early stopping on the validation set.
//
// `epochs` and `batch_size` do not apply; the round budget
// comes from GbdtParams. Each boosting round is reported as
// one entry of the training history.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use crate::domain::{
    algorithm::Algorithm,
    error::{PipelineError, PipelineResult},
    report::{EpochRecord, TrainingHistory},
    traits::TextClassifier,
};
use crate::ml::{
    gbdt::{Booster, GbdtParams},
    tfidf::{TfidfParams, TfidfVectorizer},
    trainer::{check_inputs, check_texts},
};

struct Trained {
    vectorizer: TfidfVectorizer,
    booster:    Booster,
}

/// `lgbm_tfidf` trainer.
///
/// Blank texts are rejected on both train and predict. A blank row
/// would vectorise to all zeros and every tree would route it down
/// its default branches, giving a confident-looking base-rate score
/// for an article that was never read.
pub struct GbdtTrainer {
    tfidf: TfidfParams,
    gbdt:  GbdtParams,
    seed:  u64,
    state: Option<Trained>,
}

impl GbdtTrainer {
    pub fn new(tfidf: TfidfParams, gbdt: GbdtParams, seed: u64) -> Self {
        Self { tfidf, gbdt, seed, state: None }
    }
}

impl TextClassifier for GbdtTrainer {
    fn algorithm(&self) -> Algorithm {
        Algorithm::GbdtTfidf
    }

    fn train(
        &mut self,
        train_texts:  &[String],
        train_labels: &[bool],
        val_texts:    &[String],
        val_labels:   &[bool],
        _epochs:      usize,
        _batch_size:  usize,
    ) -> PipelineResult<TrainingHistory> {
        check_inputs(train_texts, train_labels, val_texts, val_labels)?;
        let started = Instant::now();

        let vectorizer = TfidfVectorizer::fit(train_texts, &self.tfidf)?;
        let x_train    = vectorizer.transform(train_texts);
        let x_val      = vectorizer.transform(val_texts);
        tracing::info!(
            "GBDT: {} TF-IDF features, {} train rows, {} validation rows",
            vectorizer.num_features(), x_train.rows(), x_val.rows()
        );

        let (booster, rounds) = Booster::train(&x_train, train_labels, &x_val, val_labels, &self.gbdt, self.seed)?;

        let history = TrainingHistory {
            epochs: rounds
                .iter()
                .map(|r| EpochRecord {
                    epoch:        r.round,
                    train_loss:   r.train_loss,
                    val_loss:     r.val_loss,
                    val_accuracy: r.val_accuracy,
                })
                .collect(),
            best_epoch:       booster.best_iteration,
            stopped_early:    rounds.len() < self.gbdt.num_rounds,
            training_seconds: started.elapsed().as_secs_f64(),
        };

        self.state = Some(Trained { vectorizer, booster });
        Ok(history)
    }

    fn predict_proba(&self, texts: &[String]) -> PipelineResult<Vec<f32>> {
        let t = self.state.as_ref().ok_or(PipelineError::ModelNotReady("predict"))?;
        check_texts(texts)?;
        t.booster.predict_proba(&t.vectorizer.transform(texts))
    }

    fn save(&self, dir: &Path) -> PipelineResult<Vec<PathBuf>> {
        let t = self.state.as_ref().ok_or(PipelineError::ModelNotReady("save"))?;
        fs::create_dir_all(dir)?;
        Ok(vec![t.booster.save(dir)?, t.vectorizer.save(dir)?])
    }

    fn load(&mut self, dir: &Path) -> PipelineResult<()> {
        let booster    = Booster::load(dir)?;
        let vectorizer = TfidfVectorizer::load(dir)?;
        if booster.num_features != vectorizer.num_features() {
            tracing::error!(
                "Booster expects {} features but vectorizer has {}",
                booster.num_features, vectorizer.num_features()
            );
            return Err(PipelineError::model_load(dir));
        }
        self.state = Some(Trained { vectorizer, booster });
        Ok(())
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::json!({ "seed": self.seed, "tfidf": self.tfidf, "gbdt": self.gbdt })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus() -> (Vec<String>, Vec<bool>) {
        let relevant = [
            "ocrelizumab reduces relapse rate in multiple sclerosis",
            "multiple sclerosis lesion load on mri after therapy",
            "relapse free survival in multiple sclerosis cohort",
            "ocrelizumab therapy for relapsing multiple sclerosis",
            "mri lesion activity in relapsing sclerosis",
            "multiple sclerosis relapse prevention with antibodies",
        ];
        let other = [
            "hospital parking policy changes next month",
            "cafeteria menu introduces vegetarian options",
            "parking garage closed for maintenance",
            "staff menu survey for the cafeteria",
            "new parking permits issued to staff",
            "cafeteria opening hours extended",
        ];
        let texts = relevant.iter().chain(other.iter()).map(|s| s.to_string()).collect();
        let labels = (0..12).map(|i| i < 6).collect();
        (texts, labels)
    }

    fn quick() -> GbdtTrainer {
        let gbdt = GbdtParams { num_rounds: 20, learning_rate: 0.3, min_data_in_leaf: 2, ..GbdtParams::default() };
        GbdtTrainer::new(TfidfParams::default(), gbdt, 69)
    }

    #[test]
    fn test_train_predict_separates_topics() {
        let (texts, labels) = corpus();
        let mut t = quick();
        let history = t.train(&texts, &labels, &texts, &labels, 10, 16).unwrap();
        assert!(history.best_epoch >= 1);
        assert!(history.best().is_some());

        let report = t.evaluate(&texts, &labels, 0.5).unwrap();
        assert!(report.accuracy >= 0.9, "accuracy {}", report.accuracy);
    }

    #[test]
    fn test_save_load_reproduces_probabilities() {
        let (texts, labels) = corpus();
        let mut t = quick();
        t.train(&texts, &labels, &texts, &labels, 1, 1).unwrap();
        let tmp = TempDir::new().unwrap();
        let files = t.save(tmp.path()).unwrap();
        for name in Algorithm::GbdtTfidf.artifact_files() {
            assert!(files.contains(&tmp.path().join(name)));
        }

        let mut loaded = quick();
        loaded.load(tmp.path()).unwrap();
        assert_eq!(loaded.predict_proba(&texts).unwrap(), t.predict_proba(&texts).unwrap());
    }

    #[test]
    fn test_untrained_is_not_ready() {
        let t = quick();
        assert!(matches!(t.predict_proba(&[]), Err(PipelineError::ModelNotReady(_))));
    }

    #[test]
    fn test_blank_text_is_data_error_not_base_rate() {
        let (texts, labels) = corpus();
        let mut t = quick();
        t.train(&texts, &labels, &texts, &labels, 1, 1).unwrap();

        let batch = vec!["multiple sclerosis relapse".to_string(), "  ".to_string()];
        assert!(matches!(t.predict_proba(&batch), Err(PipelineError::Data(_))));
        assert!(matches!(t.predict_proba(&[String::new()]), Err(PipelineError::Data(_))));
        assert_eq!(t.predict_proba(&batch[..1]).unwrap().len(), 1);
    }

    #[test]
    fn test_blank_training_text_is_data_error() {
        let (mut texts, labels) = corpus();
        texts[7] = "\n".into();
        let err = quick().train(&texts, &labels, &texts, &labels, 1, 1).unwrap_err();
        assert!(matches!(err, PipelineError::Data(_)));
    }
}
