// ============================================================
// Layer 5 — ML / Model Layer
// ============================================================
// Every Burn, TF-IDF and boosting detail lives in this layer.
// The application layer only sees the TextClassifier trait and
// the TrainerFactory that builds one per algorithm tag.
//
// What's in this layer:
//
//   model.rs / recurrent.rs
//                  Burn modules: a small transformer encoder and
//                  an LSTM, both ending in two logits
//
//   trainer.rs     Shared neural fit loop (Adam, cross entropy,
//                  early stopping on validation loss) plus
//                  weight save/load
//
//   tfidf.rs / gbdt.rs
//                  Sparse TF-IDF features and leaf-wise boosted
//                  trees over them
//
//   *_trainer.rs   One TextClassifier per algorithm tag:
//                  pubmed_bert, lstm, lgbm_tfidf
//
//   pseudo.rs      Self-training loop over the unlabeled pool
//
//   evaluation.rs  Threshold and ranking metrics

/// Binary metrics: accuracy, F1, ROC AUC, PR AUC
pub mod evaluation;

/// Hyperparameters for every family, TOML-overridable
pub mod params;

/// Transformer encoder classifier module
pub mod model;

/// LSTM classifier module
pub mod recurrent;

/// Neural training loop, prediction and weight files
pub mod trainer;

pub mod tfidf;
pub mod gbdt;

pub mod transformer_trainer;
pub mod recurrent_trainer;
pub mod gbdt_trainer;

/// Algorithm tag → fresh classifier
pub mod factory;

/// Pseudo-labeling engine, export and reload
pub mod pseudo;
