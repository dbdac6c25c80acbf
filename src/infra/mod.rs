// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Persistence and bookkeeping shared by the use cases:
//
//   registry.rs          versioned model directories
//                        models/<team>/<subject>/<algo>/<version>/
//                        minting, resolving "latest", rejecting
//                        partial directories
//
//   tokenizer_store.rs   word-level tokenizer build/save/load
//                        for the transformer and LSTM trainers
//
//   metrics.rs           early stopping and the sanitised
//                        metrics.json record
//
//   run_log.rs           append-only audit trail of runs
//
//   prediction_store.rs  stored predictions, insert-or-ignore

/// Versioned model artifact directories
pub mod registry;

/// Tokenizer building, saving, and loading
pub mod tokenizer_store;

/// Early stopping and metrics.json records
pub mod metrics;

/// Run-log stores (JSON file, in-memory)
pub mod run_log;

/// Prediction stores (JSONL file, in-memory)
pub mod prediction_store;
