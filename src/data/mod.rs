// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between raw article rows and tensor batches:
//
//   articles.jsonl
//       │
//       ▼
//   JsonlArticleSource  → rows per team/subject
//       │
//       ▼
//   Summariser          → (optional) condensed summaries
//       │
//       ▼
//   Preprocessor        → HTML/whitespace/stopword cleaning
//       │
//       ▼
//   DatasetAssembler    → quality gate, class checks
//       │
//       ▼
//   stratified_split    → train / validation / test
//       │
//       ▼
//   TextDataset         → Burn Dataset of token ids
//       │
//       ▼
//   TextBatcher         → padded tensor batches

/// Reads JSONL article rows per team/subject
pub mod loader;

/// Cleans and normalises raw text
pub mod preprocessor;

/// Builds labeled splits and the unlabeled pool
pub mod assembler;

/// Seeded two-stage stratified splitting
pub mod splitter;

/// Extractive summariser and bulk summarisation
pub mod summariser;

/// Implements Burn's Dataset trait for tokenised texts
pub mod dataset;

/// Implements Burn's Batcher trait with dynamic padding
pub mod batcher;
