// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain structs, enums and traits describing what the pipeline
// works with: rows, labeled examples, splits, run-log entries,
// stored predictions and the classifier capability set.
//
// No Burn types and no file I/O live here.

// Raw rows, labeled/unlabeled examples and dataset splits
pub mod article;

// The closed set of classifier families
pub mod algorithm;

// Error taxonomy shared by every layer
pub mod error;

// Stored prediction rows and their uniqueness key
pub mod prediction;

// Metrics, histories and the shared threshold rule
pub mod report;

// Audit-log entry for one unit of work
pub mod run_log;

// Core abstractions (traits) that other layers implement
pub mod traits;
