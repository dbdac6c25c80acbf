// ============================================================
// Layer 2 — Pseudo-Label Audit
// ============================================================
// Reloads a pseudo-label export written during training and
// summarises what passes a confidence / iteration filter, so a
// reviewer can see which promoted rows a model was fit on.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};

use crate::domain::article::LabeledExample;
use crate::ml::pseudo::{load_and_filter, PseudoFilter};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditSummary {
    pub original:     usize,
    pub pseudo:       usize,
    pub relevant:     usize,
    pub not_relevant: usize,
    /// Pseudo rows per self-training round.
    pub by_iteration: BTreeMap<usize, usize>,
    pub min_confidence: Option<f32>,
}

impl AuditSummary {
    fn from_examples(examples: &[LabeledExample]) -> Self {
        let mut s = Self::default();
        for ex in examples {
            if ex.label {
                s.relevant += 1;
            } else {
                s.not_relevant += 1;
            }
            if !ex.is_pseudo() {
                s.original += 1;
                continue;
            }
            s.pseudo += 1;
            if let Some(it) = ex.source_iteration() {
                *s.by_iteration.entry(it).or_default() += 1;
            }
            if let Some(c) = ex.confidence() {
                s.min_confidence = Some(s.min_confidence.map_or(c, |m| m.min(c)));
            }
        }
        s
    }
}

pub fn audit_export(path: &Path, filter: &PseudoFilter) -> Result<AuditSummary> {
    let examples = load_and_filter(path, filter)
        .with_context(|| format!("Cannot audit '{}'", path.display()))?;
    let summary = AuditSummary::from_examples(&examples);
    tracing::info!(
        "'{}': {} annotated, {} pseudo rows kept",
        path.display(), summary.original, summary.pseudo
    );
    Ok(summary)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{algorithm::Algorithm, article::Provenance};
    use crate::ml::pseudo::export_pseudo_labels;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn pseudo(id: u64, label: bool, confidence: f32, source_iteration: usize) -> LabeledExample {
        LabeledExample {
            id,
            text: format!("text {id}"),
            label,
            provenance: Provenance::Pseudo { confidence, source_iteration },
        }
    }

    #[test]
    fn test_summary_respects_filter() {
        let tmp = TempDir::new().unwrap();
        let rows = vec![
            LabeledExample::annotated(1, "a", true),
            LabeledExample::annotated(2, "b", false),
            pseudo(10, true, 0.97, 1),
            pseudo(11, false, 0.92, 2),
            pseudo(12, true, 0.99, 3),
        ];
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let path = export_pseudo_labels(tmp.path(), Algorithm::GbdtTfidf, &rows, now).unwrap();

        let filter = PseudoFilter { min_confidence: Some(0.95), max_iteration: Some(2), include_original: true };
        let s = audit_export(&path, &filter).unwrap();
        assert_eq!(s.original, 2);
        assert_eq!(s.pseudo, 1);
        assert_eq!((s.relevant, s.not_relevant), (2, 1));
        assert_eq!(s.by_iteration, BTreeMap::from([(1, 1)]));
        assert_eq!(s.min_confidence, Some(0.97));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let filter = PseudoFilter { min_confidence: None, max_iteration: None, include_original: false };
        assert!(audit_export(&tmp.path().join("nope.jsonl"), &filter).is_err());
    }
}
