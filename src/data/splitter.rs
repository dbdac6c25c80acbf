// ============================================================
// Layer 4 — Stratified Train/Validation/Test Splitter
// ============================================================
// Two-stage stratified split, done per class so every split
// keeps the overall positive/negative balance:
//
//   stage 1: carve test_fraction (15%) off each class
//   stage 2: carve val_fraction / (1 - test_fraction) of what
//            is left for validation, the rest is training
//
// With the defaults this lands at 70:15:15. Each class needs at
// least one member in every split, so a class of fewer than 3
// rows cannot be split at all.
//
// The RNG is a seeded StdRng (seed 69 by default): the same rows
// always land in the same split.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::{
    article::{DatasetSplit, LabeledExample},
    error::{PipelineError, PipelineResult},
};

pub const DEFAULT_SEED: u64 = 69;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub test_fraction: f64,
    pub val_fraction:  f64,
    pub seed:          u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self { test_fraction: 0.15, val_fraction: 0.15, seed: DEFAULT_SEED }
    }
}

/// Smallest class size the splitter can place in all three splits.
/// Every class gets at least one test row, one validation row and one
/// training row, whatever the fractions say.
pub const MIN_SPLITTABLE_CLASS: usize = 3;

/// Split `examples` into disjoint, class-stratified train/val/test sets.
pub fn stratified_split(examples: Vec<LabeledExample>, cfg: &SplitConfig) -> PipelineResult<DatasetSplit> {
    if !(0.0..1.0).contains(&cfg.test_fraction)
        || !(0.0..1.0).contains(&cfg.val_fraction)
        || cfg.test_fraction + cfg.val_fraction >= 1.0
    {
        return Err(PipelineError::data(format!(
            "invalid split fractions: test={} val={}", cfg.test_fraction, cfg.val_fraction
        )));
    }

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let (positives, negatives): (Vec<_>, Vec<_>) = examples.into_iter().partition(|e| e.label);

    let mut split = DatasetSplit::default();
    for (label, mut class) in [(false, negatives), (true, positives)] {
        let n = class.len();
        if n < MIN_SPLITTABLE_CLASS {
            return Err(PipelineError::data(format!(
                "class {} has {} examples; at least {} are needed to stratify train/val/test",
                label as u8, n, MIN_SPLITTABLE_CLASS
            )));
        }

        class.shuffle(&mut rng);

        // ── Stage 1: test ────────────────────────────────────────────────────
        let n_test = ((n as f64 * cfg.test_fraction).round() as usize).clamp(1, n - 2);
        let rest   = n - n_test;

        // ── Stage 2: validation out of the remainder ─────────────────────────
        let val_share = cfg.val_fraction / (1.0 - cfg.test_fraction);
        let n_val     = ((rest as f64 * val_share).round() as usize).clamp(1, rest - 1);

        let mut iter = class.into_iter();
        split.test.extend(iter.by_ref().take(n_test));
        split.validation.extend(iter.by_ref().take(n_val));
        split.train.extend(iter);
    }

    split.train.shuffle(&mut rng);
    split.validation.shuffle(&mut rng);
    split.test.shuffle(&mut rng);

    let (tr, va, te) = split.sizes();
    let total = (tr + va + te).max(1);
    tracing::debug!(
        "Dataset split: {} train, {} validation, {} test ({}% / {}% / {}%)",
        tr, va, te,
        tr * 100 / total, va * 100 / total, te * 100 / total,
    );

    Ok(split)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn dataset(pos: usize, neg: usize) -> Vec<LabeledExample> {
        (0..pos + neg)
            .map(|i| LabeledExample::annotated(i as u64, format!("text {i}"), i < pos))
            .collect()
    }

    fn ids(xs: &[LabeledExample]) -> HashSet<u64> {
        xs.iter().map(|e| e.id).collect()
    }

    fn positive_rate(xs: &[LabeledExample]) -> f64 {
        xs.iter().filter(|e| e.label).count() as f64 / xs.len() as f64
    }

    #[test]
    fn test_splits_are_disjoint_and_complete() {
        let split = stratified_split(dataset(40, 60), &SplitConfig::default()).unwrap();
        let (tr, va, te) = (ids(&split.train), ids(&split.validation), ids(&split.test));
        assert!(tr.is_disjoint(&va));
        assert!(tr.is_disjoint(&te));
        assert!(va.is_disjoint(&te));
        assert_eq!(tr.len() + va.len() + te.len(), 100);
    }

    #[test]
    fn test_class_balance_preserved() {
        let split = stratified_split(dataset(30, 70), &SplitConfig::default()).unwrap();
        for part in [&split.train, &split.validation, &split.test] {
            assert!((positive_rate(part) - 0.3).abs() <= 0.10, "rate {}", positive_rate(part));
        }
    }

    #[test]
    fn test_ratio_is_roughly_70_15_15() {
        let split = stratified_split(dataset(100, 100), &SplitConfig::default()).unwrap();
        let (tr, va, te) = split.sizes();
        assert_eq!(te, 30);
        assert_eq!(va, 30);
        assert_eq!(tr, 140);
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = stratified_split(dataset(10, 12), &SplitConfig::default()).unwrap();
        let b = stratified_split(dataset(10, 12), &SplitConfig::default()).unwrap();
        assert_eq!(a.test, b.test);
        assert_eq!(a.train, b.train);
    }

    #[test]
    fn test_smallest_classes_fill_every_split() {
        let split = stratified_split(dataset(3, 3), &SplitConfig::default()).unwrap();
        assert_eq!(split.sizes(), (2, 2, 2));
        for part in [&split.train, &split.validation, &split.test] {
            assert!(part.iter().any(|e| e.label));
            assert!(part.iter().any(|e| !e.label));
        }
    }

    #[test]
    fn test_tiny_class_rejected() {
        let err = stratified_split(dataset(2, 10), &SplitConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Data(_)));
        assert!(stratified_split(dataset(3, 10), &SplitConfig::default()).is_ok());
    }
}
