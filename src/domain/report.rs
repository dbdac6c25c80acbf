use serde::{Deserialize, Serialize};

/// Decision rule shared by evaluate and predict: a probability equal to
/// the threshold counts as positive.
pub fn binarize(probability: f32, threshold: f32) -> bool {
    probability >= threshold
}

/// Confidence of a binary prediction: `max(p, 1 - p)`.
pub fn confidence(probability: f32) -> f32 {
    probability.max(1.0 - probability)
}

/// Thresholded decisions alongside the raw positive-class probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub labels:        Vec<bool>,
    pub probabilities: Vec<f32>,
}

/// One epoch (neural trainers) or boosting round (GBDT).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch:        usize,
    pub train_loss:   f64,
    pub val_loss:     f64,
    pub val_accuracy: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs:           Vec<EpochRecord>,
    /// 1-based epoch whose weights were kept.
    pub best_epoch:       usize,
    pub stopped_early:    bool,
    pub training_seconds: f64,
}

impl TrainingHistory {
    pub fn best(&self) -> Option<&EpochRecord> {
        self.epochs.iter().find(|e| e.epoch == self.best_epoch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub precision: f64,
    pub recall:    f64,
    pub f1:        f64,
    pub support:   usize,
}

/// Binary classification metrics at one decision threshold.
/// `confusion_matrix` is `[[tn, fp], [fn, tp]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub accuracy:         f64,
    pub precision:        f64,
    pub recall:           f64,
    pub f1:               f64,
    pub roc_auc:          Option<f64>,
    pub pr_auc:           Option<f64>,
    pub confusion_matrix: [[usize; 2]; 2],
    pub per_class:        PerClassReport,
    pub threshold:        f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerClassReport {
    pub not_relevant: ClassReport,
    pub relevant:     ClassReport,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.8, 0.8, true)]
    #[case(0.79999, 0.8, false)]
    #[case(0.5, 0.5, true)]
    #[case(0.0, 0.8, false)]
    fn test_binarize_boundary(#[case] p: f32, #[case] t: f32, #[case] expected: bool) {
        assert_eq!(binarize(p, t), expected);
    }

    #[test]
    fn test_confidence_is_symmetric() {
        assert!((confidence(0.05) - 0.95).abs() < 1e-6);
        assert!((confidence(0.95) - 0.95).abs() < 1e-6);
        assert!((confidence(0.5) - 0.5).abs() < 1e-6);
    }
}
