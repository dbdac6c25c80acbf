// ============================================================
// Layer 5 — Binary Evaluation
// ============================================================
// Threshold metrics (accuracy, precision, recall, F1, confusion
// matrix, per-class report) plus the two ranking metrics:
//
//   ROC AUC  Mann-Whitney rank statistic, ties get average rank
//   PR AUC   average precision: Σ (R_k − R_{k−1}) · P_k over
//            distinct score thresholds, highest first
//
// Any ratio with a zero denominator is 0. Ranking metrics need
// both classes present and are None otherwise.

use crate::domain::report::{binarize, ClassReport, EvaluationReport, PerClassReport};

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 { 0.0 } else { 2.0 * precision * recall / (precision + recall) }
}

pub fn evaluate_binary(labels: &[bool], probabilities: &[f32], threshold: f32) -> EvaluationReport {
    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for (&y, &p) in labels.iter().zip(probabilities) {
        match (y, binarize(p, threshold)) {
            (true, true)   => tp += 1,
            (false, true)  => fp += 1,
            (false, false) => tn += 1,
            (true, false)  => fn_ += 1,
        }
    }

    let precision = ratio(tp, tp + fp);
    let recall    = ratio(tp, tp + fn_);
    let neg_precision = ratio(tn, tn + fn_);
    let neg_recall    = ratio(tn, tn + fp);

    EvaluationReport {
        accuracy: ratio(tp + tn, tp + tn + fp + fn_),
        precision,
        recall,
        f1: f1(precision, recall),
        roc_auc: roc_auc(labels, probabilities),
        pr_auc: average_precision(labels, probabilities),
        confusion_matrix: [[tn, fp], [fn_, tp]],
        per_class: PerClassReport {
            not_relevant: ClassReport {
                precision: neg_precision,
                recall:    neg_recall,
                f1:        f1(neg_precision, neg_recall),
                support:   tn + fp,
            },
            relevant: ClassReport { precision, recall, f1: f1(precision, recall), support: tp + fn_ },
        },
        threshold,
    }
}

pub fn roc_auc(labels: &[bool], scores: &[f32]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&y| y).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Average 1-based ranks over runs of equal scores.
    let mut rank_sum_pos = 0.0f64;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            if labels[idx] {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    Some((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

pub fn average_precision(labels: &[bool], scores: &[f32]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&y| y).count();
    if n_pos == 0 || n_pos == labels.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let (mut tp, mut fp) = (0usize, 0usize);
    let mut prev_recall = 0.0f64;
    let mut ap = 0.0f64;
    let mut i = 0;
    while i < order.len() {
        // Consume every row sharing this score before measuring.
        let s = scores[order[i]];
        while i < order.len() && scores[order[i]] == s {
            if labels[order[i]] { tp += 1 } else { fp += 1 }
            i += 1;
        }
        let recall    = tp as f64 / n_pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    Some(ap)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_ranking_metrics_known_values() {
        let y = [false, false, true, true];
        let s = [0.1, 0.4, 0.35, 0.8];
        assert!(close(roc_auc(&y, &s).unwrap(), 0.75));
        assert!(close(average_precision(&y, &s).unwrap(), 0.5 + 0.5 * (2.0 / 3.0)));
    }

    #[test]
    fn test_ties_average_out() {
        let y = [false, true];
        let s = [0.5, 0.5];
        assert!(close(roc_auc(&y, &s).unwrap(), 0.5));
    }

    #[test]
    fn test_single_class_has_no_ranking_metrics() {
        let r = evaluate_binary(&[true, true], &[0.9, 0.2], 0.8);
        assert!(r.roc_auc.is_none());
        assert!(r.pr_auc.is_none());
        assert!(close(r.accuracy, 0.5));
    }

    #[test]
    fn test_threshold_metrics_and_confusion_matrix() {
        // tp: 0.9 | fn: 0.7 | fp: 0.85 | tn: 0.1, 0.3
        let y = [true, true, false, false, false];
        let p = [0.9, 0.7, 0.85, 0.1, 0.3];
        let r = evaluate_binary(&y, &p, 0.8);
        assert_eq!(r.confusion_matrix, [[2, 1], [1, 1]]);
        assert!(close(r.accuracy, 0.6));
        assert!(close(r.precision, 0.5));
        assert!(close(r.recall, 0.5));
        assert!(close(r.f1, 0.5));
        assert_eq!(r.per_class.not_relevant.support, 3);
        assert!(close(r.per_class.not_relevant.recall, 2.0 / 3.0));
    }

    #[test]
    fn test_boundary_probability_is_positive() {
        let r = evaluate_binary(&[true], &[0.8], 0.8);
        assert_eq!(r.confusion_matrix[1][1], 1);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let r = evaluate_binary(&[false, false], &[0.1, 0.2], 0.8);
        assert_eq!(r.precision, 0.0);
        assert_eq!(r.recall, 0.0);
        assert_eq!(r.f1, 0.0);
        assert_eq!(r.accuracy, 1.0);
    }
}
