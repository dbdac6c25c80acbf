// ============================================================
// Layer 5 — Gradient Boosted Trees
// ============================================================
// Binary log-loss boosting over sparse non-negative features.
//
//   - Trees grow leaf-wise: the leaf with the largest gain is
//     split next, up to num_leaves leaves
//   - Split search walks only the non-zero entries of each
//     column; absent entries are 0.0 and always go left
//   - Row bagging every bagging_freq rounds, feature sampling
//     per tree
//   - Validation log-loss drives early stopping; the model keeps
//     the trees up to the best round
//
// Leaf values are Newton steps −G / (H + λ) scaled by the
// learning rate.

use std::path::{Path, PathBuf};

use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sprs::{CsMat, CsVecView};

use crate::domain::error::{PipelineError, PipelineResult};

pub const MODEL_FILE: &str = "gbdt_model.json";

const MIN_HESSIAN: f64 = 1e-16;
const MIN_SUM_HESSIAN_IN_LEAF: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtParams {
    pub num_rounds:            usize,
    pub learning_rate:         f64,
    pub num_leaves:            usize,
    pub min_data_in_leaf:      usize,
    pub lambda_l2:             f64,
    pub feature_fraction:      f64,
    pub bagging_fraction:      f64,
    pub bagging_freq:          usize,
    pub early_stopping_rounds: usize,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            num_rounds:            100,
            learning_rate:         0.05,
            num_leaves:            31,
            min_data_in_leaf:      3,
            lambda_l2:             1.0,
            feature_fraction:      0.9,
            bagging_fraction:      0.8,
            bagging_freq:          5,
            early_stopping_rounds: 10,
        }
    }
}

// ─── Trees ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// `x[feature] <= threshold` goes left.
    Split { feature: usize, threshold: f32, left: usize, right: usize },
    Leaf  { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn predict_row(&self, row: &CsVecView<'_, f32>) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes[at] {
                Node::Leaf { value } => return value,
                Node::Split { feature, threshold, left, right } => {
                    let x = row.get(feature).copied().unwrap_or(0.0);
                    at = if x <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }
}

/// Per-round losses recorded while boosting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundRecord {
    pub round:        usize,
    pub train_loss:   f64,
    pub val_loss:     f64,
    pub val_accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booster {
    pub num_features:   usize,
    /// Initial raw score: log-odds of the training positive rate.
    pub base_score:     f64,
    pub trees:          Vec<Tree>,
    /// 1-based round with the lowest validation loss.
    pub best_iteration: usize,
}

impl Booster {
    /// Boost on `x`/`y`, stopping early on `x_val`/`y_val`.
    pub fn train(
        x:      &CsMat<f32>,
        y:      &[bool],
        x_val:  &CsMat<f32>,
        y_val:  &[bool],
        params: &GbdtParams,
        seed:   u64,
    ) -> PipelineResult<(Self, Vec<RoundRecord>)> {
        if !x.is_csr() || !x_val.is_csr() {
            return Err(PipelineError::data("booster expects CSR feature matrices"));
        }
        if x.rows() != y.len() || x_val.rows() != y_val.len() {
            return Err(PipelineError::data("feature rows and labels differ in length"));
        }
        if x.rows() == 0 || x_val.rows() == 0 {
            return Err(PipelineError::data("booster needs non-empty train and validation sets"));
        }
        if x.cols() != x_val.cols() {
            return Err(PipelineError::data("train and validation feature widths differ"));
        }

        let n          = x.rows();
        let positives  = y.iter().filter(|&&l| l).count() as f64;
        let rate       = (positives / n as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (rate / (1.0 - rate)).ln();
        let targets: Vec<f64> = y.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();

        let columns  = ColumnIndex::build(x);
        let mut rng  = StdRng::seed_from_u64(seed);
        let mut raw     = vec![base_score; n];
        let mut raw_val = vec![base_score; x_val.rows()];
        let mut in_bag  = vec![true; n];

        let mut trees   = Vec::new();
        let mut rounds  = Vec::new();
        let mut best    = (f64::INFINITY, 0usize);

        for round in 1..=params.num_rounds {
            // ── Step 1: row bagging ───────────────────────────────────────────
            if params.bagging_fraction < 1.0 && params.bagging_freq > 0 && (round - 1) % params.bagging_freq == 0 {
                for slot in in_bag.iter_mut() {
                    *slot = rng.gen::<f64>() < params.bagging_fraction;
                }
                if !in_bag.iter().any(|&b| b) {
                    in_bag.fill(true);
                }
            }

            // ── Step 2: gradients ─────────────────────────────────────────────
            let (grad, hess): (Vec<f64>, Vec<f64>) = raw
                .iter()
                .zip(&targets)
                .map(|(&f, &t)| {
                    let p = sigmoid(f);
                    (p - t, (p * (1.0 - p)).max(MIN_HESSIAN))
                })
                .unzip();

            // ── Step 3: grow one tree ─────────────────────────────────────────
            let features = sample_features(&columns, params.feature_fraction, &mut rng);
            let rows: Vec<usize> = (0..n).filter(|&i| in_bag[i]).collect();
            let tree = grow_tree(&columns, &features, rows, &grad, &hess, params);

            for (i, row) in x.outer_iterator().enumerate() {
                raw[i] += tree.predict_row(&row);
            }
            for (i, row) in x_val.outer_iterator().enumerate() {
                raw_val[i] += tree.predict_row(&row);
            }
            trees.push(tree);

            // ── Step 4: evaluate + early stopping ─────────────────────────────
            let record = RoundRecord {
                round,
                train_loss:   log_loss(&raw, y),
                val_loss:     log_loss(&raw_val, y_val),
                val_accuracy: accuracy(&raw_val, y_val),
            };
            tracing::debug!(
                "round {:>3} | train_loss={:.4} | val_loss={:.4}",
                round, record.train_loss, record.val_loss
            );
            rounds.push(record);

            if record.val_loss < best.0 {
                best = (record.val_loss, round);
            } else if params.early_stopping_rounds > 0 && round - best.1 >= params.early_stopping_rounds {
                tracing::info!("Early stopping at round {}; best round {} (val_loss={:.4})", round, best.1, best.0);
                break;
            }
        }

        let best_iteration = best.1.max(1);
        trees.truncate(best_iteration);

        Ok((Self { num_features: x.cols(), base_score, trees, best_iteration }, rounds))
    }

    pub fn predict_proba(&self, x: &CsMat<f32>) -> PipelineResult<Vec<f32>> {
        if !x.is_csr() {
            return Err(PipelineError::data("booster expects CSR feature matrices"));
        }
        if x.cols() != self.num_features {
            return Err(PipelineError::data(format!(
                "expected {} features, got {}", self.num_features, x.cols()
            )));
        }
        Ok(x.outer_iterator()
            .map(|row| {
                let raw: f64 = self.base_score + self.trees.iter().map(|t| t.predict_row(&row)).sum::<f64>();
                sigmoid(raw) as f32
            })
            .collect())
    }

    pub fn save(&self, dir: &Path) -> PipelineResult<PathBuf> {
        let path = dir.join(MODEL_FILE);
        std::fs::write(&path, serde_json::to_string(self)?)?;
        Ok(path)
    }

    pub fn load(dir: &Path) -> PipelineResult<Self> {
        let path = dir.join(MODEL_FILE);
        let raw  = std::fs::read_to_string(&path).map_err(|_| PipelineError::model_load(&path))?;
        serde_json::from_str(&raw).map_err(|e| {
            tracing::error!("Cannot parse '{}': {}", path.display(), e);
            PipelineError::model_load(&path)
        })
    }
}

// ─── Column index ─────────────────────────────────────────────────────────────

/// Non-zero entries of every column, sorted by value.
struct ColumnIndex {
    columns: Vec<Vec<(usize, f32)>>,
}

impl ColumnIndex {
    fn build(x: &CsMat<f32>) -> Self {
        let mut columns = vec![Vec::new(); x.cols()];
        for (row, vec) in x.outer_iterator().enumerate() {
            for (col, &value) in vec.iter() {
                if value != 0.0 {
                    columns[col].push((row, value));
                }
            }
        }
        for col in &mut columns {
            col.sort_by(|a, b| a.1.total_cmp(&b.1));
        }
        Self { columns }
    }
}

fn sample_features(index: &ColumnIndex, fraction: f64, rng: &mut StdRng) -> Vec<usize> {
    let candidates: Vec<usize> = (0..index.columns.len())
        .filter(|&c| !index.columns[c].is_empty())
        .collect();
    if fraction >= 1.0 || candidates.len() <= 1 {
        return candidates;
    }
    let k = ((candidates.len() as f64 * fraction).ceil() as usize).clamp(1, candidates.len());
    let mut picked: Vec<usize> = index::sample(rng, candidates.len(), k)
        .into_iter()
        .map(|i| candidates[i])
        .collect();
    picked.sort_unstable();
    picked
}

// ─── Tree growth ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct SplitInfo {
    feature:   usize,
    threshold: f32,
    gain:      f64,
}

struct OpenLeaf {
    node:  usize,
    rows:  Vec<usize>,
    grad:  f64,
    hess:  f64,
    split: Option<SplitInfo>,
}

fn leaf_score(g: f64, h: f64, lambda: f64) -> f64 {
    g * g / (h + lambda)
}

fn grow_tree(
    columns:  &ColumnIndex,
    features: &[usize],
    rows:     Vec<usize>,
    grad:     &[f64],
    hess:     &[f64],
    params:   &GbdtParams,
) -> Tree {
    let mut leaf_of = vec![usize::MAX; grad.len()];
    let mut nodes   = vec![Node::Leaf { value: 0.0 }];
    let mut open    = vec![open_leaf(0, rows, columns, features, grad, hess, &mut leaf_of, params)];

    while open.len() < params.num_leaves.max(1) {
        let pick = open
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.split.map(|s| (i, s.gain)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        let Some((i, _)) = pick else { break };

        let leaf  = open.swap_remove(i);
        let Some(split) = leaf.split else { break };

        let mut goes_right = vec![false; grad.len()];
        for &(row, value) in &columns.columns[split.feature] {
            if leaf_of[row] == leaf.node && value > split.threshold {
                goes_right[row] = true;
            }
        }
        let (right_rows, left_rows): (Vec<usize>, Vec<usize>) =
            leaf.rows.into_iter().partition(|&r| goes_right[r]);

        let left  = nodes.len();
        let right = left + 1;
        nodes.push(Node::Leaf { value: 0.0 });
        nodes.push(Node::Leaf { value: 0.0 });
        nodes[leaf.node] = Node::Split { feature: split.feature, threshold: split.threshold, left, right };

        open.push(open_leaf(left, left_rows, columns, features, grad, hess, &mut leaf_of, params));
        open.push(open_leaf(right, right_rows, columns, features, grad, hess, &mut leaf_of, params));
    }

    for leaf in open {
        let value = -leaf.grad / (leaf.hess + params.lambda_l2) * params.learning_rate;
        nodes[leaf.node] = Node::Leaf { value };
    }
    Tree { nodes }
}

#[allow(clippy::too_many_arguments)]
fn open_leaf(
    node:     usize,
    rows:     Vec<usize>,
    columns:  &ColumnIndex,
    features: &[usize],
    grad:     &[f64],
    hess:     &[f64],
    leaf_of:  &mut [usize],
    params:   &GbdtParams,
) -> OpenLeaf {
    for &r in &rows {
        leaf_of[r] = node;
    }
    let g: f64 = rows.iter().map(|&r| grad[r]).sum();
    let h: f64 = rows.iter().map(|&r| hess[r]).sum();
    let split = best_split(node, rows.len(), g, h, columns, features, grad, hess, leaf_of, params);
    OpenLeaf { node, rows, grad: g, hess: h, split }
}

/// Best threshold over the sampled features for the rows of `node`.
///
/// For each column the rows with an explicit entry are scanned in value
/// order; rows without one sit at 0.0 on the left of every threshold.
#[allow(clippy::too_many_arguments)]
fn best_split(
    node:     usize,
    count:    usize,
    g_total:  f64,
    h_total:  f64,
    columns:  &ColumnIndex,
    features: &[usize],
    grad:     &[f64],
    hess:     &[f64],
    leaf_of:  &[usize],
    params:   &GbdtParams,
) -> Option<SplitInfo> {
    let min_leaf = params.min_data_in_leaf.max(1);
    if count < 2 * min_leaf {
        return None;
    }
    let lambda = params.lambda_l2;
    let parent = leaf_score(g_total, h_total, lambda);
    let mut best: Option<SplitInfo> = None;

    for &feature in features {
        let entries: Vec<(usize, f32)> = columns.columns[feature]
            .iter()
            .copied()
            .filter(|&(r, _)| leaf_of[r] == node)
            .collect();
        if entries.is_empty() {
            continue;
        }

        let g_nz: f64 = entries.iter().map(|&(r, _)| grad[r]).sum();
        let h_nz: f64 = entries.iter().map(|&(r, _)| hess[r]).sum();

        // Left starts with the implicit zeros.
        let mut g_left = g_total - g_nz;
        let mut h_left = h_total - h_nz;
        let mut n_left = count - entries.len();
        let mut prev   = 0.0f32;

        for (k, &(r, value)) in entries.iter().enumerate() {
            if k == 0 || value > prev {
                let n_right = count - n_left;
                let h_right = h_total - h_left;
                if n_left >= min_leaf
                    && n_right >= min_leaf
                    && h_left >= MIN_SUM_HESSIAN_IN_LEAF
                    && h_right >= MIN_SUM_HESSIAN_IN_LEAF
                {
                    let gain = leaf_score(g_left, h_left, lambda)
                        + leaf_score(g_total - g_left, h_right, lambda)
                        - parent;
                    if gain > 1e-12 && best.map_or(true, |b| gain > b.gain) {
                        let threshold = if k == 0 { prev } else { prev + (value - prev) / 2.0 };
                        best = Some(SplitInfo { feature, threshold, gain });
                    }
                }
            }
            g_left += grad[r];
            h_left += hess[r];
            n_left += 1;
            prev    = value;
        }
    }
    best
}

// ─── Loss helpers ─────────────────────────────────────────────────────────────

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn log_loss(raw: &[f64], y: &[bool]) -> f64 {
    let eps = 1e-15;
    let total: f64 = raw
        .iter()
        .zip(y)
        .map(|(&f, &l)| {
            let p = sigmoid(f).clamp(eps, 1.0 - eps);
            if l { -p.ln() } else { -(1.0 - p).ln() }
        })
        .sum();
    total / raw.len().max(1) as f64
}

fn accuracy(raw: &[f64], y: &[bool]) -> f64 {
    let hits = raw.iter().zip(y).filter(|(&f, &l)| (f >= 0.0) == l).count();
    hits as f64 / raw.len().max(1) as f64
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Column 0 carries the label, column 1 is noise.
    fn separable(n: usize) -> (CsMat<f32>, Vec<bool>) {
        let mut indptr = vec![0];
        let mut indices = Vec::new();
        let mut data = Vec::new();
        let mut y = Vec::new();
        for i in 0..n {
            let positive = i % 2 == 0;
            if positive {
                indices.push(0);
                data.push(0.5 + (i % 5) as f32 * 0.1);
            }
            indices.push(1);
            data.push(((i * 7) % 11) as f32 / 11.0 + 0.01);
            indptr.push(indices.len());
            y.push(positive);
        }
        (CsMat::new((n, 2), indptr, indices, data), y)
    }

    fn quick() -> GbdtParams {
        GbdtParams { num_rounds: 30, learning_rate: 0.3, min_data_in_leaf: 2, ..GbdtParams::default() }
    }

    #[test]
    fn test_learns_separable_feature() {
        let (x, y) = separable(40);
        let (booster, rounds) = Booster::train(&x, &y, &x, &y, &quick(), 69).unwrap();
        assert!(!rounds.is_empty());
        assert!(rounds.last().unwrap().val_loss < rounds[0].val_loss);

        let probs = booster.predict_proba(&x).unwrap();
        for (p, &l) in probs.iter().zip(&y) {
            assert_eq!(*p >= 0.5, l);
        }
        assert!(matches!(booster.trees[0].nodes[0], Node::Split { feature: 0, .. }));
    }

    #[test]
    fn test_tree_respects_num_leaves() {
        let (x, y) = separable(40);
        let params = GbdtParams { num_leaves: 2, ..quick() };
        let (booster, _) = Booster::train(&x, &y, &x, &y, &params, 1).unwrap();
        assert!(booster.trees.iter().all(|t| t.num_leaves() <= 2));
    }

    #[test]
    fn test_keeps_trees_up_to_best_iteration() {
        let (x, y) = separable(20);
        let flipped: Vec<bool> = y.iter().map(|l| !l).collect();
        let params = GbdtParams { early_stopping_rounds: 2, ..quick() };
        // Validation labels are inverted, so loss only grows after round 1.
        let (booster, rounds) = Booster::train(&x, &y, &x, &flipped, &params, 3).unwrap();
        assert_eq!(booster.best_iteration, 1);
        assert_eq!(booster.trees.len(), 1);
        assert!(rounds.len() <= 3);
    }

    #[test]
    fn test_feature_width_mismatch_is_data_error() {
        let (x, y) = separable(10);
        let (booster, _) = Booster::train(&x, &y, &x, &y, &quick(), 0).unwrap();
        let narrow: CsMat<f32> = CsMat::zero((1, 1));
        assert!(matches!(booster.predict_proba(&narrow), Err(PipelineError::Data(_))));
    }

    #[test]
    fn test_save_load_round_trip() {
        let (x, y) = separable(20);
        let (booster, _) = Booster::train(&x, &y, &x, &y, &quick(), 5).unwrap();
        let tmp = TempDir::new().unwrap();
        booster.save(tmp.path()).unwrap();
        let back = Booster::load(tmp.path()).unwrap();
        assert_eq!(back.predict_proba(&x).unwrap(), booster.predict_proba(&x).unwrap());
    }
}
