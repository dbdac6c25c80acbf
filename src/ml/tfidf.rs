// ============================================================
// Layer 5 — TF-IDF Vectorizer
// ============================================================
// Word unigrams + bigrams, document-frequency pruning, smooth
// idf and L2-normalised rows. Output is a CSR sparse matrix so
// the booster can walk only the non-zero entries.
//
//   idf(t) = ln((1 + n) / (1 + df(t))) + 1
//
// Tokens are runs of two or more word characters, lowercased.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::Path,
    sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

use crate::domain::error::{PipelineError, PipelineResult};

pub const VECTORIZER_FILE: &str = "tfidf_vectorizer.json";

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TfidfParams {
    pub max_features: usize,
    /// Minimum number of documents a term must appear in.
    pub min_df:       usize,
    /// Maximum share of documents a term may appear in.
    pub max_df:       f64,
    pub ngram_range:  (usize, usize),
}

impl Default for TfidfParams {
    fn default() -> Self {
        Self {
            max_features: 10_000,
            min_df:       2,
            max_df:       0.95,
            ngram_range:  (1, 2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    pub params:     TfidfParams,
    /// Term → column, columns assigned in alphabetical term order.
    pub vocabulary: BTreeMap<String, usize>,
    pub idf:        Vec<f32>,
}

impl TfidfVectorizer {
    /// Learn vocabulary and idf weights from `documents`.
    ///
    /// When `min_df` prunes every term (tiny corpora), fitting is retried
    /// once with `min_df = 1` and a warning.
    pub fn fit(documents: &[String], params: &TfidfParams) -> PipelineResult<Self> {
        if documents.is_empty() {
            return Err(PipelineError::data("cannot fit TF-IDF on zero documents"));
        }
        if params.ngram_range.0 == 0 || params.ngram_range.0 > params.ngram_range.1 {
            return Err(PipelineError::data(format!("invalid ngram_range {:?}", params.ngram_range)));
        }

        let docs: Vec<Vec<String>> = documents.iter().map(|d| analyze(d, params.ngram_range)).collect();

        let mut fitted = Self::fit_analyzed(&docs, params);
        if fitted.vocabulary.is_empty() && params.min_df > 1 {
            tracing::warn!(
                "TF-IDF: no terms left with min_df={} over {} documents, retrying with min_df=1",
                params.min_df, documents.len()
            );
            let relaxed = TfidfParams { min_df: 1, ..params.clone() };
            fitted = Self::fit_analyzed(&docs, &relaxed);
            fitted.params = params.clone();
        }
        if fitted.vocabulary.is_empty() {
            return Err(PipelineError::data("TF-IDF vocabulary is empty after pruning"));
        }
        tracing::debug!("TF-IDF fitted: {} features", fitted.vocabulary.len());
        Ok(fitted)
    }

    fn fit_analyzed(docs: &[Vec<String>], params: &TfidfParams) -> Self {
        let n = docs.len();
        let mut doc_freq:  HashMap<&str, usize> = HashMap::new();
        let mut term_freq: HashMap<&str, usize> = HashMap::new();

        for doc in docs {
            let mut seen = HashSet::new();
            for term in doc {
                *term_freq.entry(term).or_default() += 1;
                if seen.insert(term.as_str()) {
                    *doc_freq.entry(term).or_default() += 1;
                }
            }
        }

        let max_count = params.max_df * n as f64;
        let mut kept: Vec<(&str, usize)> = doc_freq
            .iter()
            .filter(|(_, &df)| df >= params.min_df && (df as f64) <= max_count)
            .map(|(&t, _)| (t, term_freq[t]))
            .collect();

        // Most frequent first, alphabetical among equals.
        kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        kept.truncate(params.max_features);

        let mut terms: Vec<&str> = kept.into_iter().map(|(t, _)| t).collect();
        terms.sort_unstable();

        let vocabulary: BTreeMap<String, usize> = terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i))
            .collect();
        let idf = terms
            .iter()
            .map(|t| (((1 + n) as f64 / (1 + doc_freq[t]) as f64).ln() + 1.0) as f32)
            .collect();

        Self { params: params.clone(), vocabulary, idf }
    }

    pub fn num_features(&self) -> usize {
        self.vocabulary.len()
    }

    /// One L2-normalised row per document. Unknown terms are ignored,
    /// so a document with none of the vocabulary becomes an empty row.
    pub fn transform(&self, documents: &[String]) -> CsMat<f32> {
        let mut indptr  = Vec::with_capacity(documents.len() + 1);
        let mut indices = Vec::new();
        let mut data    = Vec::new();
        indptr.push(0);

        for doc in documents {
            let mut counts: BTreeMap<usize, f32> = BTreeMap::new();
            for term in analyze(doc, self.params.ngram_range) {
                if let Some(&col) = self.vocabulary.get(&term) {
                    *counts.entry(col).or_default() += 1.0;
                }
            }
            let weighted: Vec<(usize, f32)> = counts
                .into_iter()
                .map(|(col, tf)| (col, tf * self.idf[col]))
                .collect();
            let norm = weighted.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
            for (col, w) in weighted {
                indices.push(col);
                data.push(if norm > 0.0 { w / norm } else { w });
            }
            indptr.push(indices.len());
        }

        CsMat::new((documents.len(), self.num_features()), indptr, indices, data)
    }

    pub fn save(&self, dir: &Path) -> PipelineResult<std::path::PathBuf> {
        let path = dir.join(VECTORIZER_FILE);
        fs::write(&path, serde_json::to_string(self)?)?;
        Ok(path)
    }

    pub fn load(dir: &Path) -> PipelineResult<Self> {
        let path = dir.join(VECTORIZER_FILE);
        let raw  = fs::read_to_string(&path).map_err(|_| PipelineError::model_load(&path))?;
        let v: Self = serde_json::from_str(&raw).map_err(|e| {
            tracing::error!("Cannot parse '{}': {}", path.display(), e);
            PipelineError::model_load(&path)
        })?;
        if v.idf.len() != v.vocabulary.len() {
            return Err(PipelineError::model_load(&path));
        }
        Ok(v)
    }
}

/// Lowercased word tokens expanded into the requested n-grams.
fn analyze(text: &str, (lo, hi): (usize, usize)) -> Vec<String> {
    let lower  = text.to_lowercase();
    let tokens: Vec<&str> = TOKEN.find_iter(&lower).map(|m| m.as_str()).collect();

    let mut out = Vec::new();
    for n in lo..=hi {
        if n == 1 {
            out.extend(tokens.iter().map(|t| t.to_string()));
        } else {
            out.extend(tokens.windows(n).map(|w| w.join(" ")));
        }
    }
    out
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn docs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_analyze_unigrams_and_bigrams() {
        let t = analyze("Multiple Sclerosis, a trial", (1, 2));
        assert_eq!(t, vec!["multiple", "sclerosis", "trial", "multiple sclerosis", "sclerosis trial"]);
    }

    #[test]
    fn test_min_df_and_max_df_prune() {
        let d = docs(&[
            "common sclerosis relapse",
            "common sclerosis lesion",
            "common parking",
            "common menu",
        ]);
        let params = TfidfParams { ngram_range: (1, 1), ..TfidfParams::default() };
        let v = TfidfVectorizer::fit(&d, &params).unwrap();
        // "common" is in every document (> 95%), singletons fail min_df=2
        assert_eq!(v.vocabulary.keys().collect::<Vec<_>>(), vec!["sclerosis"]);
    }

    #[test]
    fn test_falls_back_to_min_df_one() {
        let d = docs(&["alpha beta", "gamma delta"]);
        let v = TfidfVectorizer::fit(&d, &TfidfParams::default()).unwrap();
        assert!(v.vocabulary.contains_key("alpha beta"));
        assert_eq!(v.params.min_df, 2);
    }

    #[test]
    fn test_rows_are_l2_normalised() {
        let d = docs(&["sclerosis relapse relapse", "sclerosis lesion", "lesion relapse"]);
        let params = TfidfParams { min_df: 1, ngram_range: (1, 1), ..TfidfParams::default() };
        let v = TfidfVectorizer::fit(&d, &params).unwrap();
        let x = v.transform(&d);
        assert_eq!(x.shape(), (3, v.num_features()));
        for row in x.outer_iterator() {
            let norm: f32 = row.iter().map(|(_, w)| w * w).sum();
            assert!((norm - 1.0).abs() < 1e-5);
        }
        let empty = v.transform(&docs(&["unrelated words only"]));
        assert_eq!(empty.nnz(), 0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let d = docs(&["sclerosis relapse", "sclerosis lesion"]);
        let v = TfidfVectorizer::fit(&d, &TfidfParams::default()).unwrap();
        let tmp = TempDir::new().unwrap();
        v.save(tmp.path()).unwrap();
        let back = TfidfVectorizer::load(tmp.path()).unwrap();
        assert_eq!(back.vocabulary, v.vocabulary);
        assert_eq!(back.transform(&d), v.transform(&d));
    }
}
