use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::domain::error::PipelineError;

/// The three classifier families the pipeline can train.
/// The string tags are the on-disk directory names, so they never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "pubmed_bert")]
    Transformer,
    #[serde(rename = "lgbm_tfidf")]
    GbdtTfidf,
    #[serde(rename = "lstm")]
    Recurrent,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Transformer, Algorithm::GbdtTfidf, Algorithm::Recurrent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Transformer => "pubmed_bert",
            Algorithm::GbdtTfidf   => "lgbm_tfidf",
            Algorithm::Recurrent   => "lstm",
        }
    }

    /// Files a version directory must contain before a trainer of this
    /// family may be loaded from it.
    pub fn artifact_files(&self) -> &'static [&'static str] {
        match self {
            Algorithm::Transformer => &["transformer_weights.mpk", "transformer_config.json", "tokenizer.json"],
            Algorithm::GbdtTfidf   => &["gbdt_model.json", "tfidf_vectorizer.json"],
            Algorithm::Recurrent   => &["lstm_weights.mpk", "lstm_config.json", "tokenizer.json"],
        }
    }

    /// Parse a comma separated list such as `"lstm,lgbm_tfidf"`.
    /// Duplicates are dropped, order of first appearance is kept.
    pub fn parse_list(list: &str) -> Result<Vec<Algorithm>, PipelineError> {
        let mut out = Vec::new();
        for tag in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let algo: Algorithm = tag.parse()?;
            if !out.contains(&algo) {
                out.push(algo);
            }
        }
        if out.is_empty() {
            return Err(PipelineError::UnsupportedAlgorithm(list.to_string()));
        }
        Ok(out)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pubmed_bert" => Ok(Algorithm::Transformer),
            "lgbm_tfidf"  => Ok(Algorithm::GbdtTfidf),
            "lstm"        => Ok(Algorithm::Recurrent),
            other         => Err(PipelineError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for algo in Algorithm::ALL {
            assert_eq!(algo.as_str().parse::<Algorithm>().unwrap(), algo);
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = "svm".parse::<Algorithm>().unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedAlgorithm(ref t) if t == "svm"));
    }

    #[test]
    fn test_parse_list_dedups() {
        let algos = Algorithm::parse_list("lstm, lgbm_tfidf,lstm").unwrap();
        assert_eq!(algos, vec![Algorithm::Recurrent, Algorithm::GbdtTfidf]);
        assert!(Algorithm::parse_list(" , ").is_err());
    }

    #[test]
    fn test_serde_uses_tags() {
        let json = serde_json::to_string(&Algorithm::GbdtTfidf).unwrap();
        assert_eq!(json, "\"lgbm_tfidf\"");
    }
}
