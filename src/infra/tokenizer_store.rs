// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Builds, saves and loads the word-level tokenizer used by the
// transformer and LSTM trainers.
//
// The vocabulary is counted from the (already cleaned) training
// texts and written as a HuggingFace tokenizer JSON, which is
// then parsed back into a tokenizers::Tokenizer. Ties in word
// frequency are broken alphabetically so the same corpus always
// yields the same ids.
//
//   id 0  [PAD]
//   id 1  [UNK]
//   id 2… most frequent words first

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokenizers::Tokenizer;

use crate::domain::error::{PipelineError, PipelineResult};

pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(TOKENIZER_FILE)
    }

    pub fn load(&self) -> PipelineResult<Tokenizer> {
        let path = self.path();
        if !path.is_file() {
            return Err(PipelineError::model_load(path));
        }
        Tokenizer::from_file(&path).map_err(|e| PipelineError::Tokenizer(format!(
            "cannot load tokenizer from '{}': {e}", path.display()
        )))
    }

    pub fn save(&self, tokenizer: &Tokenizer) -> PipelineResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path();
        tokenizer
            .save(&path, true)
            .map_err(|e| PipelineError::Tokenizer(format!("cannot write '{}': {e}", path.display())))?;
        Ok(path)
    }

    /// Build a word-level tokenizer over `texts`, keeping at most
    /// `max_tokens` entries including the two special tokens.
    pub fn build(texts: &[String], max_tokens: usize) -> PipelineResult<Tokenizer> {
        // ── Step 1: word frequencies ─────────────────────────────────────────
        let mut freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            for word in text.split_whitespace() {
                *freq.entry(word.to_lowercase()).or_insert(0) += 1;
            }
        }

        let mut words: Vec<(String, usize)> = freq.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(max_tokens.saturating_sub(2));

        // ── Step 2: vocab ────────────────────────────────────────────────────
        let mut vocab = serde_json::Map::new();
        vocab.insert(PAD_TOKEN.into(), 0.into());
        vocab.insert(UNK_TOKEN.into(), 1.into());
        for (i, (word, _)) in words.iter().enumerate() {
            vocab.insert(word.clone(), (i + 2).into());
        }

        // ── Step 3: HuggingFace JSON ─────────────────────────────────────────
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": 0, "content": PAD_TOKEN, "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 1, "content": UNK_TOKEN, "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": true
            },
            "pre_tokenizer": { "type": "WhitespaceSplit" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": UNK_TOKEN
            }
        });

        let tokenizer = Tokenizer::from_str(&tokenizer_json.to_string())
            .map_err(|e| PipelineError::Tokenizer(format!("cannot build tokenizer: {e}")))?;

        tracing::debug!("Tokenizer built with {} entries", words.len() + 2);
        Ok(tokenizer)
    }
}

/// Encode each text, truncated to `max_len` ids. Empty texts are a
/// data error: they would produce an all-padding row.
pub fn encode_texts(tokenizer: &Tokenizer, texts: &[String], max_len: usize) -> PipelineResult<Vec<Vec<u32>>> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            if text.trim().is_empty() {
                return Err(PipelineError::data(format!("text at position {i} is empty")));
            }
            let enc = tokenizer
                .encode(text.as_str(), false)
                .map_err(|e| PipelineError::Tokenizer(format!("tokenisation failed: {e}")))?;
            let mut ids = enc.get_ids().to_vec();
            ids.truncate(max_len);
            Ok(ids)
        })
        .collect()
}

/// Vocabulary size including special tokens.
pub fn vocab_size(tokenizer: &Tokenizer) -> usize {
    tokenizer.get_vocab_size(false)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus() -> Vec<String> {
        vec!["b cell depletion".into(), "b cell therapy".into(), "remyelination".into()]
    }

    #[test]
    fn test_frequent_words_get_low_ids() {
        let tok = TokenizerStore::build(&corpus(), 100).unwrap();
        let ids = encode_texts(&tok, &["b cell unknownword".to_string()], 10).unwrap();
        // "b" and "cell" tie at 2, broken alphabetically; unknown → [UNK]
        assert_eq!(ids[0], vec![2, 3, 1]);
        assert_eq!(vocab_size(&tok), 2 + 5);
    }

    #[test]
    fn test_max_tokens_caps_vocab() {
        let tok = TokenizerStore::build(&corpus(), 4).unwrap();
        assert_eq!(vocab_size(&tok), 4);
    }

    #[test]
    fn test_truncates_and_rejects_empty() {
        let tok = TokenizerStore::build(&corpus(), 100).unwrap();
        let ids = encode_texts(&tok, &["b cell therapy b cell".to_string()], 3).unwrap();
        assert_eq!(ids[0].len(), 3);
        assert!(matches!(encode_texts(&tok, &["  ".to_string()], 3), Err(PipelineError::Data(_))));
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp   = TempDir::new().unwrap();
        let store = TokenizerStore::new(tmp.path());
        assert!(matches!(store.load(), Err(PipelineError::ModelLoad { .. })));

        let tok = TokenizerStore::build(&corpus(), 100).unwrap();
        store.save(&tok).unwrap();
        let back = store.load().unwrap();
        let text = vec!["cell therapy remyelination".to_string()];
        assert_eq!(encode_texts(&tok, &text, 10).unwrap(), encode_texts(&back, &text, 10).unwrap());
    }
}
