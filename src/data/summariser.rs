// ============================================================
// Layer 4 — Summariser
// ============================================================
// Condenses long abstracts before they are cleaned and gated.
//
// The default implementation is extractive: keep the leading
// sentences up to a word budget. It is created once per process
// on first use (shared_summariser) and handed out as an Arc, so
// callers that want a different one just pass their own.
//
// summarise_bulk works in batches of BULK_BATCH_SIZE. In parallel
// mode batches fan out over rayon; otherwise they run one after
// another. Every result is written to the index of its input, so
// both modes return identical vectors.

use std::sync::{Arc, OnceLock};

use rayon::prelude::*;

use crate::domain::traits::Summariser;

pub const BULK_BATCH_SIZE: usize = 4;

/// Keeps whole leading sentences until `max_words` is reached.
#[derive(Debug, Clone)]
pub struct LeadSentenceSummariser {
    pub max_sentences: usize,
    pub max_words:     usize,
}

impl Default for LeadSentenceSummariser {
    fn default() -> Self {
        Self { max_sentences: 3, max_words: 80 }
    }
}

impl Summariser for LeadSentenceSummariser {
    fn summarise(&self, text: &str) -> String {
        let mut out   = Vec::new();
        let mut words = 0usize;
        for sentence in split_sentences(text).into_iter().take(self.max_sentences) {
            let n = sentence.split_whitespace().count();
            if words > 0 && words + n > self.max_words {
                break;
            }
            words += n;
            out.push(sentence);
        }
        out.join(" ")
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        let at_boundary = matches!(b, b'.' | b'!' | b'?')
            && bytes.get(i + 1).map_or(true, |n| n.is_ascii_whitespace());
        if at_boundary {
            let s = text[start..=i].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = i + 1;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

static SHARED: OnceLock<Arc<dyn Summariser>> = OnceLock::new();

/// Process-wide default summariser, built on first call.
pub fn shared_summariser() -> Arc<dyn Summariser> {
    SHARED
        .get_or_init(|| {
            tracing::info!("Initialising shared summariser");
            Arc::new(LeadSentenceSummariser::default())
        })
        .clone()
}

/// Summarise every text, preserving input order. Empty inputs map to "".
pub fn summarise_bulk(summariser: &dyn Summariser, texts: &[String], parallel: bool) -> Vec<String> {
    let mut out = vec![String::new(); texts.len()];

    let run_batch = |batch_idx: usize, batch: &[String]| -> Vec<(usize, String)> {
        batch
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let idx = batch_idx * BULK_BATCH_SIZE + i;
                let s = if t.trim().is_empty() { String::new() } else { summariser.summarise(t) };
                (idx, s)
            })
            .collect()
    };

    let results: Vec<(usize, String)> = if parallel {
        texts
            .par_chunks(BULK_BATCH_SIZE)
            .enumerate()
            .flat_map_iter(|(b, batch)| run_batch(b, batch))
            .collect()
    } else {
        texts
            .chunks(BULK_BATCH_SIZE)
            .enumerate()
            .flat_map(|(b, batch)| run_batch(b, batch))
            .collect()
    };

    for (idx, summary) in results {
        out[idx] = summary;
    }
    out
}
