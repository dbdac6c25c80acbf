// ============================================================
// Layer 4 — Text Preprocessor
// ============================================================
// Turns an article's title + summary into model input.
//
// Cleaning steps (applied in order):
//   1. Strip HTML tags and decode the common entities
//   2. Map Unicode whitespace / control characters to spaces
//   3. Lowercase, drop DOI and PMID references
//   4. Replace separator punctuation with spaces
//   5. Delete anything outside [0-9a-z #+_]
//   6. Remove English stopwords, collapse whitespace
//
// After cleaning, rows with fewer than MIN_WORD_COUNT words are
// dropped by the dataset assembler: very short texts give the
// TF-IDF and neural paths almost nothing to work with.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Quality gate applied after cleaning.
pub const MIN_WORD_COUNT: usize = 10;

static HTML_TAG:   LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));
static DOI_REF:    LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://(?:dx\.)?doi\.org/\S+|doi:\s*10\.\S+|\b10\.\d{4,9}/\S+)").expect("static regex")
});
static PMID_REF:   LazyLock<Regex> = LazyLock::new(|| Regex::new(r"pmid:?\s*\d+").expect("static regex"));
static REPLACE_BY_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[/(){}\[\]|@,;]").expect("static regex"));
static BAD_SYMBOLS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9a-z #+_]").expect("static regex"));

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| ENGLISH_STOPWORDS.iter().copied().collect());

const ENGLISH_STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your", "yours",
    "yourself", "yourselves", "he", "him", "his", "himself", "she", "her", "hers", "herself",
    "it", "its", "itself", "they", "them", "their", "theirs", "themselves", "what", "which",
    "who", "whom", "this", "that", "these", "those", "am", "is", "are", "was", "were", "be",
    "been", "being", "have", "has", "had", "having", "do", "does", "did", "doing", "a", "an",
    "the", "and", "but", "if", "or", "because", "as", "until", "while", "of", "at", "by",
    "for", "with", "about", "against", "between", "into", "through", "during", "before",
    "after", "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over",
    "under", "again", "further", "then", "once", "here", "there", "when", "where", "why",
    "how", "all", "any", "both", "each", "few", "more", "most", "other", "some", "such", "no",
    "nor", "not", "only", "own", "same", "so", "than", "too", "very", "s", "t", "can", "will",
    "just", "don", "should", "now", "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren",
    "couldn", "didn", "doesn", "hadn", "hasn", "haven", "isn", "ma", "mightn", "mustn",
    "needn", "shan", "shouldn", "wasn", "weren", "won", "wouldn",
];

#[derive(Debug, Clone, Default)]
pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Remove markup, keeping the text between tags.
    pub fn strip_html(&self, text: &str) -> String {
        let stripped = HTML_TAG.replace_all(text, " ");
        stripped
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&")
    }

    /// Single-spaced, trimmed, with invisible characters removed.
    pub fn normalize_whitespace(&self, text: &str) -> String {
        let mapped: String = text
            .chars()
            .map(|c| match c {
                '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                c if c.is_control() || c.is_whitespace() => ' ',
                c => c,
            })
            .collect();
        mapped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// HTML stripping plus whitespace normalisation. Case and
    /// punctuation are kept, which is what the summariser wants.
    pub fn clean_html(&self, text: &str) -> String {
        self.normalize_whitespace(&self.strip_html(text))
    }

    /// Full cleaning pipeline producing model input.
    pub fn clean_text(&self, text: &str) -> String {
        // ── Step 1: markup and whitespace ────────────────────────────────────
        let text = self.clean_html(text).to_lowercase();

        // ── Step 2: reference noise ──────────────────────────────────────────
        let text = DOI_REF.replace_all(&text, " ");
        let text = PMID_REF.replace_all(&text, " ");

        // ── Step 3: punctuation ──────────────────────────────────────────────
        let text = REPLACE_BY_SPACE.replace_all(&text, " ");
        let text = BAD_SYMBOLS.replace_all(&text, "");

        // ── Step 4: stopwords ────────────────────────────────────────────────
        text.split_whitespace()
            .filter(|w| !STOPWORDS.contains(w))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn word_count(&self, cleaned: &str) -> usize {
        cleaned.split_whitespace().count()
    }

    pub fn passes_quality_gate(&self, cleaned: &str) -> bool {
        self.word_count(cleaned) >= MIN_WORD_COUNT
    }
}
