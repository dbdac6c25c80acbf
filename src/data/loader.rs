// ============================================================
// Layer 4 — Article Loader
// ============================================================
// Reads article rows from a directory tree:
//
//   <data_dir>/
//     <team_slug>/
//       <subject_slug>/
//         articles.jsonl    ← one JSON ArticleRow per line
//
// A line that fails to parse is skipped and counted.

use anyhow::{Context, Result};
use std::{
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::domain::article::ArticleRow;
use crate::domain::traits::{ArticleSource, LoadedRows};

pub const ARTICLES_FILE: &str = "articles.jsonl";

/// File-backed implementation of ArticleSource.
pub struct JsonlArticleSource {
    root: PathBuf,
}

impl JsonlArticleSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArticleSource for JsonlArticleSource {
    fn teams(&self) -> Result<Vec<String>> {
        sorted_subdirs(&self.root, |_| true)
    }

    fn subjects(&self, team: &str) -> Result<Vec<String>> {
        let team_dir = self.root.join(team);
        sorted_subdirs(&team_dir, |p| p.join(ARTICLES_FILE).is_file())
    }

    fn load_rows(&self, team: &str, subject: &str) -> Result<LoadedRows> {
        let path = self.root.join(team).join(subject).join(ARTICLES_FILE);
        let file = fs::File::open(&path)
            .with_context(|| format!("Cannot open '{}'", path.display()))?;

        let mut loaded = LoadedRows::default();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Cannot read '{}'", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ArticleRow>(&line) {
                Ok(row) => loaded.rows.push(row),
                Err(e) => {
                    tracing::warn!("Skipping malformed row {}:{}: {}", path.display(), line_no + 1, e);
                    loaded.malformed += 1;
                }
            }
        }

        tracing::debug!(
            "Loaded {} rows ({} malformed) from '{}'",
            loaded.rows.len(),
            loaded.malformed,
            path.display()
        );
        Ok(loaded)
    }
}

/// Directory names under `dir` accepted by `keep`, sorted.
fn sorted_subdirs(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<String>> {
    if !dir.is_dir() {
        anyhow::bail!("Directory '{}' does not exist", dir.display());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot read directory '{}'", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() && keep(&path) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
