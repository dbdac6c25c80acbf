// ============================================================
// Layer 6 — Run Log Store
// ============================================================
// Append-only audit trail, one entry per unit of work.
//
//   JsonRunLog    <models_dir>/run_log.json, rewritten through
//                 a temp file in the same directory and renamed
//                 over the old file
//   MemoryRunLog  dry runs and tests
//
// Entries are never deleted. `finish` may be called once per id;
// the error text is cut to MAX_ERROR_CHARS.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;

use crate::domain::{
    error::{PipelineError, PipelineResult},
    run_log::{truncate_error, RunLogEntry},
    traits::{RunLogStore, RunOutcome},
};

pub const RUN_LOG_FILE: &str = "run_log.json";

// ─── Shared entry bookkeeping ─────────────────────────────────────────────────
fn push_entry(entries: &mut Vec<RunLogEntry>, mut entry: RunLogEntry) -> u64 {
    let id = entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
    entry.id = id;
    entry.success = None;
    entry.finished_at = None;
    entries.push(entry);
    id
}

fn complete_entry(entries: &mut [RunLogEntry], id: u64, outcome: RunOutcome) -> PipelineResult<()> {
    let entry = entries
        .iter_mut()
        .find(|e| e.id == id)
        .ok_or_else(|| PipelineError::RunLog(format!("no run log entry with id {id}")))?;
    if entry.is_finished() {
        return Err(PipelineError::RunLog(format!("run log entry {id} is already finished")));
    }
    entry.success       = Some(outcome.success);
    entry.finished_at   = Some(Utc::now());
    entry.error_message = outcome.error.as_deref().map(truncate_error);
    if outcome.model_version.is_some() {
        entry.model_version = outcome.model_version;
    }
    Ok(())
}

// ─── JsonRunLog ───────────────────────────────────────────────────────────────
pub struct JsonRunLog {
    path: PathBuf,
}

impl JsonRunLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { path: dir.as_ref().join(RUN_LOG_FILE) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> PipelineResult<Vec<RunLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let json = fs::read_to_string(&self.path)?;
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&json)?)
    }

    fn write_all(&self, entries: &[RunLogEntry]) -> PipelineResult<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_json::to_string_pretty(entries)?.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| PipelineError::Io(e.error))?;
        Ok(())
    }
}

impl RunLogStore for JsonRunLog {
    fn start(&mut self, entry: RunLogEntry) -> PipelineResult<u64> {
        let mut entries = self.read_all()?;
        let id = push_entry(&mut entries, entry);
        self.write_all(&entries)?;
        Ok(id)
    }

    fn finish(&mut self, id: u64, outcome: RunOutcome) -> PipelineResult<()> {
        let mut entries = self.read_all()?;
        complete_entry(&mut entries, id, outcome)?;
        self.write_all(&entries)
    }

    fn entries(&self) -> PipelineResult<Vec<RunLogEntry>> {
        self.read_all()
    }
}

// ─── MemoryRunLog ─────────────────────────────────────────────────────────────
#[derive(Debug, Default)]
pub struct MemoryRunLog {
    entries: Vec<RunLogEntry>,
}

impl MemoryRunLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunLogStore for MemoryRunLog {
    fn start(&mut self, entry: RunLogEntry) -> PipelineResult<u64> {
        Ok(push_entry(&mut self.entries, entry))
    }

    fn finish(&mut self, id: u64, outcome: RunOutcome) -> PipelineResult<()> {
        complete_entry(&mut self.entries, id, outcome)
    }

    fn entries(&self) -> PipelineResult<Vec<RunLogEntry>> {
        Ok(self.entries.clone())
    }
}
