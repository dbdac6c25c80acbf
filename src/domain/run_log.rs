use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::algorithm::Algorithm;

/// Longest error text kept on a run-log entry.
pub const MAX_ERROR_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    Train,
    Predict,
}

/// One audit row per (team, subject, algorithm) unit of work.
/// Created with `success = None`, completed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub id:            u64,
    pub team:          String,
    pub subject:       String,
    pub algorithm:     Algorithm,
    pub run_type:      RunType,
    pub model_version: Option<String>,
    pub success:       Option<bool>,
    pub started_at:    DateTime<Utc>,
    pub finished_at:   Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl RunLogEntry {
    pub fn start(team: &str, subject: &str, algorithm: Algorithm, run_type: RunType) -> Self {
        Self {
            id: 0,
            team: team.to_string(),
            subject: subject.to_string(),
            algorithm,
            run_type,
            model_version: None,
            success: None,
            started_at: Utc::now(),
            finished_at: None,
            error_message: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.success.is_some()
    }
}

/// Cut an error message down to `MAX_ERROR_CHARS` characters,
/// never splitting a UTF-8 sequence.
pub fn truncate_error(msg: &str) -> String {
    match msg.char_indices().nth(MAX_ERROR_CHARS) {
        Some((byte_idx, _)) => msg[..byte_idx].to_string(),
        None => msg.to_string(),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_error_caps_length() {
        let long = "é".repeat(MAX_ERROR_CHARS + 50);
        let cut  = truncate_error(&long);
        assert_eq!(cut.chars().count(), MAX_ERROR_CHARS);
        assert_eq!(truncate_error("short"), "short");
    }

    #[test]
    fn test_new_entry_is_pending() {
        let e = RunLogEntry::start("t", "s", Algorithm::Recurrent, RunType::Train);
        assert!(!e.is_finished());
        assert!(e.finished_at.is_none());
    }
}
