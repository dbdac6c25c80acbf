use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::algorithm::Algorithm;

/// Uniqueness key of a stored prediction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PredictionKey {
    pub article_id:    u64,
    pub subject:       String,
    pub algorithm:     Algorithm,
    pub model_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub article_id:    u64,
    pub team:          String,
    pub subject:       String,
    pub algorithm:     Algorithm,
    pub model_version: String,
    pub probability:   f32,
    pub relevant:      bool,
    pub created_at:    DateTime<Utc>,
}

impl PredictionRecord {
    pub fn key(&self) -> PredictionKey {
        PredictionKey {
            article_id:    self.article_id,
            subject:       self.subject.clone(),
            algorithm:     self.algorithm,
            model_version: self.model_version.clone(),
        }
    }
}
