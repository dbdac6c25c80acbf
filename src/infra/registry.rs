// ============================================================
// Layer 6 — Model Registry
// ============================================================
// Owns the on-disk artifact tree:
//
//   models/
//     <team_slug>/
//       <subject_slug>/
//         <algorithm>/
//           20250301/          ← one immutable version
//             <artifact files>   (algorithm specific)
//             hyperparameters.json
//             metrics.json       (val_* / test_* keys)
//           20250301_02/       ← second run on the same day
//
// "Latest" is the lexicographically greatest version name, so
// names are minted as YYYYMMDD and then YYYYMMDD_02, _03, …
// which sort in creation order.
//
// A version is written into a hidden staging directory first and
// renamed into place once every file is on disk, so a crashed run
// never leaves a half-written version for `latest` to pick up.
// Loading still checks every expected file and fails with
// ModelLoad naming the first one that is missing.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::domain::{
    algorithm::Algorithm,
    error::{PipelineError, PipelineResult},
    traits::TextClassifier,
};
use crate::infra::metrics::MetricsRecord;

pub const METRICS_FILE:     &str = "metrics.json";
pub const HYPERPARAMS_FILE: &str = "hyperparameters.json";
const MAX_DAILY_VERSIONS: usize = 99;

/// Identifies one model lineage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub team:      String,
    pub subject:   String,
    pub algorithm: Algorithm,
}

impl ModelKey {
    pub fn new(team: &str, subject: &str, algorithm: Algorithm) -> Self {
        Self { team: team.to_string(), subject: subject.to_string(), algorithm }
    }
}

/// What one successful save produced.
#[derive(Debug, Clone, Serialize)]
pub struct TrainedModelArtifact {
    pub team_slug:    String,
    pub subject_slug: String,
    pub algorithm:    Algorithm,
    pub version:      String,
    pub dir:          PathBuf,
    pub files:        Vec<PathBuf>,
    pub metrics:      std::collections::BTreeMap<String, serde_json::Value>,
    pub created_at:   DateTime<Utc>,
}

pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `models/<team>/<subject>/<algorithm>`
    pub fn base_path(&self, key: &ModelKey) -> PathBuf {
        self.root.join(&key.team).join(&key.subject).join(key.algorithm.as_str())
    }

    pub fn version_dir(&self, key: &ModelKey, version: &str) -> PathBuf {
        self.base_path(key).join(version)
    }

    /// Version name the next save would use, without touching disk.
    pub fn plan_version(&self, key: &ModelKey, explicit: Option<&str>, today: NaiveDate) -> PipelineResult<String> {
        match explicit {
            Some(v) => {
                validate_version_name(v)?;
                Ok(v.to_string())
            }
            None => next_version_name(&self.base_path(key), today),
        }
    }

    /// Persist a trained model under a fresh (or the explicit) version.
    pub fn save(
        &self,
        key:      &ModelKey,
        explicit: Option<&str>,
        trainer:  &dyn TextClassifier,
        metrics:  &MetricsRecord,
        today:    NaiveDate,
    ) -> PipelineResult<TrainedModelArtifact> {
        let base    = self.base_path(key);
        let version = self.plan_version(key, explicit, today)?;
        fs::create_dir_all(&base)?;

        // ── Step 1: write everything into a staging dir ──────────────────────
        let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(&base)?;
        let mut files = trainer.save(staging.path())?;

        let hp_path = staging.path().join(HYPERPARAMS_FILE);
        fs::write(&hp_path, serde_json::to_string_pretty(&trainer.hyperparameters())?)?;
        files.push(hp_path);

        let metrics_path = staging.path().join(METRICS_FILE);
        metrics.write(&metrics_path)?;
        files.push(metrics_path);

        // ── Step 2: move into place ──────────────────────────────────────────
        let final_dir = base.join(&version);
        if final_dir.exists() {
            tracing::warn!("Overwriting existing model version '{}'", final_dir.display());
            fs::remove_dir_all(&final_dir)?;
        }
        // Past this point the staging dir is ours to move or clean up.
        let staged = staging.keep();
        if let Err(e) = fs::rename(&staged, &final_dir) {
            if let Err(cleanup) = fs::remove_dir_all(&staged) {
                tracing::warn!("Cannot remove staging dir '{}': {}", staged.display(), cleanup);
            }
            return Err(e.into());
        }

        let files = files
            .iter()
            .filter_map(|p| p.file_name().map(|n| final_dir.join(n)))
            .collect();

        tracing::info!("Saved {} model version {} to '{}'", key.algorithm, version, final_dir.display());
        Ok(TrainedModelArtifact {
            team_slug:    key.team.clone(),
            subject_slug: key.subject.clone(),
            algorithm:    key.algorithm,
            version,
            dir:          final_dir,
            files,
            metrics:      metrics.as_map().clone(),
            created_at:   Utc::now(),
        })
    }

    /// Resolve a version, verify the directory is complete, and load
    /// it into `trainer`. Returns the version that was loaded.
    pub fn load_into(
        &self,
        key:      &ModelKey,
        explicit: Option<&str>,
        trainer:  &mut dyn TextClassifier,
    ) -> PipelineResult<String> {
        let base    = self.base_path(key);
        let version = resolve_version(&base, explicit)?;
        let dir     = base.join(&version);
        verify_artifacts(&dir, key.algorithm)?;
        trainer.load(&dir)?;
        tracing::info!("Loaded {} version {} from '{}'", key.algorithm, version, dir.display());
        Ok(version)
    }

    pub fn read_metrics(&self, key: &ModelKey, version: &str) -> PipelineResult<MetricsRecord> {
        let path = self.version_dir(key, version).join(METRICS_FILE);
        if !path.is_file() {
            return Err(PipelineError::model_load(path));
        }
        MetricsRecord::read(&path)
    }
}

// ─── Version helpers ──────────────────────────────────────────────────────────

/// Version directory names under `base`, sorted ascending.
/// A missing base directory has no versions.
pub fn list_versions(base: &Path) -> PipelineResult<Vec<String>> {
    if !base.is_dir() {
        return Ok(Vec::new());
    }
    let mut versions = Vec::new();
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                versions.push(name.to_string());
            }
        }
    }
    versions.sort();
    Ok(versions)
}

/// Explicit version must exist; otherwise the greatest name wins.
pub fn resolve_version(base: &Path, explicit: Option<&str>) -> PipelineResult<String> {
    let versions = list_versions(base)?;
    match explicit {
        Some(v) => {
            if versions.iter().any(|x| x == v) {
                Ok(v.to_string())
            } else {
                Err(PipelineError::VersionNotFound { version: v.to_string(), base: base.to_path_buf() })
            }
        }
        None => versions
            .into_iter()
            .next_back()
            .ok_or_else(|| PipelineError::NoVersions { base: base.to_path_buf() }),
    }
}

/// `YYYYMMDD` if free, else the first free `YYYYMMDD_NN` from 02.
pub fn next_version_name(base: &Path, today: NaiveDate) -> PipelineResult<String> {
    let existing = list_versions(base)?;
    let stem     = today.format("%Y%m%d").to_string();
    if !existing.contains(&stem) {
        return Ok(stem);
    }
    (2..=MAX_DAILY_VERSIONS)
        .map(|n| format!("{stem}_{n:02}"))
        .find(|candidate| !existing.contains(candidate))
        .ok_or_else(|| PipelineError::data(format!(
            "more than {MAX_DAILY_VERSIONS} versions for {stem} under '{}'", base.display()
        )))
}

/// Every artifact the algorithm needs, plus metrics.json, must exist.
pub fn verify_artifacts(dir: &Path, algorithm: Algorithm) -> PipelineResult<()> {
    for name in algorithm.artifact_files().iter().chain(std::iter::once(&METRICS_FILE)) {
        let path = dir.join(name);
        if !path.is_file() {
            return Err(PipelineError::model_load(path));
        }
    }
    Ok(())
}

fn validate_version_name(v: &str) -> PipelineResult<()> {
    let ok = !v.is_empty()
        && !v.starts_with('.')
        && v.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(PipelineError::data(format!("invalid model version name '{v}'")))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::TrainingHistory;
    use rstest::rstest;
    use tempfile::TempDir;

    fn base_with(versions: &[&str]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for v in versions {
            fs::create_dir_all(tmp.path().join(v)).unwrap();
        }
        tmp
    }

    #[rstest]
    #[case(None, Some("20250301"))]
    #[case(Some("20250215"), Some("20250215"))]
    #[case(Some("20251231"), None)]
    fn test_resolve_version(#[case] explicit: Option<&str>, #[case] expected: Option<&str>) {
        let tmp = base_with(&["20250101", "20250215", "20250301"]);
        let got = resolve_version(tmp.path(), explicit);
        match expected {
            Some(v) => assert_eq!(got.unwrap(), v),
            None    => assert!(matches!(got, Err(PipelineError::VersionNotFound { .. }))),
        }
    }

    #[test]
    fn test_resolve_empty_base_fails() {
        let tmp = base_with(&[]);
        assert!(matches!(resolve_version(tmp.path(), None), Err(PipelineError::NoVersions { .. })));
        let missing = tmp.path().join("nope");
        assert!(matches!(resolve_version(&missing, None), Err(PipelineError::NoVersions { .. })));
    }

    #[test]
    fn test_staging_dirs_are_not_versions() {
        let tmp = base_with(&["20250101", ".staging-abc"]);
        assert_eq!(list_versions(tmp.path()).unwrap(), vec!["20250101"]);
    }

    #[test]
    fn test_version_minting_sorts_chronologically() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let tmp = base_with(&[]);
        assert_eq!(next_version_name(tmp.path(), day).unwrap(), "20250301");

        fs::create_dir_all(tmp.path().join("20250301")).unwrap();
        assert_eq!(next_version_name(tmp.path(), day).unwrap(), "20250301_02");

        fs::create_dir_all(tmp.path().join("20250301_02")).unwrap();
        fs::create_dir_all(tmp.path().join("20250228")).unwrap();
        let third = next_version_name(tmp.path(), day).unwrap();
        assert_eq!(third, "20250301_03");
        fs::create_dir_all(tmp.path().join(&third)).unwrap();
        assert_eq!(resolve_version(tmp.path(), None).unwrap(), "20250301_03");
    }

    #[test]
    fn test_partial_directory_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("gbdt_model.json"), "{}").unwrap();
        fs::write(tmp.path().join(METRICS_FILE), "{}").unwrap();
        let err = verify_artifacts(tmp.path(), Algorithm::GbdtTfidf).unwrap_err();
        match err {
            PipelineError::ModelLoad { path } => assert!(path.ends_with("tfidf_vectorizer.json")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_invalid_explicit_version_rejected() {
        let tmp = TempDir::new().unwrap();
        let reg = ModelRegistry::new(tmp.path());
        let key = ModelKey::new("t", "s", Algorithm::Recurrent);
        let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(reg.plan_version(&key, Some("../escape"), day).is_err());
        assert_eq!(reg.plan_version(&key, Some("v2"), day).unwrap(), "v2");
    }

    // ── save / load through the registry with a stub classifier ─────────────

    struct Stub {
        loaded_from: Option<PathBuf>,
    }

    impl TextClassifier for Stub {
        fn algorithm(&self) -> Algorithm { Algorithm::GbdtTfidf }
        fn train(&mut self, _: &[String], _: &[bool], _: &[String], _: &[bool], _: usize, _: usize)
            -> PipelineResult<TrainingHistory> { Ok(TrainingHistory::default()) }
        fn predict_proba(&self, texts: &[String]) -> PipelineResult<Vec<f32>> { Ok(vec![0.5; texts.len()]) }
        fn save(&self, dir: &Path) -> PipelineResult<Vec<PathBuf>> {
            let mut out = Vec::new();
            for name in Algorithm::GbdtTfidf.artifact_files() {
                let p = dir.join(name);
                fs::write(&p, "{}")?;
                out.push(p);
            }
            Ok(out)
        }
        fn load(&mut self, dir: &Path) -> PipelineResult<()> {
            self.loaded_from = Some(dir.to_path_buf());
            Ok(())
        }
        fn hyperparameters(&self) -> serde_json::Value { serde_json::json!({"rounds": 100}) }
    }

    #[test]
    fn test_save_then_load_latest() {
        let tmp = TempDir::new().unwrap();
        let reg = ModelRegistry::new(tmp.path());
        let key = ModelKey::new("neuro", "ms", Algorithm::GbdtTfidf);
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        let mut metrics = MetricsRecord::new();
        metrics.insert_f64("val_accuracy", 0.8);
        metrics.insert_f64("test_accuracy", 0.7);

        let first  = reg.save(&key, None, &Stub { loaded_from: None }, &metrics, day).unwrap();
        let second = reg.save(&key, None, &Stub { loaded_from: None }, &metrics, day).unwrap();
        assert_eq!(first.version, "20250301");
        assert_eq!(second.version, "20250301_02");
        assert!(second.dir.join(HYPERPARAMS_FILE).is_file());
        assert_eq!(list_versions(&reg.base_path(&key)).unwrap().len(), 2);

        let mut stub = Stub { loaded_from: None };
        let version  = reg.load_into(&key, None, &mut stub).unwrap();
        assert_eq!(version, "20250301_02");
        assert_eq!(stub.loaded_from.unwrap(), second.dir);
        assert_eq!(reg.read_metrics(&key, &version).unwrap().get_f64("test_accuracy"), Some(0.7));
    }

    #[test]
    fn test_explicit_version_overwrites() {
        let tmp = TempDir::new().unwrap();
        let reg = ModelRegistry::new(tmp.path());
        let key = ModelKey::new("neuro", "ms", Algorithm::GbdtTfidf);
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        let mut m = MetricsRecord::new();
        m.insert_f64("val_accuracy", 0.5);
        reg.save(&key, Some("release"), &Stub { loaded_from: None }, &m, day).unwrap();
        m.insert_f64("val_accuracy", 0.9);
        reg.save(&key, Some("release"), &Stub { loaded_from: None }, &m, day).unwrap();

        assert_eq!(list_versions(&reg.base_path(&key)).unwrap(), vec!["release"]);
        assert_eq!(reg.read_metrics(&key, "release").unwrap().get_f64("val_accuracy"), Some(0.9));
    }

    #[test]
    fn test_save_leaves_only_the_version_dir() {
        let tmp = TempDir::new().unwrap();
        let reg = ModelRegistry::new(tmp.path());
        let key = ModelKey::new("neuro", "ms", Algorithm::GbdtTfidf);
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        let saved = reg.save(&key, None, &Stub { loaded_from: None }, &MetricsRecord::new(), day).unwrap();
        assert!(saved.dir.is_dir());
        for f in &saved.files {
            assert!(f.is_file(), "{}", f.display());
        }

        let names: Vec<String> = std::fs::read_dir(reg.base_path(&key))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["20250301".to_string()]);
    }
}
