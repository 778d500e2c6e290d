use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// State Structures
// ============================================================================

/// Job history, one record per target
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PatchbayState {
    /// Last time the state was updated
    pub last_updated: DateTime<Utc>,

    /// Last job on each target
    #[serde(default)]
    pub targets: BTreeMap<String, JobRecord>,
}

/// The most recent job started on a target
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub job_id: String,

    pub started_at: DateTime<Utc>,

    /// Set once the job's result was collected (or it failed for good)
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Summary or error of the finished job
    #[serde(default)]
    pub verdict: Option<String>,

    #[serde(default)]
    pub succeeded: bool,
}

impl JobRecord {
    /// Whether the job may still be running on the target
    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }
}

impl Default for PatchbayState {
    fn default() -> Self {
        Self {
            targets: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

// ============================================================================
// PatchbayState Implementation
// ============================================================================

impl PatchbayState {
    /// Get the state directory path (~/.local/state/patchbay)
    pub fn state_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".local").join("state").join("patchbay"))
    }

    fn state_file() -> Result<PathBuf> {
        Ok(Self::state_dir()?.join("state.toml"))
    }

    /// Load state from disk, or return default if file doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::state_file()?)
    }

    /// Save state to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::state_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file does not exist, using default state");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;

        let state: PatchbayState = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded state from {}", path.display());
        Ok(state)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let content = toml::to_string_pretty(&self).context("Failed to serialize state to TOML")?;

        fs::write(path, &content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    /// Update the last_updated timestamp and save
    pub fn touch(&mut self) -> Result<()> {
        self.last_updated = Utc::now();
        self.save()
    }

    // ========================================================================
    // Job Helpers
    // ========================================================================

    /// Last job on `target`
    pub fn last_job(&self, target: &str) -> Option<&JobRecord> {
        self.targets.get(target)
    }

    /// Record that `job_id` was started on `target`
    pub fn mark_started(&mut self, target: &str, job_id: &str) {
        self.targets.insert(
            target.to_string(),
            JobRecord {
                job_id: job_id.to_string(),
                started_at: Utc::now(),
                finished_at: None,
                verdict: None,
                succeeded: false,
            },
        );
    }

    /// Record the verdict of `job_id` on `target`
    pub fn mark_finished(&mut self, target: &str, job_id: &str, succeeded: bool, verdict: &str) {
        let record = self
            .targets
            .entry(target.to_string())
            .or_insert_with(|| JobRecord {
                job_id: job_id.to_string(),
                started_at: Utc::now(),
                finished_at: None,
                verdict: None,
                succeeded: false,
            });
        if record.job_id != job_id {
            record.job_id = job_id.to_string();
            record.started_at = Utc::now();
        }
        record.finished_at = Some(Utc::now());
        record.verdict = Some(verdict.to_string());
        record.succeeded = succeeded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = PatchbayState::load_from(&dir.path().join("state.toml")).unwrap();
        assert!(state.targets.is_empty());
    }

    #[test]
    fn test_job_lifecycle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.toml");

        let mut state = PatchbayState::default();
        state.mark_started("web01", "job-1");
        assert!(state.last_job("web01").unwrap().is_open());
        state.save_to(&path).unwrap();

        let mut loaded = PatchbayState::load_from(&path).unwrap();
        assert_eq!(loaded.last_job("web01"), state.last_job("web01"));

        loaded.mark_finished("web01", "job-1", true, "2 completed, 0 failed, 0 missing");
        let record = loaded.last_job("web01").unwrap();
        assert!(!record.is_open());
        assert!(record.succeeded);
        assert_eq!(record.job_id, "job-1");
    }

    #[test]
    fn test_finish_without_start() {
        let mut state = PatchbayState::default();
        state.mark_finished("lab", "job-9", false, "agent unreachable");
        let record = state.last_job("lab").unwrap();
        assert_eq!(record.job_id, "job-9");
        assert_eq!(record.verdict.as_deref(), Some("agent unreachable"));
        assert!(!record.succeeded);
    }
}
