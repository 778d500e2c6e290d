//! Core types for reconciliation jobs

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use unitrepo::PackageRef;

/// What an operation does to a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OperationKind {
    /// Unit is not installed and should be
    Install,
    /// Unit is installed and should not be
    Remove,
    /// Unit is installed at another version or variant
    Replace {
        /// The installed unit being replaced
        from: PackageRef,
    },
}

impl OperationKind {
    /// Short lowercase label ("install", "remove", "replace").
    pub fn label(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Remove => "remove",
            Self::Replace { .. } => "replace",
        }
    }
}

/// One unit of work for the remote agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Unit the operation applies to (the new unit for a replace)
    pub unit: PackageRef,
    /// What to do
    pub kind: OperationKind,
    /// Applied before every non-critical operation
    pub critical: bool,
    /// Position in the work order
    pub sequence: u32,
}

impl Operation {
    /// Install `unit`.
    pub fn install(unit: PackageRef) -> Self {
        Self::with_kind(unit, OperationKind::Install)
    }

    /// Remove `unit`.
    pub fn remove(unit: PackageRef) -> Self {
        Self::with_kind(unit, OperationKind::Remove)
    }

    /// Replace `from` with `unit`.
    pub fn replace(from: PackageRef, unit: PackageRef) -> Self {
        Self::with_kind(unit, OperationKind::Replace { from })
    }

    fn with_kind(unit: PackageRef, kind: OperationKind) -> Self {
        Self {
            unit,
            kind,
            critical: false,
            sequence: 0,
        }
    }

    /// Whether the operation ships a payload to the target.
    pub fn needs_content(&self) -> bool {
        !matches!(self.kind, OperationKind::Remove)
    }

    /// Check if this operation is a removal
    pub fn is_removal(&self) -> bool {
        matches!(self.kind, OperationKind::Remove)
    }

    /// Diff-style marker: `+` install, `-` remove, `~` replace.
    pub fn symbol(&self) -> char {
        match self.kind {
            OperationKind::Install => '+',
            OperationKind::Remove => '-',
            OperationKind::Replace { .. } => '~',
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperationKind::Replace { from } => {
                write!(f, "{} {} -> {}", self.symbol(), from, self.unit)
            }
            _ => write!(f, "{} {}", self.symbol(), self.unit),
        }
    }
}

/// An installed unit as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Installed unit
    #[serde(flatten)]
    pub unit: PackageRef,
    /// When the unit was installed, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
}

/// Installed units on a target, one entry per unit name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from units without install times.
    pub fn from_units(units: impl IntoIterator<Item = PackageRef>) -> Self {
        let mut manifest = Self::new();
        for unit in units {
            manifest.push(unit, None);
        }
        manifest
    }

    /// Record `unit`, replacing any entry with the same name in place.
    pub fn push(&mut self, unit: PackageRef, installed_at: Option<DateTime<Utc>>) {
        let entry = ManifestEntry { unit, installed_at };
        match self
            .entries
            .iter_mut()
            .find(|e| e.unit.same_unit(&entry.unit))
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Entries in recorded order
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Units in recorded order
    pub fn units(&self) -> Vec<PackageRef> {
        self.entries.iter().map(|e| e.unit.clone()).collect()
    }

    /// Entry for a unit name
    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.unit.name == name)
    }

    /// Units as a set, for identity comparisons
    pub fn unit_set(&self) -> BTreeSet<&PackageRef> {
        self.entries.iter().map(|e| &e.unit).collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the manifest is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply completed operations, stamping new entries with `at`.
    pub fn advance(&mut self, operations: &[Operation], at: DateTime<Utc>) {
        for op in operations {
            match &op.kind {
                OperationKind::Remove => {
                    self.entries.retain(|e| e.unit != op.unit);
                }
                OperationKind::Install | OperationKind::Replace { .. } => {
                    self.push(op.unit.clone(), Some(at));
                }
            }
        }
    }

    /// Serialize for storage on the target
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Remote(e.into()))
    }

    /// Parse a manifest read from the target
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_str(json).map_err(|e| Error::Remote(e.into()))
    }
}

/// Live reading of the remote agent's status flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// Commanded but the agent has not reported anything for this job yet
    Commanded,
    /// Agent is applying the work order
    Running,
    /// Agent announced a reboot
    Rebooting,
    /// Agent finished
    Stopped,
    /// The status query itself failed
    Unreachable,
}

impl AgentStatus {
    /// Parse the status flag written by the agent.
    ///
    /// The flag is `<state>` or `<state> <job_id>`. A flag tagged with a
    /// different job belongs to an earlier run and reads as
    /// [`AgentStatus::Commanded`].
    pub fn parse(flag: &str, job_id: &str) -> Self {
        let mut parts = flag.split_whitespace();
        let state = parts.next().unwrap_or_default().to_ascii_lowercase();
        if let Some(tag) = parts.next()
            && tag != job_id
        {
            return Self::Commanded;
        }

        match state.as_str() {
            "" | "commanded" | "pending" => Self::Commanded,
            "running" => Self::Running,
            "rebooting" => Self::Rebooting,
            "stopped" => Self::Stopped,
            other => {
                log::warn!("Unknown agent status '{}', assuming running", other);
                Self::Running
            }
        }
    }

    /// Lowercase label matching the wire form
    pub fn label(&self) -> &'static str {
        match self {
            Self::Commanded => "commanded",
            Self::Running => "running",
            Self::Rebooting => "rebooting",
            Self::Stopped => "stopped",
            Self::Unreachable => "unreachable",
        }
    }

    /// Status flag value for a job.
    pub fn flag(&self, job_id: &str) -> String {
        format!("{} {}", self.label(), job_id)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Per-operation status in the agent's result document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Applied successfully
    Completed,
    /// Agent tried and failed
    Failed,
    /// Agent chose not to run it
    Skipped,
    /// Agent never got to it
    Pending,
    /// No result entry at all
    NotInstalled,
}

impl EntryStatus {
    /// Check if the status counts as success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Pending => "pending",
            Self::NotInstalled => "not installed",
        };
        write!(f, "{label}")
    }
}

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    /// Sequence of the operation in the work order
    pub sequence: u32,
    /// Reported status
    pub status: EntryStatus,
    /// Installer exit code, if reported
    pub exit_code: Option<i32>,
    /// Tail of the unit's log for anything that did not complete
    pub log_excerpt: Option<String>,
}

/// Aggregate result of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    /// Job identifier
    pub job_id: String,
    /// No failed and no missing entries
    pub succeeded: bool,
    /// Outcome per unit
    pub per_operation: BTreeMap<PackageRef, OperationOutcome>,
    /// Sequences the agent did not report on
    pub missing: Vec<u32>,
}

impl JobResult {
    /// Result of a job with nothing to do.
    pub fn empty(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            succeeded: true,
            per_operation: BTreeMap::new(),
            missing: Vec::new(),
        }
    }

    /// Outcome for a unit
    pub fn outcome(&self, unit: &PackageRef) -> Option<&OperationOutcome> {
        self.per_operation.get(unit)
    }

    /// Units the agent reported as not completed, in sequence order.
    ///
    /// Missing entries are not included; see [`JobResult::missing_units`].
    pub fn failures(&self) -> Vec<(&PackageRef, &OperationOutcome)> {
        let mut failed: Vec<_> = self
            .per_operation
            .iter()
            .filter(|(_, o)| !o.status.is_success() && o.status != EntryStatus::NotInstalled)
            .collect();
        failed.sort_by_key(|(_, o)| o.sequence);
        failed
    }

    /// Units without a result entry, in sequence order.
    pub fn missing_units(&self) -> Vec<&PackageRef> {
        let mut missing: Vec<_> = self
            .per_operation
            .iter()
            .filter(|(_, o)| o.status == EntryStatus::NotInstalled)
            .collect();
        missing.sort_by_key(|(_, o)| o.sequence);
        missing.into_iter().map(|(unit, _)| unit).collect()
    }

    /// Count of outcomes with the given status
    pub fn count(&self, status: EntryStatus) -> usize {
        self.per_operation
            .values()
            .filter(|o| o.status == status)
            .count()
    }

    /// One-line summary (e.g., "2 completed, 1 failed, 0 missing").
    pub fn summary(&self) -> String {
        let completed = self.count(EntryStatus::Completed);
        let failed = self.failures().len();
        format!(
            "{} completed, {} failed, {} missing",
            completed,
            failed,
            self.missing.len()
        )
    }

    /// Turn the result into a verdict.
    ///
    /// Reported failures win over missing entries because they carry the
    /// agent's own diagnostics.
    ///
    /// # Errors
    ///
    /// Returns `Error::JobFailed` when the agent reported failed operations
    /// and `Error::PartialResult` when result entries are missing.
    pub fn verdict(&self) -> Result<()> {
        let failures = self.failures();
        if !failures.is_empty() {
            return Err(Error::JobFailed {
                job_id: self.job_id.clone(),
                failed: failures.iter().map(|(u, _)| u.to_string()).collect(),
                excerpt: failures
                    .iter()
                    .find_map(|(_, o)| o.log_excerpt.clone()),
            });
        }

        if !self.missing.is_empty() {
            return Err(Error::PartialResult {
                job_id: self.job_id.clone(),
                missing: self
                    .missing_units()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, version: &str) -> PackageRef {
        PackageRef::new(name, version, "x64")
    }

    fn outcome(sequence: u32, status: EntryStatus) -> OperationOutcome {
        OperationOutcome {
            sequence,
            status,
            exit_code: None,
            log_excerpt: None,
        }
    }

    #[test]
    fn test_operation_kind_wire_form() {
        let json = serde_json::to_string(&OperationKind::Install).unwrap();
        assert_eq!(json, r#"{"type":"install"}"#);

        let kind = OperationKind::Replace {
            from: unit("a", "1.0"),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.starts_with(r#"{"type":"replace","from":"#));
        assert_eq!(serde_json::from_str::<OperationKind>(&json).unwrap(), kind);
    }

    #[test]
    fn test_operation_display() {
        let op = Operation::replace(unit("a", "1.0"), unit("a", "2.0"));
        assert_eq!(op.to_string(), "~ a@1.0/x64 -> a@2.0/x64");
        assert!(op.needs_content());
        assert!(!Operation::remove(unit("a", "1.0")).needs_content());
    }

    #[test]
    fn test_manifest_push_replaces_by_name() {
        let mut manifest = Manifest::from_units([unit("a", "1.0"), unit("b", "1.0")]);
        manifest.push(unit("a", "2.0"), None);
        assert_eq!(manifest.units(), vec![unit("a", "2.0"), unit("b", "1.0")]);
    }

    #[test]
    fn test_manifest_advance() {
        let mut manifest = Manifest::from_units([unit("a", "1.0"), unit("b", "1.0")]);
        let at = Utc::now();
        manifest.advance(
            &[
                Operation::remove(unit("b", "1.0")),
                Operation::replace(unit("a", "1.0"), unit("a", "2.0")),
                Operation::install(unit("c", "3.0")),
            ],
            at,
        );

        assert_eq!(manifest.units(), vec![unit("a", "2.0"), unit("c", "3.0")]);
        assert_eq!(manifest.get("c").unwrap().installed_at, Some(at));
    }

    #[test]
    fn test_manifest_json() {
        let mut manifest = Manifest::from_units([unit("a", "1.0")]);
        manifest.push(unit("b", "1.0"), Some(Utc::now()));
        let json = manifest.to_json().unwrap();
        assert!(json.contains(r#""name":"a""#));
        assert_eq!(Manifest::from_json(&json).unwrap(), manifest);
        assert!(Manifest::from_json("").unwrap().is_empty());
        assert!(Manifest::from_json("{not json").is_err());
    }

    #[test]
    fn test_agent_status_parse() {
        assert_eq!(AgentStatus::parse("running", "j1"), AgentStatus::Running);
        assert_eq!(AgentStatus::parse("stopped j1", "j1"), AgentStatus::Stopped);
        assert_eq!(AgentStatus::parse("REBOOTING j1", "j1"), AgentStatus::Rebooting);
        // Left over from an earlier job
        assert_eq!(AgentStatus::parse("stopped j0", "j1"), AgentStatus::Commanded);
        assert_eq!(AgentStatus::parse("", "j1"), AgentStatus::Commanded);
        assert_eq!(AgentStatus::parse("busy", "j1"), AgentStatus::Running);
        assert_eq!(AgentStatus::Stopped.flag("j1"), "stopped j1");
    }

    #[test]
    fn test_verdict_success() {
        let mut result = JobResult::empty("j1");
        result
            .per_operation
            .insert(unit("a", "2.0"), outcome(0, EntryStatus::Completed));
        assert!(result.verdict().is_ok());
        assert_eq!(result.summary(), "1 completed, 0 failed, 0 missing");
    }

    #[test]
    fn test_verdict_partial() {
        let mut result = JobResult::empty("j1");
        result.succeeded = false;
        result
            .per_operation
            .insert(unit("a", "2.0"), outcome(0, EntryStatus::Completed));
        result
            .per_operation
            .insert(unit("b", "1.0"), outcome(1, EntryStatus::NotInstalled));
        result.missing = vec![1];

        match result.verdict() {
            Err(Error::PartialResult { job_id, missing }) => {
                assert_eq!(job_id, "j1");
                assert_eq!(missing, vec!["b@1.0/x64".to_string()]);
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_verdict_failed_carries_excerpt() {
        let mut result = JobResult::empty("j1");
        result.succeeded = false;
        let mut failed = outcome(0, EntryStatus::Failed);
        failed.exit_code = Some(1603);
        failed.log_excerpt = Some("fatal error during installation".to_string());
        result.per_operation.insert(unit("a", "2.0"), failed);

        let err = result.verdict().unwrap_err();
        assert_eq!(err.excerpt(), Some("fatal error during installation"));
        assert!(matches!(err, Error::JobFailed { .. }));
    }
}
