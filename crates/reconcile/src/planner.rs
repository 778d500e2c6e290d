//! Work order planning
//!
//! Turns an ordered operation list into a [`WorkOrder`]: critical units go
//! first, sequences are renumbered, and every non-remove operation gets its
//! payload from the repository. Planning never touches the target.

use crate::diff::renumber;
use crate::error::{Error, Result};
use crate::types::Operation;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use unitrepo::{ContentBlob, PackageRef, PackageRepository};
use uuid::Uuid;

/// Name of every log file the agent writes (job level and per unit).
pub const LOG_FILE_NAME: &str = "install.log";

/// Unit that is critical unless configured otherwise: the agent's own package.
pub const DEFAULT_CRITICAL_UNIT: &str = "patchbay-agent";

static JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("job id pattern is valid"));

/// An operation together with the payload it ships
#[derive(Debug, Clone)]
pub struct PlannedOperation {
    /// The operation
    pub operation: Operation,
    /// Payload, `None` for removals
    pub content: Option<ContentBlob>,
}

impl PlannedOperation {
    /// Unit the operation applies to
    pub fn unit(&self) -> &PackageRef {
        &self.operation.unit
    }

    /// Bytes shipped for this operation
    pub fn size_bytes(&self) -> u64 {
        self.content
            .as_ref()
            .filter(|blob| blob.has_content())
            .map_or(0, |blob| blob.size_bytes)
    }
}

/// Ordered operations plus content for one job
#[derive(Debug, Clone)]
pub struct WorkOrder {
    /// Job identifier, also the name of the job's directory on the target
    pub job_id: String,
    /// Log file name the agent writes
    pub log_file_name: String,
    /// Operations in execution order
    pub operations: Vec<PlannedOperation>,
}

impl WorkOrder {
    /// Create an empty work order
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            log_file_name: LOG_FILE_NAME.to_string(),
            operations: Vec::new(),
        }
    }

    /// Check if there is nothing to do
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Operations without content, in order
    pub fn operations(&self) -> Vec<Operation> {
        self.operations
            .iter()
            .map(|p| p.operation.clone())
            .collect()
    }

    /// Planned operation with a given sequence
    pub fn by_sequence(&self, sequence: u32) -> Option<&PlannedOperation> {
        self.operations
            .iter()
            .find(|p| p.operation.sequence == sequence)
    }

    /// Total payload bytes to transfer
    pub fn total_bytes(&self) -> u64 {
        self.operations.iter().map(PlannedOperation::size_bytes).sum()
    }

    /// Number of critical operations
    pub fn critical_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|p| p.operation.critical)
            .count()
    }

    /// Per-unit log path, relative to the job directory
    pub fn unit_log_path(&self, unit: &PackageRef) -> String {
        format!("{}/{}", unit.unit_id(), self.log_file_name)
    }
}

/// Builds work orders from diff output
pub struct UpdatePlanBuilder<'a> {
    repo: &'a dyn PackageRepository,
    critical_units: BTreeSet<String>,
    job_id: Option<String>,
}

impl<'a> UpdatePlanBuilder<'a> {
    /// Create a builder fetching content from `repo`
    pub fn new(repo: &'a dyn PackageRepository) -> Self {
        Self {
            repo,
            critical_units: BTreeSet::from([DEFAULT_CRITICAL_UNIT.to_string()]),
            job_id: None,
        }
    }

    /// Replace the set of critical unit names
    pub fn with_critical_units<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.critical_units = names.into_iter().map(Into::into).collect();
        self
    }

    /// Use a caller-supplied job id instead of a fresh one
    pub fn with_job_id(mut self, job_id: Option<String>) -> Self {
        self.job_id = job_id;
        self
    }

    /// Build the work order.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidJobId` for a caller-supplied id that fails
    /// [`validate_job_id`], and `Error::Repository` if the content for any
    /// install or replace cannot be fetched.
    pub fn build(self, operations: Vec<Operation>) -> Result<WorkOrder> {
        let job_id = match self.job_id {
            Some(id) => validate_job_id(&id).map(|()| id)?,
            None => new_job_id(),
        };
        let ordered = order_operations(operations, &self.critical_units);

        let mut work_order = WorkOrder::new(job_id);
        for operation in ordered {
            let content = if operation.needs_content() {
                let blob =
                    self.repo
                        .fetch_content(&operation.unit)
                        .map_err(|source| Error::Repository {
                            unit: operation.unit.to_string(),
                            source,
                        })?;
                Some(blob)
            } else {
                None
            };
            work_order.operations.push(PlannedOperation { operation, content });
        }

        log::info!(
            "Planned job {}: {} operations ({} critical, {} bytes)",
            work_order.job_id,
            work_order.len(),
            work_order.critical_count(),
            work_order.total_bytes()
        );
        Ok(work_order)
    }
}

/// Mark critical operations, move them to the front and renumber.
///
/// Relative order is kept within the critical and non-critical groups.
pub fn order_operations(operations: Vec<Operation>, critical: &BTreeSet<String>) -> Vec<Operation> {
    let (mut front, back): (Vec<Operation>, Vec<Operation>) = operations
        .into_iter()
        .map(|mut op| {
            op.critical = critical.contains(&op.unit.name);
            op
        })
        .partition(|op| op.critical);

    front.extend(back);
    renumber(&mut front);
    front
}

/// Check that `job_id` fits in a status flag and a single path segment.
pub fn validate_job_id(job_id: &str) -> Result<()> {
    if JOB_ID.is_match(job_id) && job_id != "." && job_id != ".." {
        Ok(())
    } else {
        Err(Error::InvalidJobId {
            job_id: job_id.to_string(),
        })
    }
}

/// Fresh job identifier
pub fn new_job_id() -> String {
    format!("job-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_units;
    use unitrepo::MockRepository;

    fn unit(name: &str, version: &str) -> PackageRef {
        PackageRef::new(name, version, "x64")
    }

    fn repo() -> MockRepository {
        MockRepository::new()
            .with_unit("app", "2.0", "x64", vec![7u8; 100])
            .with_unit("patchbay-agent", "3.0", "x64", vec![1u8; 40])
            .with_unit("tools", "1.0", "x64", vec![2u8; 10])
    }

    #[test]
    fn test_critical_first_and_sequences_increase() {
        let ops = diff_units(
            &[unit("app", "1.0"), unit("patchbay-agent", "2.0"), unit("legacy", "1.0")],
            &[unit("app", "2.0"), unit("tools", "1.0"), unit("patchbay-agent", "3.0")],
        );
        let repo = repo();
        let work_order = UpdatePlanBuilder::new(&repo).build(ops).unwrap();

        let names: Vec<&str> = work_order
            .operations
            .iter()
            .map(|p| p.unit().name.as_str())
            .collect();
        assert_eq!(names, vec!["patchbay-agent", "legacy", "app", "tools"]);

        let sequences: Vec<u32> = work_order
            .operations
            .iter()
            .map(|p| p.operation.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);

        let first_plain = work_order
            .operations
            .iter()
            .position(|p| !p.operation.critical)
            .unwrap();
        assert!(work_order.operations[first_plain..]
            .iter()
            .all(|p| !p.operation.critical));
        assert_eq!(work_order.critical_count(), 1);
    }

    #[test]
    fn test_content_only_for_non_removals() {
        let ops = diff_units(&[unit("legacy", "1.0")], &[unit("app", "2.0")]);
        let repo = repo();
        let work_order = UpdatePlanBuilder::new(&repo).build(ops).unwrap();

        assert!(work_order.operations[0].content.is_none());
        let blob = work_order.operations[1].content.as_ref().unwrap();
        assert_eq!(blob.size_bytes, 100);
        assert_eq!(work_order.total_bytes(), 100);
        assert_eq!(work_order.log_file_name, LOG_FILE_NAME);
    }

    #[test]
    fn test_job_id_supplied_or_generated() {
        let repo = repo();
        let supplied = UpdatePlanBuilder::new(&repo)
            .with_job_id(Some("job-fixed".to_string()))
            .build(Vec::new())
            .unwrap();
        assert_eq!(supplied.job_id, "job-fixed");
        assert!(supplied.is_empty());

        let a = UpdatePlanBuilder::new(&repo).build(Vec::new()).unwrap();
        let b = UpdatePlanBuilder::new(&repo).build(Vec::new()).unwrap();
        assert!(a.job_id.starts_with("job-"));
        assert_ne!(a.job_id, b.job_id);
    }

    #[test]
    fn test_job_id_must_be_one_flag_word_and_path_segment() {
        for ok in ["job-1", "nightly_2024.10", new_job_id().as_str()] {
            assert!(validate_job_id(ok).is_ok(), "{ok}");
        }
        for bad in ["nightly run", "a/b", "..", ".", "", "job\t1"] {
            assert!(
                matches!(validate_job_id(bad), Err(Error::InvalidJobId { .. })),
                "{bad:?}"
            );
        }

        let repo = repo();
        let err = UpdatePlanBuilder::new(&repo)
            .with_job_id(Some("nightly run".to_string()))
            .build(vec![Operation::install(unit("app", "2.0"))])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidJobId { ref job_id } if job_id == "nightly run"));
        assert!(err.is_safe_to_retry());
    }

    #[test]
    fn test_missing_content_fails() {
        let repo = MockRepository::new();
        let err = UpdatePlanBuilder::new(&repo)
            .build(vec![Operation::install(unit("ghost", "1.0"))])
            .unwrap_err();
        assert!(matches!(err, Error::Repository { .. }));
    }

    #[test]
    fn test_custom_critical_units() {
        let ops = vec![
            Operation::remove(unit("a", "1")),
            Operation::remove(unit("b", "1")),
            Operation::remove(unit("c", "1")),
        ];
        let critical = BTreeSet::from(["c".to_string(), "b".to_string()]);
        let ordered = order_operations(ops, &critical);
        let names: Vec<&str> = ordered.iter().map(|o| o.unit.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
        assert!(ordered[0].critical && ordered[1].critical && !ordered[2].critical);
    }
}
