//! Work order descriptors exchanged with the remote agent
//!
//! Two JSON documents live in the job directory on the target:
//! - `workorder.json`, written by us as the last transfer step
//! - `result.json`, written by the agent when it stops
//!
//! They are correlated by `job_id`. The request is never rewritten.

use crate::error::{Error, Result};
use crate::planner::{PlannedOperation, WorkOrder};
use crate::types::{EntryStatus, Operation, OperationKind};
use serde::{Deserialize, Serialize};
use unitrepo::PackageRef;

/// Request descriptor file name
pub const REQUEST_FILE: &str = "workorder.json";

/// Result document file name
pub const RESULT_FILE: &str = "result.json";

/// Request descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDocument {
    /// Job identifier
    pub job_id: String,
    /// Job-level log file name
    pub log_file_name: String,
    /// Operations in execution order
    pub operations: Vec<RequestEntry>,
}

/// One operation in the request descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEntry {
    /// Execution position
    pub sequence: u32,
    /// Unit identity
    pub unit: PackageRef,
    /// What to do
    pub kind: OperationKind,
    /// Applied before non-critical operations
    pub critical: bool,
    /// Payload path relative to the job directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_file_name: Option<String>,
    /// Per-unit log path relative to the job directory
    pub log_file_name: String,
}

impl RequestDocument {
    /// Describe a work order.
    pub fn from_work_order(work_order: &WorkOrder) -> Self {
        let operations = work_order
            .operations
            .iter()
            .map(|planned| RequestEntry {
                sequence: planned.operation.sequence,
                unit: planned.operation.unit.clone(),
                kind: planned.operation.kind.clone(),
                critical: planned.operation.critical,
                content_file_name: content_path(planned),
                log_file_name: work_order.unit_log_path(planned.unit()),
            })
            .collect();

        Self {
            job_id: work_order.job_id.clone(),
            log_file_name: work_order.log_file_name.clone(),
            operations,
        }
    }

    /// Rebuild the work order (without content) for a job already started.
    pub fn into_work_order(self) -> WorkOrder {
        let operations = self
            .operations
            .into_iter()
            .map(|entry| PlannedOperation {
                operation: Operation {
                    unit: entry.unit,
                    kind: entry.kind,
                    critical: entry.critical,
                    sequence: entry.sequence,
                },
                content: None,
            })
            .collect();

        WorkOrder {
            job_id: self.job_id,
            log_file_name: self.log_file_name,
            operations,
        }
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Descriptor {
            job_id: self.job_id.clone(),
            message: e.to_string(),
        })
    }

    /// Parse a request read back from the target.
    ///
    /// # Errors
    ///
    /// Returns `Error::Descriptor` if the document is malformed or belongs
    /// to another job.
    pub fn from_json(json: &str, job_id: &str) -> Result<Self> {
        let doc: Self = serde_json::from_str(json).map_err(|e| Error::Descriptor {
            job_id: job_id.to_string(),
            message: format!("invalid {REQUEST_FILE}: {e}"),
        })?;
        check_job_id(job_id, &doc.job_id, REQUEST_FILE)?;
        Ok(doc)
    }
}

/// Payload path of a planned operation relative to the job directory.
pub fn content_path(planned: &PlannedOperation) -> Option<String> {
    planned
        .content
        .as_ref()
        .filter(|blob| blob.has_content())
        .map(|blob| format!("{}/{}", planned.unit().unit_id(), blob.payload_name))
}

/// Result document written by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultDocument {
    /// Job identifier, must match the request
    pub job_id: String,
    /// One entry per operation the agent reports on
    #[serde(default)]
    pub entries: Vec<ResultEntry>,
}

/// Per-operation entry in the result document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Sequence of the operation in the request
    pub sequence: u32,
    /// Outcome
    pub status: EntryStatus,
    /// Installer exit code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Log path relative to the job directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_name: Option<String>,
}

impl ResultDocument {
    /// Create an empty result for a job
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            entries: Vec::new(),
        }
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Descriptor {
            job_id: self.job_id.clone(),
            message: e.to_string(),
        })
    }

    /// Parse a result document for `job_id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Descriptor` if the document is malformed or its job
    /// id does not match.
    pub fn from_json(json: &str, job_id: &str) -> Result<Self> {
        let doc: Self = serde_json::from_str(json).map_err(|e| Error::Descriptor {
            job_id: job_id.to_string(),
            message: format!("invalid {RESULT_FILE}: {e}"),
        })?;
        check_job_id(job_id, &doc.job_id, RESULT_FILE)?;
        Ok(doc)
    }
}

fn check_job_id(expected: &str, found: &str, file: &str) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::Descriptor {
            job_id: expected.to_string(),
            message: format!("{file} belongs to job {found}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::UpdatePlanBuilder;
    use unitrepo::MockRepository;

    fn work_order() -> WorkOrder {
        let repo = MockRepository::new()
            .with_unit("patchbay-agent", "3.0", "x64", vec![1u8; 4])
            .with_unit("app", "2.0", "x64", vec![2u8; 8]);
        UpdatePlanBuilder::new(&repo)
            .with_job_id(Some("job-1".to_string()))
            .build(vec![
                Operation::install(PackageRef::new("app", "2.0", "x64")),
                Operation::remove(PackageRef::new("legacy", "1.0", "")),
                Operation::replace(
                    PackageRef::new("patchbay-agent", "2.0", "x64"),
                    PackageRef::new("patchbay-agent", "3.0", "x64"),
                ),
            ])
            .unwrap()
    }

    #[test]
    fn test_request_round_trip() {
        let work_order = work_order();
        let doc = RequestDocument::from_work_order(&work_order);
        let json = doc.to_json().unwrap();
        let parsed = RequestDocument::from_json(&json, "job-1").unwrap();
        assert_eq!(parsed, doc);

        let rebuilt = parsed.into_work_order();
        assert_eq!(rebuilt.operations(), work_order.operations());
        assert_eq!(rebuilt.log_file_name, "install.log");
    }

    #[test]
    fn test_request_entry_paths() {
        let work_order = work_order();
        let doc = RequestDocument::from_work_order(&work_order);

        let agent = &doc.operations[0];
        assert_eq!(agent.unit.name, "patchbay-agent");
        assert!(agent.critical);
        let id = agent.unit.unit_id();
        assert_eq!(
            agent.content_file_name.as_deref(),
            Some(format!("{id}/patchbay-agent-3.0.pkg").as_str())
        );
        assert_eq!(agent.log_file_name, format!("{id}/install.log"));

        let removal = doc
            .operations
            .iter()
            .find(|e| e.kind == OperationKind::Remove)
            .unwrap();
        assert_eq!(removal.content_file_name, None);
    }

    #[test]
    fn test_request_json_shape() {
        let json = RequestDocument::from_work_order(&work_order()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["job_id"], "job-1");
        assert_eq!(value["operations"][0]["kind"]["type"], "replace");
        assert_eq!(value["operations"][0]["kind"]["from"]["version"], "2.0");
        assert_eq!(value["operations"][2]["kind"]["type"], "remove");
    }

    #[test]
    fn test_result_parse() {
        let json = r#"{
            "job_id": "job-1",
            "entries": [
                {"sequence": 0, "status": "completed", "exit_code": 0},
                {"sequence": 1, "status": "failed", "exit_code": 1603, "log_file_name": "x/install.log"}
            ]
        }"#;
        let doc = ResultDocument::from_json(json, "job-1").unwrap();
        assert_eq!(doc.entries.len(), 2);
        assert_eq!(doc.entries[1].status, EntryStatus::Failed);
        assert_eq!(doc.entries[1].exit_code, Some(1603));
    }

    #[test]
    fn test_result_for_other_job_rejected() {
        let json = r#"{"job_id": "job-0", "entries": []}"#;
        let err = ResultDocument::from_json(json, "job-1").unwrap_err();
        assert!(matches!(err, Error::Descriptor { .. }));
        assert!(err.to_string().contains("job-0"));
    }
}
