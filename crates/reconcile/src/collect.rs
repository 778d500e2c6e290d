//! Result collection
//!
//! Reads the agent's `result.json` back from the job directory and matches
//! its entries to the work order by sequence. Everything that did not
//! complete gets the tail of its unit log attached.

use crate::descriptor::{RESULT_FILE, ResultDocument, ResultEntry};
use crate::error::{Error, Result};
use crate::planner::{PlannedOperation, WorkOrder};
use crate::types::{EntryStatus, JobResult, OperationOutcome};
use remote::{FileChannel, join};
use std::collections::{BTreeMap, HashMap};

/// Lines of unit log attached to a failed outcome
pub const DEFAULT_EXCERPT_LINES: usize = 20;

/// Last `n` lines of `text`, trailing blank lines dropped.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Last non-blank line of `text`.
pub fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

/// Harvests per-operation outcomes from the target
pub struct ResultCollector<'a> {
    files: &'a dyn FileChannel,
    excerpt_lines: usize,
}

impl<'a> ResultCollector<'a> {
    /// Create a collector reading through `files`
    pub fn new(files: &'a dyn FileChannel) -> Self {
        Self {
            files,
            excerpt_lines: DEFAULT_EXCERPT_LINES,
        }
    }

    /// Number of log lines attached to each failure
    pub fn with_excerpt_lines(mut self, lines: usize) -> Self {
        self.excerpt_lines = lines;
        self
    }

    /// Collect the result of `work_order` from the job directory `root`.
    ///
    /// A missing result document means every entry is missing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Descriptor` if the result document cannot be read,
    /// is malformed, or belongs to another job.
    pub fn collect(&self, root: &str, work_order: &WorkOrder) -> Result<JobResult> {
        let job_id = work_order.job_id.as_str();
        let entries = self.read_entries(root, job_id)?;

        let mut per_operation = BTreeMap::new();
        let mut missing = Vec::new();

        for planned in &work_order.operations {
            let sequence = planned.operation.sequence;
            let outcome = match entries.get(&sequence) {
                Some(entry) => OperationOutcome {
                    sequence,
                    status: entry.status,
                    exit_code: entry.exit_code,
                    log_excerpt: None,
                },
                None => {
                    missing.push(sequence);
                    OperationOutcome {
                        sequence,
                        status: EntryStatus::NotInstalled,
                        exit_code: None,
                        log_excerpt: None,
                    }
                }
            };

            let outcome = if outcome.status.is_success() {
                outcome
            } else {
                let log_path = self.log_path(root, work_order, planned, entries.get(&sequence));
                OperationOutcome {
                    log_excerpt: self.excerpt(&log_path),
                    ..outcome
                }
            };
            per_operation.insert(planned.unit().clone(), outcome);
        }

        for sequence in entries.keys() {
            if work_order.by_sequence(*sequence).is_none() {
                log::warn!("Job {}: result entry {} matches no operation", job_id, sequence);
            }
        }

        let succeeded = missing.is_empty() && per_operation.values().all(|o| o.status.is_success());
        let result = JobResult {
            job_id: job_id.to_string(),
            succeeded,
            per_operation,
            missing,
        };
        log::info!("Job {}: {}", job_id, result.summary());
        Ok(result)
    }

    fn read_entries(&self, root: &str, job_id: &str) -> Result<HashMap<u32, ResultEntry>> {
        let path = join(root, RESULT_FILE);
        let text = match self.files.read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.is_not_found() => {
                log::warn!("Job {}: no {} on target", job_id, RESULT_FILE);
                return Ok(HashMap::new());
            }
            Err(e) => {
                return Err(Error::Descriptor {
                    job_id: job_id.to_string(),
                    message: format!("cannot read {path}: {e}"),
                });
            }
        };

        let doc = ResultDocument::from_json(&text, job_id)?;
        Ok(doc
            .entries
            .into_iter()
            .map(|entry| (entry.sequence, entry))
            .collect())
    }

    fn log_path(
        &self,
        root: &str,
        work_order: &WorkOrder,
        planned: &PlannedOperation,
        entry: Option<&ResultEntry>,
    ) -> String {
        let default = work_order.unit_log_path(planned.unit());
        let unit_dir = planned.unit().unit_id();
        let relative = match entry.and_then(|e| e.log_file_name.as_deref()) {
            Some(name)
                if name
                    .strip_prefix(unit_dir.as_str())
                    .is_some_and(|rest| rest.starts_with('/')) =>
            {
                name.to_string()
            }
            Some(name) => {
                log::warn!(
                    "Job {}: ignoring log {} outside {}/",
                    work_order.job_id,
                    name,
                    unit_dir
                );
                default
            }
            None => default,
        };
        join(root, &relative)
    }

    fn excerpt(&self, path: &str) -> Option<String> {
        match self.files.read_to_string(path) {
            Ok(text) => Some(tail_lines(&text, self.excerpt_lines)).filter(|t| !t.is_empty()),
            Err(e) => {
                log::debug!("No log excerpt from {}: {}", path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::UpdatePlanBuilder;
    use crate::types::Operation;
    use remote::MemoryTarget;
    use unitrepo::{MockRepository, PackageRef};

    const ROOT: &str = "updates/job-1";

    fn work_order() -> WorkOrder {
        let repo = MockRepository::new()
            .with_unit("app", "2.0", "x64", "app")
            .with_unit("tools", "1.0", "x64", "tools");
        UpdatePlanBuilder::new(&repo)
            .with_job_id(Some("job-1".to_string()))
            .build(vec![
                Operation::install(PackageRef::new("app", "2.0", "x64")),
                Operation::install(PackageRef::new("tools", "1.0", "x64")),
            ])
            .unwrap()
    }

    fn target_with_result(json: &str) -> MemoryTarget {
        let target = MemoryTarget::new("t");
        target.mkdir(ROOT).unwrap();
        target
            .write_file(&format!("{ROOT}/{RESULT_FILE}"), json.as_bytes())
            .unwrap();
        target
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc\n\n", 2), "b\nc");
        assert_eq!(tail_lines("a", 5), "a");
        assert_eq!(tail_lines("", 5), "");
        assert_eq!(last_line("one\ntwo\n  \n"), Some("two"));
        assert_eq!(last_line("\n"), None);
    }

    #[test]
    fn test_all_completed() {
        let target = target_with_result(
            r#"{"job_id":"job-1","entries":[
                {"sequence":0,"status":"completed","exit_code":0},
                {"sequence":1,"status":"completed","exit_code":0}]}"#,
        );
        let result = ResultCollector::new(&target)
            .collect(ROOT, &work_order())
            .unwrap();

        assert!(result.succeeded);
        assert!(result.missing.is_empty());
        assert!(result.verdict().is_ok());
        let app = result.outcome(&PackageRef::new("app", "2.0", "x64")).unwrap();
        assert_eq!(app.exit_code, Some(0));
        assert_eq!(app.log_excerpt, None);
    }

    #[test]
    fn test_missing_entries() {
        let target = target_with_result(
            r#"{"job_id":"job-1","entries":[{"sequence":0,"status":"completed"}]}"#,
        );
        let result = ResultCollector::new(&target)
            .collect(ROOT, &work_order())
            .unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.missing, vec![1]);
        let tools = result.outcome(&PackageRef::new("tools", "1.0", "x64")).unwrap();
        assert_eq!(tools.status, EntryStatus::NotInstalled);
        assert!(matches!(result.verdict(), Err(Error::PartialResult { .. })));
    }

    #[test]
    fn test_failed_entry_gets_log_excerpt() {
        let target = target_with_result(
            r#"{"job_id":"job-1","entries":[
                {"sequence":0,"status":"completed"},
                {"sequence":1,"status":"failed","exit_code":1603}]}"#,
        );
        let tools = PackageRef::new("tools", "1.0", "x64");
        let unit_dir = format!("{ROOT}/{}", tools.unit_id());
        target.mkdir(&unit_dir).unwrap();
        let log: String = (1..=30).map(|i| format!("line {i}\n")).collect();
        target
            .write_file(&format!("{unit_dir}/install.log"), log.as_bytes())
            .unwrap();

        let result = ResultCollector::new(&target)
            .with_excerpt_lines(3)
            .collect(ROOT, &work_order())
            .unwrap();

        let outcome = result.outcome(&tools).unwrap();
        assert_eq!(outcome.status, EntryStatus::Failed);
        assert_eq!(outcome.exit_code, Some(1603));
        assert_eq!(outcome.log_excerpt.as_deref(), Some("line 28\nline 29\nline 30"));

        let err = result.verdict().unwrap_err();
        assert_eq!(err.excerpt(), Some("line 28\nline 29\nline 30"));
    }

    #[test]
    fn test_log_outside_unit_dir_is_ignored() {
        let target = target_with_result(
            r#"{"job_id":"job-1","entries":[
                {"sequence":0,"status":"completed"},
                {"sequence":1,"status":"failed","exit_code":2,"log_file_name":"/var/log/other.log"}]}"#,
        );
        let tools = PackageRef::new("tools", "1.0", "x64");
        let unit_dir = format!("{ROOT}/{}", tools.unit_id());
        target.mkdir(&unit_dir).unwrap();
        target
            .write_file(&format!("{unit_dir}/install.log"), b"Installing tools\nerror: disk full\n")
            .unwrap();

        let result = ResultCollector::new(&target)
            .collect(ROOT, &work_order())
            .unwrap();
        let outcome = result.outcome(&tools).unwrap();
        assert_eq!(
            outcome.log_excerpt.as_deref(),
            Some("Installing tools\nerror: disk full")
        );
    }

    #[test]
    fn test_no_result_document() {
        let target = MemoryTarget::new("t");
        let result = ResultCollector::new(&target)
            .collect(ROOT, &work_order())
            .unwrap();
        assert_eq!(result.missing, vec![0, 1]);
        assert!(!result.succeeded);
    }

    #[test]
    fn test_result_for_other_job() {
        let target = target_with_result(r#"{"job_id":"job-0","entries":[]}"#);
        let err = ResultCollector::new(&target)
            .collect(ROOT, &work_order())
            .unwrap_err();
        assert!(matches!(err, Error::Descriptor { .. }));
    }
}
