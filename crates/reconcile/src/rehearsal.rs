//! Stand-in for the remote agent
//!
//! [`SimulatedAgent`] reads a work order the same way the real agent does
//! and answers with a result document, unit logs and a final status flag.
//! Hooked into a [`MemoryTarget`] it makes a complete job run in-process,
//! which is what the `memory` target kind and the pipeline tests use.

use crate::agent::{AGENT_PATH, COMMAND_KEY, STATUS_KEY};
use crate::descriptor::{REQUEST_FILE, RESULT_FILE, RequestDocument, ResultDocument, ResultEntry};
use crate::planner::LOG_FILE_NAME;
use crate::session::{CONTROL_PATH, DEFAULT_UPDATE_DIR, UPDATE_DIR_KEY};
use crate::types::{AgentStatus, EntryStatus, OperationKind};
use remote::{ControlChannel, Error, FileChannel, MemoryTarget, Result, Target, join};
use std::collections::BTreeSet;

/// Exit code reported for a simulated installer failure
pub const FAILURE_EXIT_CODE: i32 = 1603;

/// In-process agent that applies nothing but reports like the real one
#[derive(Debug, Clone, Default)]
pub struct SimulatedAgent {
    failing: BTreeSet<String>,
    silent: BTreeSet<String>,
}

impl SimulatedAgent {
    /// Create an agent that completes every operation
    pub fn new() -> Self {
        Self::default()
    }

    /// Report operations on `name` as failed
    pub fn fail_unit(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    /// Leave operations on `name` out of the result document
    pub fn drop_unit(mut self, name: impl Into<String>) -> Self {
        self.silent.insert(name.into());
        self
    }

    /// Run the agent whenever a service is started on `target`.
    pub fn install(self, target: MemoryTarget) -> MemoryTarget {
        target.on_start(move |t, service| {
            if let Err(e) = self.run(t) {
                log::warn!("Simulated {} failed: {}", service, e);
            }
        })
    }

    /// Execute the commanded work order once.
    pub fn run(&self, target: &dyn Target) -> Result<()> {
        let command = target.read_key(AGENT_PATH, COMMAND_KEY)?;
        let job_id = command
            .strip_prefix("install ")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Other(format!("unknown command '{command}'")))?
            .to_string();

        let update_dir = target
            .read_key_opt(CONTROL_PATH, UPDATE_DIR_KEY)?
            .unwrap_or_else(|| DEFAULT_UPDATE_DIR.to_string());
        let root = join(&update_dir, &job_id);
        let request = target.read_to_string(&join(&root, REQUEST_FILE))?;
        let request = RequestDocument::from_json(&request, &job_id)
            .map_err(|e| Error::Other(e.to_string()))?;

        target.write_key(AGENT_PATH, STATUS_KEY, &AgentStatus::Running.flag(&job_id))?;

        let mut job_log = vec![format!("Job {job_id}: {} operations", request.operations.len())];
        let mut result = ResultDocument::new(&job_id);
        let mut critical_failed = false;

        for entry in &request.operations {
            let unit = entry.unit.to_string();
            let verb = match entry.kind {
                OperationKind::Remove => "Removing",
                _ => "Installing",
            };
            let mut unit_log = vec![format!("{verb} {unit}")];

            let (status, exit_code) = if critical_failed {
                unit_log.push("Skipped after critical failure".to_string());
                (EntryStatus::Skipped, None)
            } else if self.failing.contains(&entry.unit.name) {
                unit_log.push(format!("error: installer exited with {FAILURE_EXIT_CODE}"));
                (EntryStatus::Failed, Some(FAILURE_EXIT_CODE))
            } else if let Some(content) = &entry.content_file_name
                && !target.exists(&join(&root, content))?
            {
                unit_log.push(format!("error: payload {content} missing"));
                (EntryStatus::Failed, Some(2))
            } else {
                unit_log.push("Done".to_string());
                (EntryStatus::Completed, Some(0))
            };

            if status == EntryStatus::Failed && entry.critical {
                critical_failed = true;
            }
            job_log.push(format!("{verb} {unit}: {status}"));
            target.write_file(
                &join(&root, &entry.log_file_name),
                format!("{}\n", unit_log.join("\n")).as_bytes(),
            )?;

            if self.silent.contains(&entry.unit.name) {
                continue;
            }
            result.entries.push(ResultEntry {
                sequence: entry.sequence,
                status,
                exit_code,
                log_file_name: Some(entry.log_file_name.clone()),
            });
        }

        job_log.push("Finished".to_string());
        target.write_file(
            &join(&root, LOG_FILE_NAME),
            format!("{}\n", job_log.join("\n")).as_bytes(),
        )?;
        let json = result.to_json().map_err(|e| Error::Other(e.to_string()))?;
        target.write_file(&join(&root, RESULT_FILE), json.as_bytes())?;
        target.write_key(AGENT_PATH, STATUS_KEY, &AgentStatus::Stopped.flag(&job_id))?;
        Ok(())
    }
}
