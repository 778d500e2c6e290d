//! Remote agent control
//!
//! The agent is commanded through one control key and reports through a
//! status flag. A target that stops answering may just be rebooting, so
//! unreachability is tolerated for a bounded grace period.
//!
//! ```text
//! Idle -> Commanded -> Running -> Stopped
//!                         |  ^
//!                         v  |
//!                      Rebooting
//! ```

use crate::collect::last_line;
use crate::context::{Clock, ProgressCallback};
use crate::error::{Error, Result};
use crate::planner::WorkOrder;
use crate::types::AgentStatus;
use remote::retry::LogCallback;
use remote::{ControlChannel, FileChannel, RetryConfig, Target, with_retry};
use std::time::{Duration, Instant};

/// Control key path of the agent
pub const AGENT_PATH: &str = "Software/Patchbay/Agent";

/// Command directive key, value `install <job_id>`
pub const COMMAND_KEY: &str = "command";

/// Status flag key, value `<state> [job_id]`
pub const STATUS_KEY: &str = "status";

/// Service name of the agent unless configured otherwise
pub const DEFAULT_SERVICE: &str = "patchbay-agent";

/// Command directive for a job
pub fn command_for(job_id: &str) -> String {
    format!("install {job_id}")
}

/// Controller-side view of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Nothing commanded yet
    Idle,
    /// Command written, agent started
    Commanded,
    /// Agent reported progress
    Running,
    /// Target rebooting or not answering
    Rebooting,
    /// Agent finished
    Stopped,
}

/// How to wait for the agent
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Longest tolerated stretch of unreachability
    pub reboot_timeout: Duration,
    /// Time between status polls
    pub poll_interval: Duration,
    /// Log file whose last line is reported on every poll
    pub report_status_path: Option<String>,
    /// Give up after this long regardless of status
    pub max_wait: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            reboot_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
            report_status_path: None,
            max_wait: None,
        }
    }
}

/// Commands the remote agent and follows it to completion
pub struct RemoteAgentController<'a> {
    target: &'a dyn Target,
    clock: &'a dyn Clock,
    service: String,
    retry: RetryConfig,
    state: AgentState,
    job_id: Option<String>,
}

impl<'a> RemoteAgentController<'a> {
    /// Create a controller for `target`
    pub fn new(target: &'a dyn Target, clock: &'a dyn Clock) -> Self {
        Self {
            target,
            clock,
            service: DEFAULT_SERVICE.to_string(),
            retry: RetryConfig::default(),
            state: AgentState::Idle,
            job_id: None,
        }
    }

    /// Service name to start
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Retry policy for transient transport errors on start
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Current state
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Job being followed, if any
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Command the agent to run `work_order` and start it.
    ///
    /// # Errors
    ///
    /// Returns `Error::AgentStart` if the directive cannot be written or the
    /// service cannot be started.
    pub fn start(&mut self, work_order: &WorkOrder) -> Result<()> {
        let job_id = work_order.job_id.clone();
        let command = command_for(&job_id);

        with_retry(&self.retry, Some(&LogCallback), || {
            self.target.write_key(AGENT_PATH, COMMAND_KEY, &command)
        })
        .map_err(|e| Error::AgentStart {
            job_id: job_id.clone(),
            message: format!("cannot write command directive: {e}"),
        })?;

        with_retry(&self.retry, Some(&LogCallback), || {
            self.target.start_service(&self.service)
        })
        .map_err(|e| Error::AgentStart {
            job_id: job_id.clone(),
            message: format!("cannot start {}: {e}", self.service),
        })?;

        log::info!("Commanded {} on {} for job {}", self.service, self.target.describe(), job_id);
        self.state = AgentState::Commanded;
        self.job_id = Some(job_id);
        Ok(())
    }

    /// Follow a job commanded earlier without commanding it again.
    pub fn attach(&mut self, job_id: impl Into<String>) {
        self.job_id = Some(job_id.into());
        self.state = AgentState::Commanded;
    }

    /// Read the agent's status once.
    ///
    /// A failed query reads as [`AgentStatus::Unreachable`]; a missing flag
    /// as [`AgentStatus::Commanded`].
    pub fn poll_status(&self) -> AgentStatus {
        let job_id = self.job_id.as_deref().unwrap_or_default();
        match self.target.read_key(AGENT_PATH, STATUS_KEY) {
            Ok(flag) => AgentStatus::parse(&flag, job_id),
            Err(e) if e.is_not_found() => AgentStatus::Commanded,
            Err(e) => {
                log::debug!("Status query failed: {}", e);
                AgentStatus::Unreachable
            }
        }
    }

    /// Poll until the agent stops.
    ///
    /// `Running` resets the reboot timer; `Rebooting` and `Unreachable`
    /// start it. Only an unreachable poll can end the wait with an error.
    ///
    /// # Errors
    ///
    /// Returns `Error::AgentUnreachable` once the target has been
    /// unreachable for longer than `reboot_timeout`, and
    /// `Error::AgentTimeout` when `max_wait` has passed.
    pub fn wait_for_completion(
        &mut self,
        options: &WaitOptions,
        progress: &mut dyn ProgressCallback,
    ) -> Result<()> {
        let job_id = self.job_id.clone().unwrap_or_default();
        let started = self.clock.now();
        let mut reboot_since: Option<Instant> = None;
        let mut last_log: Option<String> = None;

        loop {
            let status = self.poll_status();
            let now = self.clock.now();
            log::debug!("Job {}: agent {}", job_id, status);

            match status {
                AgentStatus::Stopped => {
                    self.state = AgentState::Stopped;
                    progress.on_agent_status(status, last_log.as_deref());
                    log::info!("Agent finished job {}", job_id);
                    return Ok(());
                }
                AgentStatus::Running => {
                    reboot_since = None;
                    self.state = AgentState::Running;
                }
                AgentStatus::Rebooting => {
                    reboot_since.get_or_insert(now);
                    self.state = AgentState::Rebooting;
                }
                AgentStatus::Unreachable => match reboot_since {
                    None => {
                        log::info!("Target unreachable, assuming reboot");
                        reboot_since = Some(now);
                        self.state = AgentState::Rebooting;
                    }
                    Some(since) => {
                        let elapsed = now.duration_since(since);
                        if elapsed > options.reboot_timeout {
                            return Err(Error::AgentUnreachable {
                                job_id,
                                elapsed,
                                last_log,
                            });
                        }
                    }
                },
                AgentStatus::Commanded => {}
            }

            if let Some(path) = &options.report_status_path
                && status != AgentStatus::Unreachable
            {
                match self.target.read_to_string(path) {
                    Ok(text) => {
                        if let Some(line) = last_line(&text) {
                            last_log = Some(line.to_string());
                        }
                    }
                    Err(e) => log::debug!("Cannot read {}: {}", path, e),
                }
            }
            progress.on_agent_status(status, last_log.as_deref());

            let waited = now.duration_since(started);
            if let Some(max_wait) = options.max_wait
                && waited >= max_wait
            {
                return Err(Error::AgentTimeout { job_id, waited });
            }

            self.clock.sleep(options.poll_interval);
        }
    }
}
