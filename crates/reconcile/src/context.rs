//! Progress reporting and time source
//!
//! These traits keep the pipeline independent of any terminal UI and of
//! wall-clock time.

use crate::types::AgentStatus;
use std::cell::Cell;
use std::fmt;
use std::time::{Duration, Instant};
use unitrepo::PackageRef;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading facts and the manifest from the target
    Discover,
    /// Comparing manifest and model
    Diff,
    /// Building the work order
    Plan,
    /// Copying content and the request descriptor
    Transfer,
    /// Commanding the agent
    Start,
    /// Polling the agent
    Wait,
    /// Reading the result document
    Collect,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Discover => "discover",
            Self::Diff => "diff",
            Self::Plan => "plan",
            Self::Transfer => "transfer",
            Self::Start => "start",
            Self::Wait => "wait",
            Self::Collect => "collect",
        };
        write!(f, "{label}")
    }
}

/// Progress callback for reconciliation jobs
///
/// Implement this trait to receive progress updates during a job.
pub trait ProgressCallback {
    /// Called when a stage begins
    fn on_stage(&mut self, stage: Stage, detail: &str);

    /// Called before the first byte is copied
    fn on_transfer_start(&mut self, units: usize, total_bytes: u64);

    /// Called while a unit's payload is copied, at most once per interval
    fn on_transfer_progress(&mut self, unit: &PackageRef, copied: u64, total: u64);

    /// Called after the request descriptor is written
    fn on_transfer_complete(&mut self);

    /// Called after every status poll
    fn on_agent_status(&mut self, status: AgentStatus, log_tail: Option<&str>);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_stage(&mut self, _stage: Stage, _detail: &str) {}
    fn on_transfer_start(&mut self, _units: usize, _total_bytes: u64) {}
    fn on_transfer_progress(&mut self, _unit: &PackageRef, _copied: u64, _total: u64) {}
    fn on_transfer_complete(&mut self) {}
    fn on_agent_status(&mut self, _status: AgentStatus, _log_tail: Option<&str>) {}
}

/// Source of time for polling loops
pub trait Clock {
    /// Current instant
    fn now(&self) -> Instant;

    /// Block for `duration`
    fn sleep(&self, duration: Duration);
}

/// Real time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when slept on
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    offset: Cell<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
    }

    /// Time slept since creation
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
