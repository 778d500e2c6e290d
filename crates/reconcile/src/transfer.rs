//! Content transfer to the target
//!
//! A work order is shipped in three steps:
//! 1. pre-flight: every payload and the whole order must fit
//! 2. copy: each unit gets `<job dir>/<unit id>/` and its payload
//! 3. ready: `workorder.json` is written last
//!
//! Any failure aborts the job before the agent is started. Directories
//! already created are left in place for inspection.

use crate::context::ProgressCallback;
use crate::descriptor::{REQUEST_FILE, RequestDocument};
use crate::error::{Error, Result};
use crate::planner::{PlannedOperation, WorkOrder};
use remote::retry::LogCallback;
use remote::{FileChannel, RetryConfig, join, with_retry};
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use unitrepo::ContentBlob;

/// The target must have this many times a payload's size free.
pub const CAPACITY_SAFETY_FACTOR: u64 = 3;

const CHUNK_SIZE: usize = 64 * 1024;

/// Whether `size_bytes` fits into `free_bytes` with the safety factor.
pub fn has_capacity(size_bytes: u64, free_bytes: u64) -> bool {
    size_bytes
        .checked_mul(CAPACITY_SAFETY_FACTOR)
        .is_some_and(|required| required <= free_bytes)
}

/// What a transfer shipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Payloads copied
    pub units: usize,
    /// Bytes copied
    pub bytes: u64,
    /// Path of the request descriptor on the target
    pub request_path: String,
}

/// Copies work order content over a file channel
pub struct ContentTransferChannel<'a> {
    files: &'a dyn FileChannel,
    retry: RetryConfig,
    progress_interval: Duration,
}

impl<'a> ContentTransferChannel<'a> {
    /// Create a transfer channel over `files`
    pub fn new(files: &'a dyn FileChannel) -> Self {
        Self {
            files,
            retry: RetryConfig::default(),
            progress_interval: Duration::from_secs(1),
        }
    }

    /// Retry policy for directory creation
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Minimum time between progress callbacks for one payload
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Check whether `destination` can take `blob` with the safety factor.
    ///
    /// # Errors
    ///
    /// Returns `Error::Remote` if the free space cannot be queried.
    pub fn verify_capacity(&self, blob: &ContentBlob, destination: &str) -> Result<bool> {
        let free = self.free_bytes(destination)?;
        Ok(has_capacity(blob.size_bytes, free))
    }

    /// Ship a work order into `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InsufficientSpace` if the pre-flight check fails and
    /// `Error::Transfer` if copying or writing the descriptor fails.
    pub fn transfer(
        &self,
        work_order: &WorkOrder,
        root: &str,
        progress: &mut dyn ProgressCallback,
    ) -> Result<TransferReport> {
        self.preflight(work_order, root)?;

        let job_id = work_order.job_id.as_str();
        let payloads = work_order
            .operations
            .iter()
            .filter(|p| p.content.as_ref().is_some_and(ContentBlob::has_content))
            .count();
        progress.on_transfer_start(payloads, work_order.total_bytes());

        self.mkdir(root)
            .map_err(|e| transfer_error(job_id, root, &e))?;

        let mut report = TransferReport {
            units: 0,
            bytes: 0,
            request_path: join(root, REQUEST_FILE),
        };

        for planned in &work_order.operations {
            let unit_dir = join(root, &planned.unit().unit_id());
            self.mkdir(&unit_dir)
                .map_err(|e| transfer_error(job_id, &planned.unit().to_string(), &e))?;

            if let Some(blob) = planned.content.as_ref().filter(|b| b.has_content()) {
                let copied = self.copy_blob(job_id, planned, blob, &unit_dir, progress)?;
                report.units += 1;
                report.bytes += copied;
            }
        }

        let document = RequestDocument::from_work_order(work_order).to_json()?;
        self.files
            .write_file(&report.request_path, document.as_bytes())
            .map_err(|e| transfer_error(job_id, REQUEST_FILE, &e))?;
        progress.on_transfer_complete();

        log::info!(
            "Transferred {} payloads ({} bytes) for job {}",
            report.units,
            report.bytes,
            job_id
        );
        Ok(report)
    }

    fn preflight(&self, work_order: &WorkOrder, root: &str) -> Result<()> {
        let free = self.free_bytes(root)?;

        for planned in &work_order.operations {
            if let Some(blob) = &planned.content
                && !has_capacity(blob.size_bytes, free)
            {
                return Err(Error::InsufficientSpace {
                    job_id: work_order.job_id.clone(),
                    what: planned.unit().to_string(),
                    required: blob.size_bytes.saturating_mul(CAPACITY_SAFETY_FACTOR),
                    available: free,
                });
            }
        }

        let total = work_order.total_bytes();
        if !has_capacity(total, free) {
            return Err(Error::InsufficientSpace {
                job_id: work_order.job_id.clone(),
                what: "work order".to_string(),
                required: total.saturating_mul(CAPACITY_SAFETY_FACTOR),
                available: free,
            });
        }

        log::debug!("Pre-flight ok: {} bytes to ship, {} free", total, free);
        Ok(())
    }

    fn free_bytes(&self, path: &str) -> Result<u64> {
        Ok(with_retry(&self.retry, Some(&LogCallback), || {
            self.files.free_bytes(path)
        })?)
    }

    fn mkdir(&self, path: &str) -> remote::Result<()> {
        with_retry(&self.retry, Some(&LogCallback), || self.files.mkdir(path))
    }

    fn copy_blob(
        &self,
        job_id: &str,
        planned: &PlannedOperation,
        blob: &ContentBlob,
        unit_dir: &str,
        progress: &mut dyn ProgressCallback,
    ) -> Result<u64> {
        let unit = planned.unit();
        let fail = |message: String| Error::Transfer {
            job_id: job_id.to_string(),
            unit: unit.to_string(),
            message,
        };

        let Some(source) = &blob.source else {
            return Ok(0);
        };
        let mut reader = source.open().map_err(|e| fail(e.to_string()))?;
        let destination = join(unit_dir, &blob.payload_name);
        let mut writer = self
            .files
            .open_write(&destination)
            .map_err(|e| fail(e.to_string()))?;

        log::debug!("Copying {} -> {}", blob.payload_name, destination);
        let mut throttle = Throttle::new(self.progress_interval);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut copied = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| fail(format!("read failed: {e}")))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .map_err(|e| fail(format!("write to {destination} failed: {e}")))?;
            copied += n as u64;
            if throttle.ready() {
                progress.on_transfer_progress(unit, copied, blob.size_bytes);
            }
        }
        writer
            .flush()
            .map_err(|e| fail(format!("flush of {destination} failed: {e}")))?;

        if copied != blob.size_bytes {
            return Err(fail(format!(
                "copied {copied} bytes, expected {}",
                blob.size_bytes
            )));
        }
        if throttle.skipped_last {
            progress.on_transfer_progress(unit, copied, blob.size_bytes);
        }
        Ok(copied)
    }
}

fn transfer_error(job_id: &str, what: &str, err: &remote::Error) -> Error {
    Error::Transfer {
        job_id: job_id.to_string(),
        unit: what.to_string(),
        message: err.to_string(),
    }
}

/// Lets a callback through at most once per interval.
struct Throttle {
    interval: Duration,
    last: Option<Instant>,
    skipped_last: bool,
}

impl Throttle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            skipped_last: false,
        }
    }

    fn ready(&mut self) -> bool {
        let now = Instant::now();
        let due = self
            .last
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
        }
        self.skipped_last = !due;
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::planner::UpdatePlanBuilder;
    use crate::types::{AgentStatus, Operation};
    use remote::MemoryTarget;
    use unitrepo::{MockRepository, PackageRef};

    #[derive(Default)]
    struct Recorder {
        progress_calls: Vec<(String, u64, u64)>,
        completed: bool,
    }

    impl ProgressCallback for Recorder {
        fn on_stage(&mut self, _stage: crate::context::Stage, _detail: &str) {}
        fn on_transfer_start(&mut self, _units: usize, _total_bytes: u64) {}
        fn on_transfer_progress(&mut self, unit: &PackageRef, copied: u64, total: u64) {
            self.progress_calls.push((unit.name.clone(), copied, total));
        }
        fn on_transfer_complete(&mut self) {
            self.completed = true;
        }
        fn on_agent_status(&mut self, _status: AgentStatus, _log_tail: Option<&str>) {}
    }

    fn work_order() -> WorkOrder {
        let repo = MockRepository::new()
            .with_unit("app", "2.0", "x64", vec![7u8; 200_000])
            .with_unit("tools", "1.0", "x64", vec![1u8; 100]);
        UpdatePlanBuilder::new(&repo)
            .with_job_id(Some("job-1".to_string()))
            .build(vec![
                Operation::install(PackageRef::new("app", "2.0", "x64")),
                Operation::install(PackageRef::new("tools", "1.0", "x64")),
                Operation::remove(PackageRef::new("legacy", "1.0", "x64")),
            ])
            .unwrap()
    }

    fn fast() -> RetryConfig {
        RetryConfig::new(3, Duration::from_millis(1), 1.0)
    }

    #[test]
    fn test_has_capacity_boundary() {
        assert!(has_capacity(100, 300));
        assert!(!has_capacity(100, 299));
        assert!(has_capacity(0, 0));
        assert!(!has_capacity(u64::MAX, u64::MAX));
    }

    #[test]
    fn test_verify_capacity() {
        let blob = ContentBlob::from_bytes(PackageRef::new("a", "1", ""), "a.pkg", vec![0; 100]);

        let target = MemoryTarget::new("t").with_free_bytes(300);
        let channel = ContentTransferChannel::new(&target);
        assert!(channel.verify_capacity(&blob, "updates").unwrap());

        let target = MemoryTarget::new("t").with_free_bytes(299);
        let channel = ContentTransferChannel::new(&target);
        assert!(!channel.verify_capacity(&blob, "updates").unwrap());
    }

    #[test]
    fn test_transfer_layout() {
        let target = MemoryTarget::new("t");
        let work_order = work_order();
        let mut recorder = Recorder::default();
        let report = ContentTransferChannel::new(&target)
            .with_retry(fast())
            .transfer(&work_order, "updates/job-1", &mut recorder)
            .unwrap();

        assert_eq!(report.units, 2);
        assert_eq!(report.bytes, 200_100);
        assert_eq!(report.request_path, "updates/job-1/workorder.json");
        assert!(recorder.completed);

        let app = PackageRef::new("app", "2.0", "x64");
        let payload = target
            .file(&format!("updates/job-1/{}/app-2.0.pkg", app.unit_id()))
            .unwrap();
        assert_eq!(payload.len(), 200_000);

        // Removals get a directory for their log but no payload
        let legacy = PackageRef::new("legacy", "1.0", "x64");
        assert!(target.exists(&format!("updates/job-1/{}", legacy.unit_id())).unwrap());

        let request = target.read_to_string("updates/job-1/workorder.json").unwrap();
        let doc = RequestDocument::from_json(&request, "job-1").unwrap();
        assert_eq!(doc.operations.len(), 3);
    }

    #[test]
    fn test_progress_is_throttled() {
        let target = MemoryTarget::new("t");
        let mut recorder = Recorder::default();
        ContentTransferChannel::new(&target)
            .with_retry(fast())
            .with_progress_interval(Duration::from_secs(3600))
            .transfer(&work_order(), "updates/job-1", &mut recorder)
            .unwrap();

        // The 200 kB payload spans several chunks: first chunk plus final total
        let app_calls: Vec<_> = recorder
            .progress_calls
            .iter()
            .filter(|(name, _, _)| name == "app")
            .collect();
        assert_eq!(app_calls.len(), 2);
        assert_eq!(app_calls[1].1, 200_000);
    }

    #[test]
    fn test_insufficient_space_copies_nothing() {
        let target = MemoryTarget::new("t").with_free_bytes(500_000);
        let err = ContentTransferChannel::new(&target)
            .with_retry(fast())
            .transfer(&work_order(), "updates/job-1", &mut NoProgress)
            .unwrap_err();

        match err {
            Error::InsufficientSpace { what, required, .. } => {
                assert_eq!(what, "app@2.0/x64");
                assert_eq!(required, 600_000);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(target.file_paths().is_empty());
    }

    #[test]
    fn test_aggregate_capacity_checked() {
        // Each payload fits on its own, both together do not
        let target = MemoryTarget::new("t").with_free_bytes(600_200);
        let err = ContentTransferChannel::new(&target)
            .with_retry(fast())
            .transfer(&work_order(), "updates/job-1", &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientSpace { ref what, .. } if what == "work order"));
    }

    #[test]
    fn test_copy_failure_aborts_before_descriptor() {
        let target = MemoryTarget::new("t").with_failing_writes("tools-1.0");
        let err = ContentTransferChannel::new(&target)
            .with_retry(fast())
            .transfer(&work_order(), "updates/job-1", &mut NoProgress)
            .unwrap_err();

        assert!(matches!(err, Error::Transfer { ref unit, .. } if unit == "tools@1.0/x64"));
        assert!(err.is_safe_to_retry());
        assert!(target.file("updates/job-1/workorder.json").is_none());
    }
}
