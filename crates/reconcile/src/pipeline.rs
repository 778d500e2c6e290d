//! The reconciliation pipeline
//!
//! discover -> diff -> plan -> transfer -> start -> wait -> collect
//!
//! Stages run strictly in order against one target. The manifest on the
//! target is only advanced after a fully successful job.

use crate::agent::{DEFAULT_SERVICE, RemoteAgentController, WaitOptions};
use crate::collect::ResultCollector;
use crate::context::{Clock, ProgressCallback, Stage, SystemClock};
use crate::descriptor::{REQUEST_FILE, RequestDocument};
use crate::diff::{DiffSummary, ManifestDiffEngine};
use crate::error::{Error, Result};
use crate::model::DesiredModel;
use crate::planner::{DEFAULT_CRITICAL_UNIT, UpdatePlanBuilder, WorkOrder, validate_job_id};
use crate::session::TargetSession;
use crate::transfer::{ContentTransferChannel, TransferReport};
use crate::types::{JobResult, Manifest};
use chrono::Utc;
use remote::{FileChannel, RetryConfig, Target, join};
use unitrepo::PackageRepository;

static SYSTEM_CLOCK: SystemClock = SystemClock;

/// Options for one job
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Variant to use instead of the target's flavor
    pub variant: Option<String>,
    /// Unit names applied before everything else
    pub critical_units: Vec<String>,
    /// Job id to use instead of a fresh one
    pub job_id: Option<String>,
    /// Stop after planning
    pub plan_only: bool,
    /// Agent service name
    pub service: String,
    /// How to wait for the agent
    pub wait: WaitOptions,
    /// Retry policy for transient transport errors
    pub retry: RetryConfig,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            variant: None,
            critical_units: vec![DEFAULT_CRITICAL_UNIT.to_string()],
            job_id: None,
            plan_only: false,
            service: DEFAULT_SERVICE.to_string(),
            wait: WaitOptions::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// What a job produced
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// The work order that was (or would be) executed
    pub work_order: WorkOrder,
    /// Per-operation result, `None` for a plan-only run
    pub result: Option<JobResult>,
    /// Manifest after the job (unchanged unless the job succeeded)
    pub manifest: Manifest,
    /// Declarative model matching `manifest`
    pub model: String,
    /// What was shipped, if anything
    pub transferred: Option<TransferReport>,
    /// Whether the advanced manifest was written back to the target
    pub persisted: bool,
}

impl JobOutcome {
    /// Whether the job changed nothing because nothing needed changing
    pub fn is_noop(&self) -> bool {
        self.work_order.is_empty()
    }

    /// Verdict of the job; a plan-only run always passes.
    pub fn verdict(&self) -> Result<()> {
        self.result.as_ref().map_or(Ok(()), JobResult::verdict)
    }
}

/// Runs reconciliation jobs against one target
pub struct Reconciler<'a> {
    repo: &'a dyn PackageRepository,
    target: &'a dyn Target,
    clock: &'a dyn Clock,
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler using real time
    pub fn new(repo: &'a dyn PackageRepository, target: &'a dyn Target) -> Self {
        Self {
            repo,
            target,
            clock: &SYSTEM_CLOCK,
        }
    }

    /// Use another clock for polling
    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Discover the target and plan a job without touching it.
    pub fn plan(
        &self,
        model: &DesiredModel,
        options: &ReconcileOptions,
        progress: &mut dyn ProgressCallback,
    ) -> Result<(TargetSession, WorkOrder)> {
        progress.on_stage(Stage::Discover, &self.target.describe());
        let session = TargetSession::discover(self.target, &options.retry)?
            .with_flavor(options.variant.as_deref());

        progress.on_stage(Stage::Diff, session.flavor());
        let operations =
            ManifestDiffEngine::new(self.repo).diff(session.manifest(), model, session.flavor())?;
        let summary = DiffSummary::from_operations(&operations);

        progress.on_stage(Stage::Plan, &summary.to_string());
        let work_order = UpdatePlanBuilder::new(self.repo)
            .with_critical_units(options.critical_units.iter().cloned())
            .with_job_id(options.job_id.clone())
            .build(operations)?;

        Ok((session, work_order))
    }

    /// Run a full job.
    ///
    /// Returns `Ok` once the agent's result has been collected, whatever it
    /// says; call [`JobOutcome::verdict`] for success or failure.
    ///
    /// # Errors
    ///
    /// Returns an error from whichever stage could not complete. See
    /// [`Error::category`] for what each means for the target.
    pub fn run(
        &self,
        model: &DesiredModel,
        options: &ReconcileOptions,
        progress: &mut dyn ProgressCallback,
    ) -> Result<JobOutcome> {
        let (mut session, work_order) = self.plan(model, options, progress)?;
        let current_model = DesiredModel::from_manifest(session.manifest()).render();

        if work_order.is_empty() {
            log::info!("{} already matches the model", self.target.describe());
            return Ok(JobOutcome {
                result: Some(JobResult::empty(&work_order.job_id)),
                work_order,
                manifest: session.manifest().clone(),
                model: current_model,
                transferred: None,
                persisted: false,
            });
        }

        if options.plan_only {
            return Ok(JobOutcome {
                work_order,
                result: None,
                manifest: session.manifest().clone(),
                model: current_model,
                transferred: None,
                persisted: false,
            });
        }

        let root = session.job_root(&work_order.job_id);
        progress.on_stage(Stage::Transfer, &root);
        let report = ContentTransferChannel::new(self.target)
            .with_retry(options.retry.clone())
            .transfer(&work_order, &root, progress)?;

        progress.on_stage(Stage::Start, &options.service);
        let mut controller = RemoteAgentController::new(self.target, self.clock)
            .with_service(&options.service)
            .with_retry(options.retry.clone());
        controller.start(&work_order)?;

        let mut outcome = self.finish(&mut session, controller, work_order, &root, options, progress)?;
        outcome.transferred = Some(report);
        Ok(outcome)
    }

    /// Re-poll and collect a job started earlier.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidJobId` for a malformed id, `Error::Descriptor`
    /// if the job's request descriptor cannot be read back, otherwise the same errors as the wait and collect stages.
    pub fn resume(
        &self,
        job_id: &str,
        options: &ReconcileOptions,
        progress: &mut dyn ProgressCallback,
    ) -> Result<JobOutcome> {
        validate_job_id(job_id)?;
        progress.on_stage(Stage::Discover, &self.target.describe());
        let mut session = TargetSession::discover(self.target, &options.retry)?;
        let root = session.job_root(job_id);

        let request_path = join(&root, REQUEST_FILE);
        let request = self
            .target
            .read_to_string(&request_path)
            .map_err(|e| Error::Descriptor {
                job_id: job_id.to_string(),
                message: format!("cannot read {request_path}: {e}"),
            })?;
        let work_order = RequestDocument::from_json(&request, job_id)?.into_work_order();
        log::info!("Resuming job {} ({} operations)", job_id, work_order.len());

        let mut controller = RemoteAgentController::new(self.target, self.clock)
            .with_service(&options.service)
            .with_retry(options.retry.clone());
        controller.attach(job_id);

        self.finish(&mut session, controller, work_order, &root, options, progress)
    }

    fn finish(
        &self,
        session: &mut TargetSession,
        mut controller: RemoteAgentController<'_>,
        work_order: WorkOrder,
        root: &str,
        options: &ReconcileOptions,
        progress: &mut dyn ProgressCallback,
    ) -> Result<JobOutcome> {
        progress.on_stage(Stage::Wait, &work_order.job_id);
        let wait = WaitOptions {
            report_status_path: options
                .wait
                .report_status_path
                .clone()
                .or_else(|| Some(join(root, &work_order.log_file_name))),
            ..options.wait.clone()
        };
        controller.wait_for_completion(&wait, progress)?;

        progress.on_stage(Stage::Collect, root);
        let result = ResultCollector::new(self.target).collect(root, &work_order)?;

        let mut manifest = session.manifest().clone();
        let mut persisted = false;
        if result.succeeded {
            manifest.advance(&work_order.operations(), Utc::now());
            let model = DesiredModel::from_manifest(&manifest).render();
            match session.persist(self.target, &options.retry, manifest.clone(), model) {
                Ok(()) => persisted = true,
                Err(e) => log::warn!("Job {} succeeded but the manifest was not saved: {}", work_order.job_id, e),
            }
        } else {
            log::warn!("Job {} did not succeed: {}", work_order.job_id, result.summary());
        }

        let model = DesiredModel::from_manifest(&manifest).render();
        Ok(JobOutcome {
            work_order,
            result: Some(result),
            manifest,
            model,
            transferred: None,
            persisted,
        })
    }
}
