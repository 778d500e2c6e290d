//! # reconcile
//!
//! Bring a target's installed units in line with a desired model through
//! an unreliable, reboot-prone remote agent.
//!
//! ## Core Concepts
//!
//! - **Manifest**: units observed on the target
//! - **DesiredModel**: `install NAME=VERSION` directives
//! - **Operation**: install, remove or replace of one unit
//! - **WorkOrder**: ordered operations plus content, shipped to the target
//! - **JobResult**: per-operation outcomes reported by the agent
//!
//! A job runs these components in order:
//!
//! 1. [`ManifestDiffEngine`] computes operations
//! 2. [`UpdatePlanBuilder`] moves critical units first and fetches content
//! 3. [`ContentTransferChannel`] ships content and `workorder.json`
//! 4. [`RemoteAgentController`] commands the agent and waits, riding out reboots
//! 5. [`ResultCollector`] reads `result.json` and unit logs back
//!
//! [`Reconciler`] wires them together.
//!
//! ## Example
//!
//! ```no_run
//! use reconcile::{DesiredModel, NoProgress, ReconcileOptions, Reconciler};
//! use remote::LocalTarget;
//! use unitrepo::DirRepository;
//!
//! let repo = DirRepository::open("/srv/packages").unwrap();
//! let target = LocalTarget::new("/mnt/targets/web01");
//! let model = DesiredModel::parse("install patchbay-agent\ninstall office=16.0\n").unwrap();
//!
//! let outcome = Reconciler::new(&repo, &target)
//!     .run(&model, &ReconcileOptions::default(), &mut NoProgress)
//!     .unwrap();
//! match outcome.verdict() {
//!     Ok(()) => println!("now at:\n{}", outcome.model),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod collect;
pub mod context;
pub mod descriptor;
pub mod diff;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod planner;
pub mod rehearsal;
pub mod session;
pub mod transfer;
pub mod types;

pub use agent::{AgentState, RemoteAgentController, WaitOptions};
pub use collect::ResultCollector;
pub use context::{Clock, ManualClock, NoProgress, ProgressCallback, Stage, SystemClock};
pub use descriptor::{RequestDocument, ResultDocument};
pub use diff::{DiffSummary, ManifestDiffEngine};
pub use error::{Error, ErrorCategory, Result};
pub use model::{DesiredModel, Directive};
pub use pipeline::{JobOutcome, ReconcileOptions, Reconciler};
pub use planner::{PlannedOperation, UpdatePlanBuilder, WorkOrder};
pub use rehearsal::SimulatedAgent;
pub use session::TargetSession;
pub use transfer::{ContentTransferChannel, TransferReport};
pub use types::{
    AgentStatus, EntryStatus, JobResult, Manifest, ManifestEntry, Operation, OperationKind,
    OperationOutcome,
};
