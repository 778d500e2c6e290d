//! # remote
//!
//! Channels to a managed target.
//!
//! Reconciliation talks to a target through two narrow channels: a
//! key/value [`ControlChannel`] (command directives, status flags, persisted
//! snapshots) and a [`FileChannel`] (staging content, reading results back).
//! Transports are pluggable behind the [`Target`] trait.
//!
//! ## Example
//!
//! ```no_run
//! use remote::{ControlChannel, FileChannel, LocalTarget};
//!
//! let target = LocalTarget::new("/mnt/targets/web01");
//! target.write_key("Software/Patchbay", "flavor", "x64").unwrap();
//! target.mkdir("updates/job-1").unwrap();
//! println!("{} bytes free", target.free_bytes("updates/job-1").unwrap());
//! ```
//!
//! ## Retry Logic
//!
//! An unreachable target is the one transient failure. Wrap channel calls
//! in [`retry::with_retry`] to ride out short outages.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod channel;
pub mod error;
pub mod retry;

pub use backend::local::LocalTarget;
pub use backend::memory::{MemoryTarget, Reply};
pub use channel::{ControlChannel, FileChannel, Target, join};
pub use error::{Error, ErrorCategory, Result};
pub use retry::{RetryConfig, with_retry};
