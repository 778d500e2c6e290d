//! # unitrepo
//!
//! Package repository lookup for reconciliation jobs.
//!
//! A repository answers two questions: which concrete unit does
//! `name = version` mean for a given variant, and what are the bytes of
//! that unit's payload.
//!
//! ## Example
//!
//! ```no_run
//! use unitrepo::{DirRepository, PackageRepository, VersionSpec};
//!
//! let repo = DirRepository::open("/srv/packages").expect("repository missing");
//! let unit = repo
//!     .resolve("patchbay-agent", &VersionSpec::Latest, "x64")
//!     .expect("not published");
//! let blob = repo.fetch_content(&unit).expect("no payload");
//! println!("{} -> {} ({} bytes)", unit, blob.payload_name, blob.size_bytes);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod types;
pub mod version;

pub use backend::dir::DirRepository;
pub use backend::{MockRepository, PackageRepository};
pub use error::{Error, ErrorCategory, Result};
pub use types::{
    COMPONENT_SEPARATOR, ContentBlob, ContentSource, PackageRef, VersionSpec, component_parent,
};
pub use version::compare_versions;
