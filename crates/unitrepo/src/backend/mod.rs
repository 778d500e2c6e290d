//! Repository backends.
//!
//! The [`PackageRepository`] trait is the boundary to wherever payloads
//! live. [`dir::DirRepository`] reads a directory tree; [`MockRepository`]
//! keeps everything in memory for tests.

pub mod dir;

use crate::error::{Error, Result};
use crate::types::{ContentBlob, PackageRef, VersionSpec};
use crate::version::compare_versions;
use std::collections::HashMap;

/// Read-only lookup of units and their payloads.
pub trait PackageRepository: Send + Sync {
    /// Resolve a name, version spec and variant to a concrete unit.
    ///
    /// A unit published without a variant matches any requested variant,
    /// but an exact variant match is preferred.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if nothing matches.
    fn resolve(&self, name: &str, version: &VersionSpec, variant: &str) -> Result<PackageRef>;

    /// Fetch payload metadata and content for a resolved unit.
    fn fetch_content(&self, unit: &PackageRef) -> Result<ContentBlob>;

    /// List every unit the repository knows about.
    fn list_units(&self) -> Result<Vec<PackageRef>>;
}

/// Pick the best candidate for a request.
pub(crate) fn select_unit<'a>(
    candidates: impl IntoIterator<Item = &'a PackageRef>,
    name: &str,
    version: &VersionSpec,
    variant: &str,
) -> Result<PackageRef> {
    let matching: Vec<&PackageRef> = candidates
        .into_iter()
        .filter(|unit| unit.name == name)
        .filter(|unit| unit.variant == variant || unit.variant.is_empty())
        .filter(|unit| match version {
            VersionSpec::Latest => true,
            VersionSpec::Exact(v) => &unit.version == v,
        })
        .collect();

    // Exact variant beats a neutral one; among equals the newest version wins
    matching
        .into_iter()
        .max_by(|a, b| {
            let a_exact = a.variant == variant;
            let b_exact = b.variant == variant;
            a_exact
                .cmp(&b_exact)
                .then_with(|| compare_versions(&a.version, &b.version))
        })
        .cloned()
        .ok_or_else(|| Error::NotFound {
            name: name.to_string(),
            version: version.to_string(),
            variant: variant.to_string(),
        })
}

/// In-memory repository for tests.
#[derive(Debug, Clone, Default)]
pub struct MockRepository {
    units: HashMap<PackageRef, (String, Vec<u8>)>,
}

impl MockRepository {
    /// Create an empty mock repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a unit with the given payload bytes.
    pub fn add_unit(&mut self, unit: PackageRef, bytes: Vec<u8>) {
        let payload_name = format!("{}-{}.pkg", unit.name.replace(':', "_"), unit.version);
        self.units.insert(unit, (payload_name, bytes));
    }

    /// Builder form of [`MockRepository::add_unit`].
    pub fn with_unit(
        mut self,
        name: &str,
        version: &str,
        variant: &str,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        self.add_unit(PackageRef::new(name, version, variant), bytes.into());
        self
    }
}

impl PackageRepository for MockRepository {
    fn resolve(&self, name: &str, version: &VersionSpec, variant: &str) -> Result<PackageRef> {
        select_unit(self.units.keys(), name, version, variant)
    }

    fn fetch_content(&self, unit: &PackageRef) -> Result<ContentBlob> {
        let (payload_name, bytes) = self.units.get(unit).ok_or_else(|| Error::NoPayload {
            unit: unit.to_string(),
        })?;
        Ok(ContentBlob::from_bytes(
            unit.clone(),
            payload_name.clone(),
            bytes.clone(),
        ))
    }

    fn list_units(&self) -> Result<Vec<PackageRef>> {
        let mut units: Vec<PackageRef> = self.units.keys().cloned().collect();
        units.sort();
        Ok(units)
    }
}
