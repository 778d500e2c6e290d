//! Directory-backed repository.
//!
//! Layout: `<root>/<name>/<version>/<variant>/<payload>`, exactly one
//! payload file per variant directory. A variant directory named `any`
//! publishes a unit that fits every variant.

use crate::backend::{PackageRepository, select_unit};
use crate::error::{Error, Result};
use crate::types::{ContentBlob, PackageRef, VersionSpec};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory name for units that are not variant specific.
pub const NEUTRAL_VARIANT_DIR: &str = "any";

/// Repository reading units from a directory tree.
#[derive(Debug, Clone)]
pub struct DirRepository {
    root: PathBuf,
}

impl DirRepository {
    /// Open a repository rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::InvalidLayout {
                path: root,
                message: "repository root is not a directory".to_string(),
            });
        }
        Ok(Self { root })
    }

    /// Repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unit_dir(&self, unit: &PackageRef) -> PathBuf {
        let variant = if unit.variant.is_empty() {
            NEUTRAL_VARIANT_DIR
        } else {
            unit.variant.as_str()
        };
        self.root.join(&unit.name).join(&unit.version).join(variant)
    }

    /// Walk the tree and collect every unit.
    fn index(&self) -> Result<Vec<PackageRef>> {
        let mut units = Vec::new();

        for entry in WalkDir::new(&self.root)
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                Error::io(path, e.into())
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| Error::InvalidLayout {
                    path: entry.path().to_path_buf(),
                    message: "entry outside repository root".to_string(),
                })?;
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            if let [name, version, variant] = parts.as_slice() {
                let variant = if variant == NEUTRAL_VARIANT_DIR {
                    String::new()
                } else {
                    variant.clone()
                };
                units.push(PackageRef::new(name, version, variant));
            }
        }

        log::debug!("Indexed {} units under {}", units.len(), self.root.display());
        Ok(units)
    }
}

impl PackageRepository for DirRepository {
    fn resolve(&self, name: &str, version: &VersionSpec, variant: &str) -> Result<PackageRef> {
        let units = self.index()?;
        select_unit(&units, name, version, variant)
    }

    fn fetch_content(&self, unit: &PackageRef) -> Result<ContentBlob> {
        let dir = self.unit_dir(unit);
        if !dir.is_dir() {
            return Err(Error::NoPayload {
                unit: unit.to_string(),
            });
        }

        let mut payloads = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))? {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let metadata = entry.metadata().map_err(|e| Error::io(entry.path(), e))?;
            if metadata.is_file() {
                payloads.push((entry.path(), metadata.len()));
            }
        }

        match payloads.as_slice() {
            [] => Err(Error::NoPayload {
                unit: unit.to_string(),
            }),
            [(path, size)] => {
                let payload_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                Ok(ContentBlob::from_file(
                    unit.clone(),
                    payload_name,
                    path.clone(),
                    *size,
                ))
            }
            _ => Err(Error::InvalidLayout {
                path: dir,
                message: format!("expected one payload, found {}", payloads.len()),
            }),
        }
    }

    fn list_units(&self) -> Result<Vec<PackageRef>> {
        self.index()
    }
}
