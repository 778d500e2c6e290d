//! Core types for unit references and payload content.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;

/// Separator between a top-level unit name and a component name (`office:spell`).
pub const COMPONENT_SEPARATOR: char = ':';

/// Identity of a software unit.
///
/// Two references are equal only when name, version and variant all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageRef {
    /// Unit name (e.g., "patchbay-agent", "office:spell")
    pub name: String,
    /// Concrete version (e.g., "2.0.1")
    pub version: String,
    /// Variant such as an architecture or flavor (e.g., "x64")
    pub variant: String,
}

impl PackageRef {
    /// Create a new reference.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        variant: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            variant: variant.into(),
        }
    }

    /// Opaque, path-safe identifier for this unit.
    ///
    /// Used to name per-unit directories on the target so that unit names
    /// containing separators or unusual characters never collide.
    pub fn unit_id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.version.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.variant.as_bytes());
        let hex = hasher.finalize().to_hex();
        hex[..16].to_string()
    }

    /// Name of the top-level unit this component belongs to, if it is a component.
    pub fn component_parent(&self) -> Option<&str> {
        component_parent(&self.name)
    }

    /// Whether another reference names the same unit (ignoring version and variant).
    pub fn same_unit(&self, other: &PackageRef) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variant.is_empty() {
            write!(f, "{}@{}", self.name, self.version)
        } else {
            write!(f, "{}@{}/{}", self.name, self.version, self.variant)
        }
    }
}

/// Top-level unit name for a component name (`"office:spell"` -> `"office"`).
pub fn component_parent(name: &str) -> Option<&str> {
    name.split_once(COMPONENT_SEPARATOR)
        .map(|(parent, _)| parent)
        .filter(|parent| !parent.is_empty())
}

/// Requested version of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionSpec {
    /// Newest version available
    Latest,
    /// Exactly this version
    Exact(String),
}

impl VersionSpec {
    /// Parse a version spec; empty, `latest` and `*` mean [`VersionSpec::Latest`].
    pub fn parse(spec: Option<&str>) -> Self {
        match spec.map(str::trim) {
            None | Some("" | "latest" | "*") => Self::Latest,
            Some(v) => Self::Exact(v.to_string()),
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// Where the bytes of a payload come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// A file inside the repository
    File(PathBuf),
    /// An in-memory buffer
    Bytes(Vec<u8>),
}

impl ContentSource {
    /// Open the payload for reading.
    pub fn open(&self) -> Result<Box<dyn Read + '_>> {
        match self {
            Self::File(path) => {
                let file = File::open(path).map_err(|e| Error::io(path, e))?;
                Ok(Box::new(file))
            }
            Self::Bytes(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
        }
    }
}

/// Payload metadata and content for one unit.
///
/// A blob without a source belongs to a remove-only operation and needs no
/// transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBlob {
    /// Unit this payload installs
    pub unit: PackageRef,
    /// File name of the payload (e.g., "agent-2.0.msi")
    pub payload_name: String,
    /// Payload size in bytes
    pub size_bytes: u64,
    /// Byte source, `None` for removals
    pub source: Option<ContentSource>,
}

impl ContentBlob {
    /// Create a blob backed by an in-memory buffer.
    pub fn from_bytes(unit: PackageRef, payload_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            unit,
            payload_name: payload_name.into(),
            size_bytes: bytes.len() as u64,
            source: Some(ContentSource::Bytes(bytes)),
        }
    }

    /// Create a blob backed by a file.
    pub fn from_file(
        unit: PackageRef,
        payload_name: impl Into<String>,
        path: PathBuf,
        size_bytes: u64,
    ) -> Self {
        Self {
            unit,
            payload_name: payload_name.into(),
            size_bytes,
            source: Some(ContentSource::File(path)),
        }
    }

    /// Whether there are bytes to transfer.
    pub fn has_content(&self) -> bool {
        self.source.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_ref_equality_needs_all_fields() {
        let a = PackageRef::new("agent", "1.0", "x64");
        assert_eq!(a, PackageRef::new("agent", "1.0", "x64"));
        assert_ne!(a, PackageRef::new("agent", "1.0", "arm64"));
        assert_ne!(a, PackageRef::new("agent", "1.1", "x64"));
        assert!(a.same_unit(&PackageRef::new("agent", "1.1", "arm64")));
    }

    #[test]
    fn test_package_ref_display() {
        assert_eq!(PackageRef::new("agent", "1.0", "x64").to_string(), "agent@1.0/x64");
        assert_eq!(PackageRef::new("agent", "1.0", "").to_string(), "agent@1.0");
    }

    #[test]
    fn test_unit_id_is_opaque_and_stable() {
        let a = PackageRef::new("office:spell", "1.0", "x64");
        let id = a.unit_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, a.clone().unit_id());
        assert_ne!(id, PackageRef::new("office:spell", "1.1", "x64").unit_id());
    }

    #[test]
    fn test_component_parent() {
        assert_eq!(component_parent("office:spell"), Some("office"));
        assert_eq!(component_parent("office"), None);
        assert_eq!(component_parent(":spell"), None);
        assert_eq!(
            PackageRef::new("office:spell:en", "1", "").component_parent(),
            Some("office")
        );
    }

    #[test]
    fn test_version_spec_parse() {
        assert_eq!(VersionSpec::parse(None), VersionSpec::Latest);
        assert_eq!(VersionSpec::parse(Some("latest")), VersionSpec::Latest);
        assert_eq!(VersionSpec::parse(Some("")), VersionSpec::Latest);
        assert_eq!(
            VersionSpec::parse(Some("2.0")),
            VersionSpec::Exact("2.0".to_string())
        );
    }

    #[test]
    fn test_bytes_source_reads_back() {
        let blob = ContentBlob::from_bytes(PackageRef::new("a", "1", ""), "a.pkg", vec![1, 2, 3]);
        assert_eq!(blob.size_bytes, 3);
        let mut buf = Vec::new();
        blob.source.as_ref().unwrap().open().unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 2, 3]);
    }
}
