//! Channel traits for talking to a target.
//!
//! A target exposes two narrow channels:
//! - [`ControlChannel`]: a key/value store plus a way to start a service
//! - [`FileChannel`]: enough of a filesystem to stage content and read results
//!
//! Paths on the target are `/`-separated strings relative to the channel
//! root, independent of the local platform.

use crate::error::{Error, Result};
use std::io::{Read, Write};

/// Key/value control channel on the target.
pub trait ControlChannel: Send + Sync {
    /// Write a named value under a key path.
    fn write_key(&self, path: &str, name: &str, value: &str) -> Result<()>;

    /// Read a named value under a key path.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyNotFound` if the value does not exist.
    fn read_key(&self, path: &str, name: &str) -> Result<String>;

    /// Ask the target to start a service.
    fn start_service(&self, service: &str) -> Result<()>;

    /// Read a value, mapping a missing key to `None`.
    fn read_key_opt(&self, path: &str, name: &str) -> Result<Option<String>> {
        match self.read_key(path, name) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// File channel on the target.
pub trait FileChannel: Send + Sync {
    /// Create a directory and any missing parents.
    fn mkdir(&self, path: &str) -> Result<()>;

    /// Open a file for reading.
    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send + '_>>;

    /// Create (or truncate) a file for writing.
    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send + '_>>;

    /// Check whether a file or directory exists.
    fn exists(&self, path: &str) -> Result<bool>;

    /// Free bytes available to the filesystem holding `path`.
    fn free_bytes(&self, path: &str) -> Result<u64>;

    /// Read a whole file as UTF-8 text (lossy).
    fn read_to_string(&self, path: &str) -> Result<String> {
        let mut reader = self.open_read(path)?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| Error::io(path, e))?;
        Ok(String::from_utf8_lossy(&buf).to_string())
    }

    /// Write a whole file.
    fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let mut writer = self.open_write(path)?;
        writer.write_all(bytes).map_err(|e| Error::io(path, e))?;
        writer.flush().map_err(|e| Error::io(path, e))
    }
}

/// A managed machine reachable through both channels.
pub trait Target: ControlChannel + FileChannel {
    /// Short human-readable description (e.g., "local:/mnt/web01").
    fn describe(&self) -> String;
}

/// Join two target paths with a single `/`.
pub fn join(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if base.is_empty() {
        child.to_string()
    } else if child.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{child}")
    }
}

/// Split a target path into validated segments.
///
/// Rejects empty paths and `.`/`..` segments so a channel can never escape
/// its root.
pub fn segments(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        return Err(Error::InvalidPath(path.to_string()));
    }
    if parts.iter().any(|s| *s == "." || *s == "..") {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(parts)
}
