//! Directory-backed target.
//!
//! Models a target whose storage is reachable as a local directory (a
//! mounted share, a staging volume). The directory holds:
//! - `control/<key path>.json`: control keys, one JSON object per key path
//! - `control/services/<service>.start`: service start requests
//! - `files/...`: the file channel root
//!
//! A missing root directory means the target is unreachable (share not
//! mounted, machine down).

use crate::channel::{ControlChannel, FileChannel, Target, segments};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Target rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalTarget {
    root: PathBuf,
    free_bytes_override: Option<u64>,
}

impl LocalTarget {
    /// Create a target rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            free_bytes_override: None,
        }
    }

    /// Report a fixed amount of free space instead of asking the filesystem.
    pub fn with_free_bytes(mut self, bytes: u64) -> Self {
        self.free_bytes_override = Some(bytes);
        self
    }

    /// Target root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a start request for `service` is dropped.
    pub fn service_request_path(&self, service: &str) -> PathBuf {
        self.root
            .join("control")
            .join("services")
            .join(format!("{service}.start"))
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(Error::unreachable(format!(
                "{} is not available",
                self.root.display()
            )))
        }
    }

    fn control_file(&self, path: &str) -> Result<PathBuf> {
        let parts = segments(path)?;
        let mut file = self.root.join("control");
        let (last, dirs) = parts
            .split_last()
            .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        for dir in dirs {
            file.push(dir);
        }
        file.push(format!("{last}.json"));
        Ok(file)
    }

    fn file_path(&self, path: &str) -> Result<PathBuf> {
        let mut file = self.root.join("files");
        for part in segments(path)? {
            file.push(part);
        }
        Ok(file)
    }

    fn load_keys(&self, file: &Path) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(file) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::io(file, e)),
        }
    }
}

impl ControlChannel for LocalTarget {
    fn write_key(&self, path: &str, name: &str, value: &str) -> Result<()> {
        self.ensure_reachable()?;
        let file = self.control_file(path)?;
        let mut keys = self.load_keys(&file)?;
        keys.insert(name.to_string(), value.to_string());

        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        // Write then rename so a concurrent reader never sees half a document
        let tmp = file.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&keys)?;
        fs::write(&tmp, content).map_err(|e| Error::io(&tmp, e))?;
        fs::rename(&tmp, &file).map_err(|e| Error::io(&file, e))?;

        log::trace!("Wrote key {}\\{} on {}", path, name, self.describe());
        Ok(())
    }

    fn read_key(&self, path: &str, name: &str) -> Result<String> {
        self.ensure_reachable()?;
        let file = self.control_file(path)?;
        let keys = self.load_keys(&file)?;
        keys.get(name).cloned().ok_or_else(|| Error::KeyNotFound {
            path: path.to_string(),
            name: name.to_string(),
        })
    }

    fn start_service(&self, service: &str) -> Result<()> {
        self.ensure_reachable()?;
        segments(service)?;
        let request = self.service_request_path(service);
        if let Some(parent) = request.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::write(&request, "start\n").map_err(|e| Error::io(&request, e))?;
        log::debug!("Requested start of {} on {}", service, self.describe());
        Ok(())
    }
}

impl FileChannel for LocalTarget {
    fn mkdir(&self, path: &str) -> Result<()> {
        self.ensure_reachable()?;
        let dir = self.file_path(path)?;
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send + '_>> {
        self.ensure_reachable()?;
        let file = self.file_path(path)?;
        match File::open(&file) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FileNotFound(path.to_string()))
            }
            Err(e) => Err(Error::io(&file, e)),
        }
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send + '_>> {
        self.ensure_reachable()?;
        let file = self.file_path(path)?;
        let f = File::create(&file).map_err(|e| Error::io(&file, e))?;
        Ok(Box::new(f))
    }

    fn exists(&self, path: &str) -> Result<bool> {
        self.ensure_reachable()?;
        Ok(self.file_path(path)?.exists())
    }

    fn free_bytes(&self, path: &str) -> Result<u64> {
        self.ensure_reachable()?;
        if let Some(bytes) = self.free_bytes_override {
            return Ok(bytes);
        }

        // Nearest existing ancestor; the destination is usually not created yet
        let mut probe = self.file_path(path)?;
        while !probe.exists() {
            if !probe.pop() {
                break;
            }
        }
        if !probe.starts_with(&self.root) {
            probe = self.root.clone();
        }
        available_space(&probe)
    }
}

impl Target for LocalTarget {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}

#[cfg(unix)]
fn available_space(path: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::InvalidPath(path.display().to_string()))?;

    // SAFETY: statvfs is a standard POSIX call
    let available = unsafe {
        let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
        if libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) != 0 {
            return Err(Error::io(path, std::io::Error::last_os_error()));
        }
        let stat = stat.assume_init();

        // Cast needed on macOS, not on Linux
        #[allow(clippy::unnecessary_cast)]
        let avail = stat.f_bavail as u64 * stat.f_frsize as u64;
        avail
    };

    Ok(available)
}

#[cfg(not(unix))]
fn available_space(path: &Path) -> Result<u64> {
    Err(Error::Other(format!(
        "free space query not supported for {}; set free_bytes in the target config",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target() -> (TempDir, LocalTarget) {
        let tmp = TempDir::new().unwrap();
        let target = LocalTarget::new(tmp.path());
        (tmp, target)
    }

    #[test]
    fn test_keys_round_trip() {
        let (_tmp, target) = target();
        target.write_key("Software/Patchbay", "flavor", "x64").unwrap();
        target.write_key("Software/Patchbay", "update_dir", "updates").unwrap();

        assert_eq!(target.read_key("Software/Patchbay", "flavor").unwrap(), "x64");
        assert_eq!(
            target.read_key("Software/Patchbay", "update_dir").unwrap(),
            "updates"
        );
    }

    #[test]
    fn test_missing_key() {
        let (_tmp, target) = target();
        let err = target.read_key("Software/Patchbay", "flavor").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(target.read_key_opt("Software/Patchbay", "flavor").unwrap(), None);
    }

    #[test]
    fn test_missing_root_is_unreachable() {
        let tmp = TempDir::new().unwrap();
        let target = LocalTarget::new(tmp.path().join("offline"));
        let err = target.read_key("Software/Patchbay", "status").unwrap_err();
        assert!(err.is_retryable());
        assert!(target.exists("a").is_err());
    }

    #[test]
    fn test_file_channel() {
        let (_tmp, target) = target();
        target.mkdir("updates/job1/abc").unwrap();
        target.write_file("updates/job1/abc/payload.bin", b"data").unwrap();

        assert!(target.exists("updates/job1/abc/payload.bin").unwrap());
        assert!(!target.exists("updates/job1/other").unwrap());
        assert_eq!(
            target.read_to_string("updates/job1/abc/payload.bin").unwrap(),
            "data"
        );
        assert!(matches!(
            target.open_read("updates/job1/nope").err(),
            Some(Error::FileNotFound(_))
        ));
    }

    #[test]
    fn test_path_escape_rejected() {
        let (_tmp, target) = target();
        assert!(target.mkdir("../outside").is_err());
        assert!(target.write_key("../x", "a", "b").is_err());
    }

    #[test]
    fn test_start_service_drops_request() {
        let (_tmp, target) = target();
        target.start_service("patchbay-agent").unwrap();
        assert!(target.service_request_path("patchbay-agent").exists());
    }

    #[test]
    fn test_free_bytes_override() {
        let (_tmp, target) = target();
        let target = target.with_free_bytes(1234);
        assert_eq!(target.free_bytes("updates/job1").unwrap(), 1234);
    }

    #[cfg(unix)]
    #[test]
    fn test_free_bytes_from_filesystem() {
        let (_tmp, target) = target();
        assert!(target.free_bytes("updates/not-yet-created").unwrap() > 0);
    }
}
