//! In-memory target for tests and rehearsals.
//!
//! Control keys and files live in memory. Reads of selected keys can be
//! scripted (a status flag that reports `running`, then goes unreachable,
//! then `stopped`), and failures can be injected on writes or service
//! start. A start hook lets a test stand in for the remote agent.

use crate::channel::{ControlChannel, FileChannel, Target, segments};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// Scripted reply for a key read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The key holds this value
    Value(String),
    /// The key does not exist
    Missing,
    /// The target does not answer
    Unreachable,
}

impl Reply {
    /// Shorthand for [`Reply::Value`].
    pub fn value(v: impl Into<String>) -> Self {
        Self::Value(v.into())
    }
}

/// Called when a service is started, with the target and service name.
pub type StartHook = Box<dyn Fn(&MemoryTarget, &str) + Send + Sync>;

#[derive(Default)]
struct State {
    keys: BTreeMap<(String, String), String>,
    scripts: HashMap<(String, String), VecDeque<Reply>>,
    reads: HashMap<(String, String), usize>,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    started: Vec<String>,
    free_bytes: u64,
    reachable: bool,
}

/// Target held entirely in memory.
pub struct MemoryTarget {
    name: String,
    state: Arc<Mutex<State>>,
    fail_writes_matching: Option<String>,
    fail_key_writes: bool,
    fail_service_start: bool,
    on_start: Option<StartHook>,
}

impl MemoryTarget {
    /// Create an empty, reachable target with plenty of free space.
    pub fn new(name: impl Into<String>) -> Self {
        let state = State {
            free_bytes: u64::MAX / 4,
            reachable: true,
            ..Default::default()
        };
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(state)),
            fail_writes_matching: None,
            fail_key_writes: false,
            fail_service_start: false,
            on_start: None,
        }
    }

    /// Report this much free space.
    pub fn with_free_bytes(self, bytes: u64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.free_bytes = bytes;
        }
        self
    }

    /// Fail every file write whose path contains `needle`.
    pub fn with_failing_writes(mut self, needle: impl Into<String>) -> Self {
        self.fail_writes_matching = Some(needle.into());
        self
    }

    /// Fail every control key write.
    pub fn with_failing_key_writes(mut self) -> Self {
        self.fail_key_writes = true;
        self
    }

    /// Fail every service start.
    pub fn with_failing_service_start(mut self) -> Self {
        self.fail_service_start = true;
        self
    }

    /// Run `hook` whenever a service is started.
    pub fn on_start(mut self, hook: impl Fn(&MemoryTarget, &str) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Script the replies for reads of one key.
    ///
    /// Replies are consumed in order; the last one repeats forever.
    pub fn script_key(&self, path: &str, name: &str, replies: impl IntoIterator<Item = Reply>) {
        if let Ok(mut state) = self.state.lock() {
            state
                .scripts
                .insert(key_id(path, name), replies.into_iter().collect());
        }
    }

    /// Make the whole target (un)reachable.
    pub fn set_reachable(&self, reachable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.reachable = reachable;
        }
    }

    /// Current value of a key, bypassing scripts.
    pub fn key(&self, path: &str, name: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.keys.get(&key_id(path, name)).cloned())
    }

    /// Number of reads of a key so far.
    pub fn reads(&self, path: &str, name: &str) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.reads.get(&key_id(path, name)).copied())
            .unwrap_or(0)
    }

    /// Contents of a file.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let path = normalize(path).ok()?;
        self.state.lock().ok().and_then(|s| s.files.get(&path).cloned())
    }

    /// All file paths, sorted.
    pub fn file_paths(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Services started so far, in order.
    pub fn started_services(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.started.clone())
            .unwrap_or_default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::Other("memory target state poisoned".to_string()))?;
        if !state.reachable {
            return Err(Error::unreachable(format!("{} is offline", self.name)));
        }
        Ok(state)
    }
}

impl ControlChannel for MemoryTarget {
    fn write_key(&self, path: &str, name: &str, value: &str) -> Result<()> {
        segments(path)?;
        let mut state = self.state()?;
        if self.fail_key_writes {
            return Err(Error::io(
                path,
                io::Error::new(io::ErrorKind::PermissionDenied, "key write refused"),
            ));
        }
        state.keys.insert(key_id(path, name), value.to_string());
        Ok(())
    }

    fn read_key(&self, path: &str, name: &str) -> Result<String> {
        let mut state = self.state()?;
        let id = key_id(path, name);
        *state.reads.entry(id.clone()).or_default() += 1;

        let scripted = state.scripts.get_mut(&id).and_then(|replies| {
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        });

        let not_found = || Error::KeyNotFound {
            path: path.to_string(),
            name: name.to_string(),
        };

        match scripted {
            Some(Reply::Value(v)) => Ok(v),
            Some(Reply::Missing) => Err(not_found()),
            Some(Reply::Unreachable) => Err(Error::unreachable("status query timed out")),
            None => state.keys.get(&id).cloned().ok_or_else(not_found),
        }
    }

    fn start_service(&self, service: &str) -> Result<()> {
        {
            let mut state = self.state()?;
            if self.fail_service_start {
                return Err(Error::Other(format!("service {service} failed to start")));
            }
            state.started.push(service.to_string());
        }
        if let Some(hook) = &self.on_start {
            hook(self, service);
        }
        Ok(())
    }
}

impl FileChannel for MemoryTarget {
    fn mkdir(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let mut state = self.state()?;
        let mut current = String::new();
        for part in path.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            state.dirs.insert(current.clone());
        }
        Ok(())
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send + '_>> {
        let key = normalize(path)?;
        let state = self.state()?;
        let data = state
            .files
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send + '_>> {
        let key = normalize(path)?;
        if let Some(needle) = &self.fail_writes_matching
            && key.contains(needle.as_str())
        {
            return Err(Error::io(
                path,
                io::Error::new(io::ErrorKind::Other, "injected write failure"),
            ));
        }

        let mut state = self.state()?;
        if let Some((parent, _)) = key.rsplit_once('/')
            && !state.dirs.contains(parent)
        {
            return Err(Error::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, "parent directory missing"),
            ));
        }
        state.files.insert(key.clone(), Vec::new());

        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            path: key,
        }))
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let key = normalize(path)?;
        let state = self.state()?;
        Ok(state.files.contains_key(&key) || state.dirs.contains(&key))
    }

    fn free_bytes(&self, _path: &str) -> Result<u64> {
        Ok(self.state()?.free_bytes)
    }
}

impl Target for MemoryTarget {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}

/// Appends straight into the shared file map.
struct MemoryWriter {
    state: Arc<Mutex<State>>,
    path: String,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("memory target state poisoned"))?;
        if !state.reachable {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "target went offline",
            ));
        }
        state
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn key_id(path: &str, name: &str) -> (String, String) {
    (path.replace('\\', "/"), name.to_string())
}

fn normalize(path: &str) -> Result<String> {
    Ok(segments(path)?.join("/"))
}
