//! Static table of target kinds
//!
//! Each configured target names a kind; the kind decides how its channels
//! are built. The table is fixed at compile time.

use anyhow::{Context, Result};
use reconcile::SimulatedAgent;
use remote::{LocalTarget, MemoryTarget, Target};

use crate::config::{TargetConfig, expand_path};

/// Builds a target from its configuration
pub type Constructor = fn(name: &str, config: &TargetConfig) -> Result<Box<dyn Target>>;

static KINDS: &[(&str, Constructor)] = &[("local", open_local), ("memory", open_memory)];

/// Constructor registered for `kind`
pub fn lookup(kind: &str) -> Option<Constructor> {
    KINDS.iter().find(|(k, _)| *k == kind).map(|(_, ctor)| *ctor)
}

/// Registered kind names
pub fn kinds() -> Vec<&'static str> {
    KINDS.iter().map(|(k, _)| *k).collect()
}

/// Open the target `name` described by `config`
pub fn open(name: &str, config: &TargetConfig) -> Result<Box<dyn Target>> {
    let ctor = lookup(&config.kind)
        .with_context(|| format!("Unknown target kind '{}'", config.kind))?;
    let target = ctor(name, config)?;
    log::debug!("Opened target {} as {}", name, target.describe());
    Ok(target)
}

fn open_local(name: &str, config: &TargetConfig) -> Result<Box<dyn Target>> {
    let root = config
        .root
        .as_deref()
        .with_context(|| format!("Target '{}' of kind 'local' needs a root", name))?;
    let root = expand_path(root);
    if !root.is_dir() {
        anyhow::bail!("Target root {} does not exist", root.display());
    }

    let mut target = LocalTarget::new(root);
    if let Some(bytes) = config.free_bytes {
        target = target.with_free_bytes(bytes);
    }
    Ok(Box::new(target))
}

/// In-process target with the rehearsal agent attached
fn open_memory(name: &str, config: &TargetConfig) -> Result<Box<dyn Target>> {
    let agent = config
        .fail_units
        .iter()
        .fold(SimulatedAgent::new(), |agent, unit| agent.fail_unit(unit.clone()));

    let mut target = MemoryTarget::new(name);
    if let Some(bytes) = config.free_bytes {
        target = target.with_free_bytes(bytes);
    }
    Ok(Box::new(agent.install(target)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: &str, root: Option<String>) -> TargetConfig {
        TargetConfig {
            kind: kind.to_string(),
            root,
            variant: None,
            model: None,
            free_bytes: None,
            fail_units: Vec::new(),
        }
    }

    #[test]
    fn test_known_kinds() {
        assert!(lookup("local").is_some());
        assert!(lookup("memory").is_some());
        assert!(lookup("ssh").is_none());
        assert_eq!(kinds(), vec!["local", "memory"]);
    }

    #[test]
    fn test_open_memory() {
        let target = open("lab", &config("memory", None)).unwrap();
        assert_eq!(target.describe(), "memory:lab");
    }

    #[test]
    fn test_open_local() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display().to_string();
        let target = open("web01", &config("local", Some(root.clone()))).unwrap();
        assert_eq!(target.describe(), format!("local:{root}"));
    }

    #[test]
    fn test_local_needs_existing_root() {
        assert!(open("web01", &config("local", None)).is_err());
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone").display().to_string();
        assert!(open("web01", &config("local", Some(missing))).is_err());
    }
}
