use anyhow::{Context, Result, bail};
use reconcile::{DesiredModel, ReconcileOptions, WaitOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::registry;

/// Get the config directory path (~/.config/patchbay)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("patchbay"))
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or_else(|_| shellexpand::tilde(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Config Structures
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_repository_root")]
    pub root: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            root: default_repository_root(),
        }
    }
}

fn default_repository_root() -> String {
    "~/patchbay/packages".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_service")]
    pub service: String,

    #[serde(default = "default_critical_units")]
    pub critical_units: Vec<String>,

    #[serde(default = "default_reboot_timeout")]
    pub reboot_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            critical_units: default_critical_units(),
            reboot_timeout_secs: default_reboot_timeout(),
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: None,
        }
    }
}

fn default_service() -> String {
    reconcile::agent::DEFAULT_SERVICE.to_string()
}

fn default_critical_units() -> Vec<String> {
    vec![reconcile::planner::DEFAULT_CRITICAL_UNIT.to_string()]
}

fn default_reboot_timeout() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    5
}

/// One managed machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Registry kind (`local` or `memory`)
    pub kind: String,

    /// Directory a `local` target lives in
    #[serde(default)]
    pub root: Option<String>,

    /// Variant to request instead of the target's flavor
    #[serde(default)]
    pub variant: Option<String>,

    /// Desired model file
    #[serde(default)]
    pub model: Option<String>,

    /// Reported free space, for rehearsing capacity checks
    #[serde(default)]
    pub free_bytes: Option<u64>,

    /// Units the rehearsal agent of a `memory` target fails
    #[serde(default)]
    pub fail_units: Vec<String>,
}

// ============================================================================
// Config Implementation
// ============================================================================

impl Config {
    /// Default config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(config_dir()?.join("config.toml"))
    }

    /// Load the config from `path`, or the default location.
    ///
    /// A missing file yields the defaults. Target kinds are checked against
    /// the registry here so a typo fails before any command runs.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            log::debug!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate config text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, target) in &self.targets {
            if registry::lookup(&target.kind).is_none() {
                bail!(
                    "target '{}' has unknown kind '{}' (known: {})",
                    name,
                    target.kind,
                    registry::kinds().join(", ")
                );
            }
        }
        if self.agent.poll_interval_secs == 0 {
            bail!("agent.poll_interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// Find a target by name
    pub fn target(&self, name: &str) -> Result<&TargetConfig> {
        self.targets.get(name).with_context(|| {
            format!(
                "Unknown target '{}'. Run 'patchbay targets' to list configured targets",
                name
            )
        })
    }

    /// Expanded repository root
    pub fn repository_root(&self) -> PathBuf {
        expand_path(&self.repository.root)
    }

    /// Job options for `target`
    pub fn options_for(&self, target: &TargetConfig) -> ReconcileOptions {
        ReconcileOptions {
            variant: target.variant.clone(),
            critical_units: self.agent.critical_units.clone(),
            service: self.agent.service.clone(),
            wait: WaitOptions {
                reboot_timeout: Duration::from_secs(self.agent.reboot_timeout_secs),
                poll_interval: Duration::from_secs(self.agent.poll_interval_secs),
                report_status_path: None,
                max_wait: self.agent.max_wait_secs.map(Duration::from_secs),
            },
            ..ReconcileOptions::default()
        }
    }
}

impl TargetConfig {
    /// Read the desired model, preferring `override_path` over the configured file
    pub fn load_model(&self, override_path: Option<&Path>) -> Result<DesiredModel> {
        let path = match (override_path, &self.model) {
            (Some(p), _) => p.to_path_buf(),
            (None, Some(m)) => expand_path(m),
            (None, None) => bail!("No model configured for this target; pass --model FILE"),
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read model {}", path.display()))?;
        DesiredModel::parse(&content).with_context(|| format!("Invalid model {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.agent.reboot_timeout_secs, 600);
        assert_eq!(config.agent.poll_interval_secs, 5);
        assert_eq!(config.agent.critical_units, vec!["patchbay-agent"]);
        assert!(config.targets.is_empty());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.repository.root, "~/patchbay/packages");
    }

    #[test]
    fn test_targets_and_options() {
        let config = Config::from_toml(
            r#"
            [agent]
            service = "agentd"
            poll_interval_secs = 2
            max_wait_secs = 3600

            [targets.web01]
            kind = "local"
            root = "/mnt/targets/web01"
            variant = "x64"
            "#,
        )
        .unwrap();

        let target = config.target("web01").unwrap();
        assert_eq!(target.root.as_deref(), Some("/mnt/targets/web01"));

        let options = config.options_for(target);
        assert_eq!(options.service, "agentd");
        assert_eq!(options.variant.as_deref(), Some("x64"));
        assert_eq!(options.wait.poll_interval, Duration::from_secs(2));
        assert_eq!(options.wait.reboot_timeout, Duration::from_secs(600));
        assert_eq!(options.wait.max_wait, Some(Duration::from_secs(3600)));
        assert!(config.target("db01").is_err());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = Config::from_toml(
            r#"
            [targets.web01]
            kind = "winrm"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown kind 'winrm'"));
    }

    #[test]
    fn test_load_model() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "install patchbay-agent\ninstall office=16.0").unwrap();

        let target = TargetConfig {
            kind: "memory".to_string(),
            root: None,
            variant: None,
            model: Some(file.path().display().to_string()),
            free_bytes: None,
            fail_units: Vec::new(),
        };
        assert_eq!(target.load_model(None).unwrap().len(), 2);

        let bare = TargetConfig { model: None, ..target };
        assert!(bare.load_model(None).is_err());
        assert_eq!(bare.load_model(Some(file.path())).unwrap().len(), 2);
    }
}
