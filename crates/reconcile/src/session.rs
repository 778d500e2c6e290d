//! Facts discovered on a target for the length of one session

use crate::error::Result;
use crate::types::Manifest;
use remote::retry::LogCallback;
use remote::{ControlChannel, RetryConfig, join, with_retry};

/// Control key path holding the target's facts
pub const CONTROL_PATH: &str = "Software/Patchbay";

/// Target flavor, used as the default variant
pub const FLAVOR_KEY: &str = "flavor";

/// Directory under which job directories are created
pub const UPDATE_DIR_KEY: &str = "update_dir";

/// Persisted manifest (JSON)
pub const MANIFEST_KEY: &str = "manifest";

/// Declarative model matching the persisted manifest
pub const MODEL_KEY: &str = "model";

/// Update directory used when the target does not name one
pub const DEFAULT_UPDATE_DIR: &str = "updates";

/// Remote facts cached per session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSession {
    flavor: String,
    update_dir: String,
    manifest: Manifest,
    model: Option<String>,
}

impl TargetSession {
    /// Read the target's facts.
    ///
    /// Missing keys fall back to defaults: no flavor, the default update
    /// directory and an empty manifest.
    pub fn discover(control: &dyn ControlChannel, retry: &RetryConfig) -> Result<Self> {
        let read = |name: &str| {
            with_retry(retry, Some(&LogCallback), || {
                control.read_key_opt(CONTROL_PATH, name)
            })
        };

        let flavor = read(FLAVOR_KEY)?.unwrap_or_default();
        let update_dir = read(UPDATE_DIR_KEY)?
            .filter(|dir| !dir.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_UPDATE_DIR.to_string());
        let manifest = match read(MANIFEST_KEY)? {
            Some(json) => Manifest::from_json(&json)?,
            None => Manifest::new(),
        };
        let model = read(MODEL_KEY)?;

        log::debug!(
            "Discovered flavor '{}', update dir '{}', {} installed units",
            flavor,
            update_dir,
            manifest.len()
        );
        Ok(Self {
            flavor,
            update_dir,
            manifest,
            model,
        })
    }

    /// Use `flavor` instead of the discovered one, if given
    pub fn with_flavor(mut self, flavor: Option<&str>) -> Self {
        if let Some(flavor) = flavor {
            self.flavor = flavor.to_string();
        }
        self
    }

    /// Target flavor (empty when unknown)
    pub fn flavor(&self) -> &str {
        &self.flavor
    }

    /// Update directory on the target
    pub fn update_dir(&self) -> &str {
        &self.update_dir
    }

    /// Manifest as persisted on the target
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Model string last persisted on the target
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Directory of a job on the target
    pub fn job_root(&self, job_id: &str) -> String {
        join(&self.update_dir, job_id)
    }

    /// Write an advanced manifest and its model back to the target.
    pub fn persist(
        &mut self,
        control: &dyn ControlChannel,
        retry: &RetryConfig,
        manifest: Manifest,
        model: String,
    ) -> Result<()> {
        let json = manifest.to_json()?;
        with_retry(retry, Some(&LogCallback), || {
            control.write_key(CONTROL_PATH, MANIFEST_KEY, &json)
        })?;
        with_retry(retry, Some(&LogCallback), || {
            control.write_key(CONTROL_PATH, MODEL_KEY, &model)
        })?;

        log::info!("Persisted manifest with {} units", manifest.len());
        self.manifest = manifest;
        self.model = Some(model);
        Ok(())
    }
}
