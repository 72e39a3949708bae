use crate::utils::error::{PlatformError, Result};
use crate::utils::validation::{
    validate_path, validate_positive_number, validate_required_field, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENGINE_VAR: &str = "PLATSIM_ENGINE";
pub const WORK_ROOT_VAR: &str = "PLATSIM_WORK_ROOT";
pub const MAX_WORKERS_VAR: &str = "PLATSIM_MAX_WORKERS";

/// Where the simulation engine lives and how it is driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub executable: PathBuf,
    /// Parent of every per-run working directory and of written documents.
    pub work_root: PathBuf,
    pub max_workers: usize,
}

impl EngineConfig {
    /// Work root defaults to the directory holding the executable.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let work_root = executable
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            executable,
            work_root,
            max_workers: 1,
        }
    }

    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Reads `PLATSIM_ENGINE` (required), `PLATSIM_WORK_ROOT` and
    /// `PLATSIM_MAX_WORKERS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let executable = lookup(ENGINE_VAR).filter(|v| !v.trim().is_empty());
        let mut config = Self::new(validate_required_field(ENGINE_VAR, &executable)?);
        if let Some(root) = lookup(WORK_ROOT_VAR).filter(|v| !v.trim().is_empty()) {
            config.work_root = PathBuf::from(root);
        }
        if let Some(raw) = lookup(MAX_WORKERS_VAR) {
            config.max_workers =
                raw.trim()
                    .parse()
                    .map_err(|_| PlatformError::InvalidConfigValueError {
                        field: MAX_WORKERS_VAR.to_string(),
                        value: raw.clone(),
                        reason: "expected a positive integer".to_string(),
                    })?;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> Result<()> {
        validate_path("engine.executable", &self.executable.to_string_lossy())?;
        validate_path("engine.work_root", &self.work_root.to_string_lossy())?;
        validate_positive_number("engine.max_workers", self.max_workers, 1)?;
        Ok(())
    }
}
