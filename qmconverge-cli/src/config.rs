//! Configuration management for the qmconverge binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use qmconverge_common::LogFormat;
use qmconverge_core::{SettlePolicy, DEFAULT_MAX_PARALLEL, DEFAULT_PRIMARY_DISK};
use qmconverge_hypervisor::VmSpec;

use crate::cli::Args;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lifecycle engine tuning
    pub lifecycle: LifecycleConfig,
    /// Hypervisor backend configuration
    pub backend: BackendConfig,
    /// Where declared state is kept between runs
    pub state_path: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleConfig::default(),
            backend: BackendConfig::default(),
            state_path: PathBuf::from("qmconverge-state.json"),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref level) = args.log_level {
            self.log_level = level.clone();
        }
        if args.json_logs {
            self.log_format = LogFormat::Json;
        }
        if let Some(max_parallel) = args.max_parallel {
            self.lifecycle.max_parallel = max_parallel;
        }
        if let Some(ref state) = args.state {
            self.state_path = state.clone();
        }
        self
    }
}

/// Lifecycle engine tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Maximum number of VMs with hypervisor calls in flight
    pub max_parallel: usize,
    /// Device grown when a larger primary disk is requested
    pub primary_disk: String,
    pub settle: SettleConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            primary_disk: DEFAULT_PRIMARY_DISK.to_string(),
            settle: SettleConfig::default(),
        }
    }
}

/// Bounds for waiting on the hypervisor after a mutation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    pub timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            initial_backoff_ms: 250,
            max_backoff_ms: 5000,
        }
    }
}

impl SettleConfig {
    pub fn policy(&self) -> SettlePolicy {
        SettlePolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
        }
    }
}

/// Hypervisor backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend type
    pub kind: BackendKind,
    /// Cluster nodes
    pub nodes: Vec<String>,
    /// Template VMs present before the first run
    pub templates: Vec<VmSpec>,
    /// Live-config reads before a mutation shows up (mock only)
    pub settle_lag: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Mock,
            nodes: vec!["pve1".to_string()],
            templates: Vec::new(),
            settle_lag: 0,
        }
    }
}

/// Hypervisor backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-memory backend for testing/development
    #[default]
    Mock,
}
