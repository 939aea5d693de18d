//! # qmconverge
//!
//! Converges a manifest of QEMU VMs on a hypervisor cluster: creates missing
//! VMs from a template or an ISO, recycles or updates existing ones while
//! keeping their MAC addresses, and records what it read back in a state file.
//!
//! ## Usage
//! ```bash
//! qmconverge --config qmconverge.yaml apply vms.yaml
//! qmconverge refresh
//! qmconverge destroy web-1
//! qmconverge import legacy-db
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use qmconverge_core::{ConcurrencyGate, Lifecycle};
use qmconverge_hypervisor::{Hypervisor, MockBackend, VmState};

mod cli;
mod commands;
mod config;
mod manifest;
mod state_store;

use cli::{Args, Command};
use config::{BackendKind, Config};
use manifest::Manifest;
use state_store::StateStore;

const DEFAULT_CONFIG_PATH: &str = "qmconverge.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize logging
    qmconverge_common::init_logging(&config.log_level, config.log_format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting qmconverge"
    );

    let mut store = StateStore::load(&config.state_path)?;
    let backend = build_backend(&config, &store)?;

    let lifecycle = Lifecycle::new(backend, ConcurrencyGate::new(config.lifecycle.max_parallel))
        .with_settle_policy(config.lifecycle.settle.policy())
        .with_primary_disk(config.lifecycle.primary_disk.clone());

    info!(
        backend = ?config.backend.kind,
        max_parallel = lifecycle.gate().capacity(),
        state = %config.state_path.display(),
        "qmconverge configured"
    );

    let result = match &args.command {
        Command::Apply { manifest } => {
            let manifest = Manifest::load(manifest)?;
            commands::apply(&lifecycle, &mut store, &manifest, &config.backend.nodes).await
        }
        Command::Refresh => commands::refresh(&lifecycle, &mut store).await,
        Command::Destroy { name } => commands::destroy(&lifecycle, &mut store, name).await,
        Command::Import { name } => commands::import(&lifecycle, &mut store, name).await,
    };

    // Saved even when the command failed.
    store.save()?;

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

fn load_config(args: &Args) -> Result<Config> {
    let config = match &args.config {
        // Explicit config file provided
        Some(path) => Config::load(path)?,
        // Try default location, fall back to defaults
        None if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load(DEFAULT_CONFIG_PATH)?
        }
        None => Config::default(),
    };
    Ok(config.with_cli_overrides(args))
}

/// Build the hypervisor backend.
///
/// The mock keeps VMs in memory only, so every run re-seeds the configured
/// templates and restores the VMs recorded in the state file under their ids.
fn build_backend(config: &Config, store: &StateStore) -> Result<Arc<dyn Hypervisor>> {
    match config.backend.kind {
        BackendKind::Mock => {
            let backend = MockBackend::new()
                .with_settle_lag(config.backend.settle_lag)
                .with_primary_disk(config.lifecycle.primary_disk.clone());

            for template in &config.backend.templates {
                backend
                    .seed_vm(template, VmState::Stopped)
                    .with_context(|| format!("Failed to seed template {}", template.name))?;
            }
            for (name, declared) in store.iter() {
                backend
                    .restore_vm(&declared.resource_id.vm_ref(), &declared.spec, VmState::Running)
                    .with_context(|| format!("Failed to restore VM {} from state", name))?;
            }

            Ok(Arc::new(backend))
        }
    }
}
