//! Desired-state manifest.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use qmconverge_core::DesiredVm;

/// The VMs an operator wants to exist.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub vms: Vec<DesiredVm>,
}

impl Manifest {
    /// Load a manifest from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid manifest: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Manifest =
            serde_yaml::from_str(content).context("Failed to parse manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// VM names must be unique within one manifest.
    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for vm in &self.vms {
            if !seen.insert(vm.name()) {
                bail!("VM {} is declared more than once", vm.name());
            }
        }
        Ok(())
    }

    /// Names of VMs whose target node is not in `nodes`.
    pub fn unknown_nodes<'a>(&'a self, nodes: &[String]) -> Vec<&'a str> {
        self.vms
            .iter()
            .filter(|vm| !nodes.iter().any(|n| *n == vm.spec.target_node))
            .map(|vm| vm.name())
            .collect()
    }
}
