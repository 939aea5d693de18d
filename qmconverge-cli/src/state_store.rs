//! Declared state persisted between runs.
//!
//! A JSON file mapping each managed VM name to the baseline last read back
//! from the hypervisor. It is the only place a VM's resource id survives the
//! process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use qmconverge_core::DeclaredState;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    vms: BTreeMap<String, DeclaredState>,
}

/// Declared state of every managed VM, keyed by name.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    vms: BTreeMap<String, DeclaredState>,
}

impl StateStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!(path = %path.display(), "No state file yet");
            return Ok(Self {
                path,
                vms: BTreeMap::new(),
            });
        }

        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let file: StateFile = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        info!(path = %path.display(), vms = file.vms.len(), "Loaded state file");
        Ok(Self {
            path,
            vms: file.vms,
        })
    }

    /// Write the store back to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = StateFile {
            vms: self.vms.clone(),
        };
        let json = serde_json::to_string_pretty(&file).context("Failed to serialize state")?;

        // Write a sibling file, then rename it over the target.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), vms = self.vms.len(), "Saved state file");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&DeclaredState> {
        self.vms.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, state: DeclaredState) -> Option<DeclaredState> {
        self.vms.insert(name.into(), state)
    }

    pub fn remove(&mut self, name: &str) -> Option<DeclaredState> {
        self.vms.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeclaredState)> {
        self.vms.iter()
    }

    pub fn len(&self) -> usize {
        self.vms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vms.is_empty()
    }
}
