//! Type definitions for VM identity, configuration and live state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::devices::{DeviceCollection, DiskDevice, NetworkDevice};
use crate::error::{HypervisorError, Result};

/// The only VM kind this crate manages.
pub const VM_KIND: &str = "qemu";

// =============================================================================
// VM IDENTITY
// =============================================================================

/// A provisioned VM: the node it lives on and its cluster-wide numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmRef {
    node: String,
    vm_id: u32,
}

impl VmRef {
    pub fn new(node: impl Into<String>, vm_id: u32) -> Self {
        Self {
            node: node.into(),
            vm_id,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn vm_id(&self) -> u32 {
        self.vm_id
    }
}

impl fmt::Display for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.vm_id)
    }
}

// =============================================================================
// VM CONFIGURATION
// =============================================================================

/// Desired configuration of one VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSpec {
    /// Human-readable name, unique across the cluster
    pub name: String,
    /// Node the VM must live on
    pub target_node: String,
    #[serde(default)]
    pub description: String,
    /// Start the VM when the node boots
    #[serde(default = "default_onboot")]
    pub onboot: bool,
    /// Default storage pool for new volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    /// Guest OS hint (`l26`, `win10`, ...)
    #[serde(default = "default_qemu_os")]
    pub qemu_os: String,
    /// Memory size in MiB
    pub memory_mib: u64,
    pub cores: u32,
    pub sockets: u32,
    /// Requested size of the primary disk in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gib: Option<u64>,
    #[serde(default)]
    pub disks: DeviceCollection<DiskDevice>,
    #[serde(default)]
    pub networks: DeviceCollection<NetworkDevice>,
}

fn default_onboot() -> bool {
    true
}

fn default_qemu_os() -> String {
    "l26".to_string()
}

impl VmSpec {
    /// Create a spec with default sizing: 1 socket, 1 core, 512 MiB.
    pub fn new(name: impl Into<String>, target_node: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_node: target_node.into(),
            description: String::new(),
            onboot: default_onboot(),
            storage: None,
            qemu_os: default_qemu_os(),
            memory_mib: 512,
            cores: 1,
            sockets: 1,
            disk_size_gib: None,
            disks: DeviceCollection::new(),
            networks: DeviceCollection::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_memory(mut self, size_mib: u64) -> Self {
        self.memory_mib = size_mib;
        self
    }

    pub fn with_cpu(mut self, sockets: u32, cores: u32) -> Self {
        self.sockets = sockets;
        self.cores = cores;
        self
    }

    pub fn with_disk_size(mut self, size_gib: u64) -> Self {
        self.disk_size_gib = Some(size_gib);
        self
    }

    pub fn with_disk(mut self, index: u32, disk: DiskDevice) -> Self {
        self.disks.insert(index, disk);
        self
    }

    pub fn with_network(mut self, index: u32, nic: NetworkDevice) -> Self {
        self.networks.insert(index, nic);
        self
    }

    /// Check the fields the hypervisor would reject.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HypervisorError::InvalidConfig("VM name must not be empty".to_string()));
        }
        if self.target_node.trim().is_empty() {
            return Err(HypervisorError::InvalidConfig(format!(
                "VM {} has no target node",
                self.name
            )));
        }
        if self.memory_mib == 0 || self.cores == 0 || self.sockets == 0 {
            return Err(HypervisorError::InvalidConfig(format!(
                "VM {} needs non-zero memory, cores and sockets",
                self.name
            )));
        }
        Ok(())
    }
}

// =============================================================================
// VM STATUS
// =============================================================================

/// VM power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    Running,
    Stopped,
    Paused,
    #[default]
    Unknown,
}

/// Configuration and status of a VM as the hypervisor reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub name: String,
    pub state: VmState,
    pub description: String,
    pub onboot: bool,
    pub storage: Option<String>,
    pub qemu_os: String,
    pub memory_mib: u64,
    pub cores: u32,
    pub sockets: u32,
    /// Allocated size of the primary disk in GiB
    pub disk_size_gib: u64,
    pub disks: DeviceCollection<DiskDevice>,
    pub networks: DeviceCollection<NetworkDevice>,
}

/// Remote operations that change hypervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Clone,
    UpdateConfig,
    ResizeDisk,
    Start,
    Stop,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Clone => "clone",
            Operation::UpdateConfig => "update_config",
            Operation::ResizeDisk => "resize_disk",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
