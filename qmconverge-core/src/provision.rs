//! Post-boot provisioning selector and collaborator.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use qmconverge_hypervisor::VmRef;

use crate::error::{LifecycleError, Result};

/// Guest family the post-boot provisioner prepares for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningKind {
    Ubuntu,
    Centos,
}

impl ProvisioningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningKind::Ubuntu => "ubuntu",
            ProvisioningKind::Centos => "centos",
        }
    }
}

impl fmt::Display for ProvisioningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvisioningKind {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ubuntu" => Ok(ProvisioningKind::Ubuntu),
            "centos" => Ok(ProvisioningKind::Centos),
            other => Err(LifecycleError::UnknownProvisioningKind(other.to_string())),
        }
    }
}

/// Runs guest-side setup once a VM is up.
///
/// Called after the VM reached Running and after the operation slot has been
/// released, so slow guest work never holds up other VMs' hypervisor calls.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, vm: &VmRef, vm_name: &str, kind: ProvisioningKind) -> Result<()>;
}
