//! Persisted VM identity.
//!
//! Once a VM has a [`VmRef`], its identity is stored as `<node>/qemu/<vmid>`
//! and parsed back on later operations against the same declared resource.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use qmconverge_hypervisor::{VmRef, VM_KIND};

use crate::error::LifecycleError;

/// Durable identity of a managed VM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    node: String,
    vm_id: u32,
}

impl ResourceId {
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn vm_id(&self) -> u32 {
        self.vm_id
    }

    pub fn vm_ref(&self) -> VmRef {
        VmRef::new(self.node.clone(), self.vm_id)
    }
}

impl From<&VmRef> for ResourceId {
    fn from(vm: &VmRef) -> Self {
        Self {
            node: vm.node().to_string(),
            vm_id: vm.vm_id(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.node, VM_KIND, self.vm_id)
    }
}

impl FromStr for ResourceId {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| LifecycleError::InvalidResourceId(format!("{} ({})", s, why));

        let parts: Vec<&str> = s.split('/').collect();
        let [node, kind, vm_id] = parts.as_slice() else {
            return Err(invalid("expected <node>/qemu/<vmid>"));
        };
        if node.is_empty() {
            return Err(invalid("empty node"));
        }
        if *kind != VM_KIND {
            return Err(invalid("unsupported kind"));
        }
        let vm_id = vm_id.parse().map_err(|_| invalid("vmid is not a number"))?;

        Ok(Self {
            node: node.to_string(),
            vm_id,
        })
    }
}

impl TryFrom<String> for ResourceId {
    type Error = LifecycleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}
