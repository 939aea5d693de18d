//! Duplicate-name resolution.

use tracing::{debug, instrument};

use qmconverge_hypervisor::{Hypervisor, VmRef};

use crate::error::{LifecycleError, Result};

/// What to do about a desired VM name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No VM has the name; a new id must be allocated.
    New,
    /// A VM with the name exists on the target node and may be reused.
    Recycle(VmRef),
}

/// Classify `name` against what already exists on the cluster.
///
/// `force_create` turns any existing VM with the name into a
/// [`LifecycleError::DuplicateConflict`], whichever node it is on. Otherwise
/// an existing VM on another node is a [`LifecycleError::NodeMismatch`].
/// Only the name lookup is issued; nothing is mutated.
#[instrument(skip(hypervisor))]
pub async fn resolve(
    hypervisor: &dyn Hypervisor,
    name: &str,
    target_node: &str,
    force_create: bool,
) -> Result<Resolution> {
    debug!("Checking for duplicate name");

    let existing = hypervisor
        .lookup_by_name(name)
        .await
        .map_err(|e| LifecycleError::lookup(name, e))?;

    match existing {
        None => Ok(Resolution::New),
        Some(vm) if force_create => Err(LifecycleError::DuplicateConflict {
            name: name.to_string(),
            vm_id: vm.vm_id(),
        }),
        Some(vm) if vm.node() != target_node => Err(LifecycleError::NodeMismatch {
            name: name.to_string(),
            vm_id: vm.vm_id(),
            node: vm.node().to_string(),
            target_node: target_node.to_string(),
        }),
        Some(vm) => Ok(Resolution::Recycle(vm)),
    }
}
