//! Error types for the lifecycle engine.

use std::time::Duration;

use thiserror::Error;

use qmconverge_hypervisor::{HypervisorError, Operation};

/// Errors that abort a convergence pass.
///
/// Nothing is rolled back when one of these is returned: the VM may be left
/// partially mutated on the hypervisor.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A VM with the desired name exists and recycling was not allowed.
    #[error("Duplicate VM name ({name}) with vmId: {vm_id}. Set force_create=false to recycle")]
    DuplicateConflict { name: String, vm_id: u32 },

    /// A VM with the desired name exists on a different node.
    #[error("Duplicate VM name ({name}) with vmId: {vm_id} on different target_node={node} (wanted {target_node})")]
    NodeMismatch {
        name: String,
        vm_id: u32,
        node: String,
        target_node: String,
    },

    /// A read-only call (lookup, live config fetch) failed.
    #[error("Failed to look up {target}: {source}")]
    LookupFailure {
        target: String,
        #[source]
        source: HypervisorError,
    },

    /// A mutating call failed. The adapter error is kept unmodified.
    #[error("{op} failed for VM {vm}: {source}")]
    MutationFailure {
        op: Operation,
        vm: String,
        #[source]
        source: HypervisorError,
    },

    /// The hypervisor did not reflect a mutation within the settle bound.
    #[error("Timed out after {waited:?} waiting for VM {vm} to {condition}")]
    Timeout {
        vm: String,
        condition: &'static str,
        waited: Duration,
    },

    /// The post-boot provisioning selector is not recognised.
    #[error("Unknown os_type: {0}")]
    UnknownProvisioningKind(String),

    /// The post-boot provisioning collaborator reported a failure.
    #[error("Provisioning VM {vm} failed: {message}")]
    ProvisioningFailed { vm: String, message: String },

    /// The desired state cannot be acted on.
    #[error("Invalid VM spec: {0}")]
    InvalidSpec(String),

    /// A persisted resource id could not be parsed.
    #[error("Invalid resource id: {0}")]
    InvalidResourceId(String),

    /// The concurrency gate was shut down.
    #[error("Concurrency gate is closed")]
    GateClosed,
}

impl LifecycleError {
    pub(crate) fn lookup(target: impl ToString, source: HypervisorError) -> Self {
        LifecycleError::LookupFailure {
            target: target.to_string(),
            source,
        }
    }

    pub(crate) fn mutation(op: Operation, vm: impl ToString, source: HypervisorError) -> Self {
        LifecycleError::MutationFailure {
            op,
            vm: vm.to_string(),
            source,
        }
    }
}

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;
