//! Core hypervisor adapter trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::*;

/// Remote operations against a hypervisor cluster.
///
/// Each method maps to one API call. Implementations do not retry and do not
/// wait for the cluster to reflect a mutation; callers that depend on a
/// mutation being visible poll [`Hypervisor::fetch_live_config`].
#[async_trait]
pub trait Hypervisor: Send + Sync {
    // =========================================================================
    // Lookup
    // =========================================================================

    /// Find a VM by name anywhere in the cluster.
    async fn lookup_by_name(&self, name: &str) -> Result<Option<VmRef>>;

    /// Allocate the next free cluster-wide VM id.
    async fn next_vm_id(&self) -> Result<u32>;

    /// Read the VM's current configuration and power state.
    async fn fetch_live_config(&self, vm: &VmRef) -> Result<LiveState>;

    // =========================================================================
    // VM Lifecycle
    // =========================================================================

    /// Create a new VM from scratch, booting from `iso`.
    async fn create_vm(&self, vm: &VmRef, spec: &VmSpec, iso: &str) -> Result<()>;

    /// Full-clone `source` into `dest` and apply `spec` to the copy.
    async fn clone_vm(&self, source: &VmRef, dest: &VmRef, spec: &VmSpec) -> Result<()>;

    /// Replace the VM's configuration with `spec`.
    async fn update_config(&self, vm: &VmRef, spec: &VmSpec) -> Result<()>;

    /// Grow the disk named `device` (e.g. `virtio0`) by `delta_gib`.
    async fn resize_disk(&self, vm: &VmRef, device: &str, delta_gib: u64) -> Result<()>;

    /// Start a VM.
    async fn start_vm(&self, vm: &VmRef) -> Result<()>;

    /// Power off a VM.
    ///
    /// Returns [`HypervisorError::AlreadyStopped`](crate::HypervisorError::AlreadyStopped)
    /// when the VM is not running.
    async fn stop_vm(&self, vm: &VmRef) -> Result<()>;

    /// Delete a VM (must be stopped first).
    async fn delete_vm(&self, vm: &VmRef) -> Result<()>;
}

