//! Lifecycle orchestration: create, update, read back, import and delete.
//!
//! Every operation runs as one sequential task. It takes a slot from the
//! [`ConcurrencyGate`] before its first hypervisor call and gives it back on
//! every exit path. After each mutation the hypervisor needs time to reflect,
//! the task polls with the [`SettlePolicy`] instead of sleeping blindly.
//!
//! Nothing is retried or rolled back. The first failure is returned and the VM
//! may be left partially mutated.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

use qmconverge_hypervisor::{Hypervisor, HypervisorError, LiveState, Operation, VmRef, VmSpec, VmState};

use crate::desired::{DeclaredState, DesiredVm, Source};
use crate::error::{LifecycleError, Result};
use crate::gate::ConcurrencyGate;
use crate::identity::ResourceId;
use crate::provision::{ProvisioningKind, Provisioner};
use crate::reconcile::{network_update_payload, read_back};
use crate::resolver::{resolve, Resolution};
use crate::settle::SettlePolicy;
use crate::state::{LifecycleState, StateTracker};

/// Device the grow-only resize targets unless configured otherwise.
pub const DEFAULT_PRIMARY_DISK: &str = "virtio0";

/// Result of a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converged {
    pub resource_id: ResourceId,
    pub vm: VmRef,
    pub state: LifecycleState,
}

/// Drives VMs towards their desired state through a [`Hypervisor`].
pub struct Lifecycle {
    hypervisor: Arc<dyn Hypervisor>,
    gate: ConcurrencyGate,
    settle: SettlePolicy,
    primary_disk: String,
    provisioner: Option<Arc<dyn Provisioner>>,
    /// Held from id allocation until the create or clone that claims the id returns.
    id_claim: Mutex<()>,
}

impl Lifecycle {
    pub fn new(hypervisor: Arc<dyn Hypervisor>, gate: ConcurrencyGate) -> Self {
        Self {
            hypervisor,
            gate,
            settle: SettlePolicy::default(),
            primary_disk: DEFAULT_PRIMARY_DISK.to_string(),
            provisioner: None,
            id_claim: Mutex::new(()),
        }
    }

    pub fn with_settle_policy(mut self, settle: SettlePolicy) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_primary_disk(mut self, device: impl Into<String>) -> Self {
        self.primary_disk = device.into();
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Bring a VM into existence, or recycle an existing one with the same name.
    #[instrument(skip(self, desired), fields(vm_name = %desired.spec.name, node = %desired.spec.target_node, vm_id = tracing::field::Empty, op_id = %Uuid::new_v4()))]
    pub async fn create(&self, desired: &DesiredVm) -> Result<Converged> {
        info!("Converging VM");

        validate(&desired.spec)?;
        let kind = desired.flags.provisioning_kind()?;

        let mut tracker = StateTracker::new(&desired.spec.name, LifecycleState::Absent);
        let permit = self.gate.acquire().await?;
        let result = self.create_in_slot(desired, &mut tracker).await;
        drop(permit);

        let vm = result.map_err(|e| tracker.fail(e))?;
        tracker.transition(LifecycleState::Running);
        Span::current().record("vm_id", vm.vm_id());

        if let Some(kind) = kind {
            self.provision(&vm, &desired.spec.name, kind)
                .await
                .map_err(|e| tracker.fail(e))?;
        }

        info!(vm = %vm, path = ?tracker.history(), "VM converged");
        Ok(Converged {
            resource_id: ResourceId::from(&vm),
            vm,
            state: tracker.current(),
        })
    }

    /// Push a new desired configuration to an already managed VM.
    #[instrument(skip(self, desired), fields(id = %id, vm_name = %desired.spec.name, op_id = %Uuid::new_v4()))]
    pub async fn update(&self, id: &ResourceId, desired: &DesiredVm) -> Result<Converged> {
        info!("Updating VM");

        validate(&desired.spec)?;
        if desired.spec.target_node != id.node() {
            return Err(LifecycleError::NodeMismatch {
                name: desired.spec.name.clone(),
                vm_id: id.vm_id(),
                node: id.node().to_string(),
                target_node: desired.spec.target_node.clone(),
            });
        }

        let vm = id.vm_ref();
        let mut tracker = StateTracker::new(&desired.spec.name, LifecycleState::Running);
        tracker.transition(LifecycleState::Updating);

        let permit = self.gate.acquire().await?;
        let result = self.update_in_slot(&vm, &desired.spec).await;
        drop(permit);

        result.map_err(|e| tracker.fail(e))?;
        tracker.transition(LifecycleState::Running);

        info!("VM updated");
        Ok(Converged {
            resource_id: id.clone(),
            vm,
            state: tracker.current(),
        })
    }

    /// Read the VM back and merge it with what was declared.
    #[instrument(skip(self, declared), fields(id = %id))]
    pub async fn read(&self, id: &ResourceId, declared: &VmSpec) -> Result<DeclaredState> {
        let _permit = self.gate.acquire().await?;
        let vm = id.vm_ref();
        let live = self.fetch(&vm).await?;

        debug!(vm_name = %live.name, state = ?live.state, "Read back live configuration");
        Ok(DeclaredState::new(id.clone(), read_back(&vm, &live, declared)))
    }

    /// Adopt an existing VM by name.
    #[instrument(skip(self))]
    pub async fn import(&self, name: &str) -> Result<DeclaredState> {
        info!("Importing VM");

        let _permit = self.gate.acquire().await?;
        let vm = self
            .hypervisor
            .lookup_by_name(name)
            .await
            .map_err(|e| LifecycleError::lookup(name, e))?
            .ok_or_else(|| {
                LifecycleError::lookup(name, HypervisorError::VmNotFound(name.to_string()))
            })?;
        let live = self.fetch(&vm).await?;

        let empty = VmSpec::new(name, vm.node());
        let baseline = read_back(&vm, &live, &empty);

        info!(vm = %vm, "VM imported");
        Ok(DeclaredState::new(ResourceId::from(&vm), baseline))
    }

    /// Stop and remove a managed VM.
    #[instrument(skip(self), fields(id = %id, op_id = %Uuid::new_v4()))]
    pub async fn delete(&self, id: &ResourceId) -> Result<LifecycleState> {
        info!("Deleting VM");

        let vm = id.vm_ref();
        let mut tracker = StateTracker::new(id.to_string(), LifecycleState::Running);

        let permit = self.gate.acquire().await?;
        let result = self.delete_in_slot(&vm).await;
        drop(permit);

        result.map_err(|e| tracker.fail(e))?;
        tracker.transition(LifecycleState::Deleted);

        info!("VM deleted");
        Ok(tracker.current())
    }

    // =========================================================================
    // Steps run while holding a slot
    // =========================================================================

    async fn create_in_slot(&self, desired: &DesiredVm, tracker: &mut StateTracker) -> Result<VmRef> {
        let spec = &desired.spec;

        match resolve(
            self.hypervisor.as_ref(),
            &spec.name,
            &spec.target_node,
            desired.flags.force_create,
        )
        .await?
        {
            Resolution::New => {
                let source = desired.flags.source()?;
                let cloned = matches!(source, Source::Clone(_));
                tracker.transition(LifecycleState::Provisioning);

                let vm = self.place_new_vm(spec, source).await?;
                if cloned {
                    self.settle_clone(&vm, spec).await?;
                    self.grow_primary_disk(&vm, spec).await?;
                }
                self.start(&vm).await?;
                Ok(vm)
            }
            Resolution::Recycle(vm) => {
                info!(vm = %vm, "Recycling existing VM");
                tracker.transition(LifecycleState::Provisioning);

                self.stop(&vm).await?;
                self.apply_config(&vm, spec).await?;
                self.grow_primary_disk(&vm, spec).await?;
                self.start(&vm).await?;
                Ok(vm)
            }
        }
    }

    async fn update_in_slot(&self, vm: &VmRef, spec: &VmSpec) -> Result<()> {
        self.apply_config(vm, spec).await?;
        self.grow_primary_disk(vm, spec).await?;
        self.start(vm).await
    }

    async fn delete_in_slot(&self, vm: &VmRef) -> Result<()> {
        self.stop(vm).await?;
        self.hypervisor
            .delete_vm(vm)
            .await
            .map_err(|e| LifecycleError::mutation(Operation::Delete, vm, e))
    }

    /// Allocate a VM id and issue the create or clone that takes it.
    async fn place_new_vm(&self, spec: &VmSpec, source: Source<'_>) -> Result<VmRef> {
        let _claim = self.id_claim.lock().await;

        let vm_id = self
            .hypervisor
            .next_vm_id()
            .await
            .map_err(|e| LifecycleError::lookup("next vm id", e))?;
        let vm = VmRef::new(spec.target_node.clone(), vm_id);

        match source {
            Source::Clone(template) => self.create_from_clone(&vm, template, spec).await?,
            Source::Iso(iso) => self.create_from_iso(&vm, iso, spec).await?,
        }
        Ok(vm)
    }

    async fn create_from_clone(&self, vm: &VmRef, template: &str, spec: &VmSpec) -> Result<()> {
        let source = self
            .hypervisor
            .lookup_by_name(template)
            .await
            .map_err(|e| LifecycleError::lookup(template, e))?
            .ok_or_else(|| {
                LifecycleError::lookup(template, HypervisorError::VmNotFound(template.to_string()))
            })?;

        info!(source = %source, vm = %vm, "Cloning VM");
        self.hypervisor
            .clone_vm(&source, vm, spec)
            .await
            .map_err(|e| LifecycleError::mutation(Operation::Clone, vm, e))
    }

    async fn settle_clone(&self, vm: &VmRef, spec: &VmSpec) -> Result<()> {
        let hv = self.hypervisor.as_ref();
        let name = spec.name.as_str();
        self.settle
            .wait_for(&vm.to_string(), "appear after clone", move || async move {
                hv.fetch_live_config(vm)
                    .await
                    .map(|live| (live.name == name).then_some(()))
            })
            .await
    }

    async fn create_from_iso(&self, vm: &VmRef, iso: &str, spec: &VmSpec) -> Result<()> {
        info!(iso = %iso, vm = %vm, "Creating VM from ISO");
        self.hypervisor
            .create_vm(vm, spec, iso)
            .await
            .map_err(|e| LifecycleError::mutation(Operation::Create, vm, e))
    }

    /// Send `spec` with live MACs spliced into the declared NICs, then wait
    /// for the hypervisor to report it.
    async fn apply_config(&self, vm: &VmRef, spec: &VmSpec) -> Result<()> {
        let live = self.fetch(vm).await?;

        let mut payload = spec.clone();
        payload.networks = network_update_payload(&live.networks, &spec.networks);

        debug!(vm = %vm, nics = payload.networks.len(), "Updating VM configuration");
        self.hypervisor
            .update_config(vm, &payload)
            .await
            .map_err(|e| LifecycleError::mutation(Operation::UpdateConfig, vm, e))?;

        let hv = self.hypervisor.as_ref();
        let sent = &payload;
        self.settle
            .wait_for(&vm.to_string(), "apply configuration", move || async move {
                hv.fetch_live_config(vm)
                    .await
                    .map(|live| config_applied(&live, sent).then_some(()))
            })
            .await
    }

    /// Grow the primary disk to the requested size. Never shrinks.
    async fn grow_primary_disk(&self, vm: &VmRef, spec: &VmSpec) -> Result<()> {
        let Some(requested) = spec.disk_size_gib else {
            return Ok(());
        };

        let current = self.fetch(vm).await?.disk_size_gib;
        if requested <= current {
            debug!(vm = %vm, requested, current, "Primary disk already large enough");
            return Ok(());
        }

        let delta = requested - current;
        info!(vm = %vm, device = %self.primary_disk, current, requested, delta, "Growing primary disk");
        self.hypervisor
            .resize_disk(vm, &self.primary_disk, delta)
            .await
            .map_err(|e| LifecycleError::mutation(Operation::ResizeDisk, vm, e))?;

        let hv = self.hypervisor.as_ref();
        self.settle
            .wait_for(&vm.to_string(), "grow primary disk", move || async move {
                hv.fetch_live_config(vm)
                    .await
                    .map(|live| (live.disk_size_gib >= requested).then_some(()))
            })
            .await
    }

    async fn start(&self, vm: &VmRef) -> Result<()> {
        match self.hypervisor.start_vm(vm).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_running() => {
                debug!(vm = %vm, "VM already running");
                Ok(())
            }
            Err(e) => Err(LifecycleError::mutation(Operation::Start, vm, e)),
        }
    }

    /// Stop the VM and wait until it is reported stopped.
    async fn stop(&self, vm: &VmRef) -> Result<()> {
        match self.hypervisor.stop_vm(vm).await {
            Ok(()) => {}
            Err(e) if e.is_already_stopped() => debug!(vm = %vm, "VM already stopped"),
            Err(e) => return Err(LifecycleError::mutation(Operation::Stop, vm, e)),
        }

        let hv = self.hypervisor.as_ref();
        self.settle
            .wait_for(&vm.to_string(), "stop", move || async move {
                hv.fetch_live_config(vm)
                    .await
                    .map(|live| (live.state == VmState::Stopped).then_some(()))
            })
            .await
    }

    async fn fetch(&self, vm: &VmRef) -> Result<LiveState> {
        self.hypervisor
            .fetch_live_config(vm)
            .await
            .map_err(|e| LifecycleError::lookup(vm, e))
    }

    async fn provision(&self, vm: &VmRef, vm_name: &str, kind: ProvisioningKind) -> Result<()> {
        match &self.provisioner {
            Some(provisioner) => {
                info!(vm = %vm, %kind, "Running post-boot provisioning");
                provisioner.provision(vm, vm_name, kind).await
            }
            None => {
                warn!(vm = %vm, %kind, "No provisioner configured, skipping post-boot provisioning");
                Ok(())
            }
        }
    }
}

fn validate(spec: &VmSpec) -> Result<()> {
    spec.validate()
        .map_err(|e| LifecycleError::InvalidSpec(e.to_string()))
}

/// Whether the live snapshot reflects the configuration update `sent`.
///
/// Every sent NIC must be present with the sent model type, and with the sent
/// MAC where one was given. Every sent disk index must be present.
fn config_applied(live: &LiveState, sent: &VmSpec) -> bool {
    let scalars = live.name == sent.name
        && live.description == sent.description
        && live.onboot == sent.onboot
        && live.storage == sent.storage
        && live.qemu_os == sent.qemu_os
        && live.memory_mib == sent.memory_mib
        && live.cores == sent.cores
        && live.sockets == sent.sockets;

    let disks = sent.disks.indices().all(|idx| live.disks.contains(idx));

    let networks = sent.networks.iter().all(|(idx, nic)| {
        live.networks.get(idx).is_some_and(|found| {
            found.model.kind == nic.model.kind
                && nic.model.mac.map_or(true, |mac| found.model.mac == Some(mac))
        })
    });

    scalars && disks && networks
}
