//! Integration tests for the lifecycle orchestrator.
//!
//! These drive [`Lifecycle`] against the in-memory mock backend and assert on
//! the adapter calls it issued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use qmconverge_core::{
    ConcurrencyGate, DesiredVm, Lifecycle, LifecycleError, LifecycleState, Provisioner,
    ProvisioningKind, ResourceId, SettlePolicy,
};
use qmconverge_hypervisor::{
    Call, DiskBus, DiskDevice, DiskSize, Hypervisor, HypervisorError, LiveState, MockBackend,
    NetworkDevice, NicKind, NicModel, Operation, VmRef, VmSpec, VmState,
};

const TEMPLATE: &str = "ubuntu-template";

fn fast_settle() -> SettlePolicy {
    SettlePolicy {
        timeout: Duration::from_millis(500),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

fn lifecycle(backend: &Arc<MockBackend>) -> Lifecycle {
    Lifecycle::new(backend.clone(), ConcurrencyGate::new(4)).with_settle_policy(fast_settle())
}

fn template_spec() -> VmSpec {
    VmSpec::new(TEMPLATE, "pve1")
        .with_disk_size(32)
        .with_disk(
            0,
            DiskDevice::new(DiskBus::Virtio, "local-lvm", DiskSize::from_gib(32)).unwrap(),
        )
        .with_network(0, NetworkDevice::new(NicModel::new(NicKind::Virtio)).with_bridge("vmbr0"))
}

fn seed_template(backend: &MockBackend) -> VmRef {
    backend.seed_vm(&template_spec(), VmState::Stopped).unwrap()
}

fn from_iso(name: &str) -> DesiredVm {
    DesiredVm::new(
        VmSpec::new(name, "pve1")
            .with_memory(1024)
            .with_network(0, NetworkDevice::new(NicModel::new(NicKind::Virtio)).with_bridge("vmbr0")),
    )
    .from_clone("")
    .from_iso("local:iso/debian.iso")
    .provision_as(None)
}

fn from_template(name: &str, disk_gib: u64) -> DesiredVm {
    DesiredVm::new(VmSpec::new(name, "pve1").with_memory(2048).with_disk_size(disk_gib))
        .from_clone(TEMPLATE)
        .provision_as(None)
}

fn resize_deltas(backend: &MockBackend) -> Vec<(String, u64)> {
    backend
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::ResizeDisk { device, delta_gib, .. } => Some((device, delta_gib)),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn test_create_from_iso_issues_create_then_start() {
    let backend = Arc::new(MockBackend::new());
    let lc = lifecycle(&backend);

    let converged = lc.create(&from_iso("web-1")).await.unwrap();

    assert_eq!(backend.mutations(), vec![Operation::Create, Operation::Start]);
    assert_eq!(converged.state, LifecycleState::Running);
    assert_eq!(converged.resource_id.to_string(), "pve1/qemu/100");
    assert_eq!(backend.peek(100).unwrap().state, VmState::Running);
    assert_eq!(lc.gate().available(), 4);
}

#[tokio::test]
async fn test_create_from_clone_grows_disk_after_settle() {
    let backend = Arc::new(MockBackend::new().with_settle_lag(2));
    seed_template(&backend);
    let lc = lifecycle(&backend);

    let converged = lc.create(&from_template("web-2", 40)).await.unwrap();

    assert_eq!(
        backend.mutations(),
        vec![Operation::Clone, Operation::ResizeDisk, Operation::Start]
    );
    assert_eq!(resize_deltas(&backend), vec![("virtio0".to_string(), 8)]);

    let live = backend.peek(converged.vm.vm_id()).unwrap();
    assert_eq!(live.name, "web-2");
    assert_eq!(live.disk_size_gib, 40);
    assert_eq!(live.state, VmState::Running);
}

#[tokio::test]
async fn test_clone_never_shrinks_disk() {
    let backend = Arc::new(MockBackend::new());
    seed_template(&backend);
    let lc = lifecycle(&backend);

    let converged = lc.create(&from_template("web-3", 20)).await.unwrap();

    assert_eq!(backend.mutations(), vec![Operation::Clone, Operation::Start]);
    assert!(resize_deltas(&backend).is_empty());
    assert_eq!(backend.peek(converged.vm.vm_id()).unwrap().disk_size_gib, 32);
}

#[tokio::test]
async fn test_clone_from_missing_template_mutates_nothing() {
    let backend = Arc::new(MockBackend::new());
    let lc = lifecycle(&backend);

    let err = lc.create(&from_template("web-4", 40)).await.unwrap_err();

    assert!(matches!(err, LifecycleError::LookupFailure { ref target, .. } if target == TEMPLATE));
    assert!(backend.mutations().is_empty());
}

#[tokio::test]
async fn test_missing_source_is_rejected_before_mutation() {
    let backend = Arc::new(MockBackend::new());
    let lc = lifecycle(&backend);
    let desired = DesiredVm::new(VmSpec::new("web-5", "pve1")).provision_as(None);

    let err = lc.create(&desired).await.unwrap_err();

    assert!(matches!(err, LifecycleError::InvalidSpec(_)));
    assert!(backend.mutations().is_empty());
}

#[tokio::test]
async fn test_unknown_os_type_fails_before_any_call() {
    let backend = Arc::new(MockBackend::new());
    let lc = lifecycle(&backend);
    let desired = from_iso("web-6").provision_as(Some("windows"));

    let err = lc.create(&desired).await.unwrap_err();

    assert_eq!(err.to_string(), "Unknown os_type: windows");
    assert!(backend.calls().is_empty());
}

// =============================================================================
// Duplicate handling and recycle
// =============================================================================

#[tokio::test]
async fn test_force_create_conflicts_with_existing_name() {
    let backend = Arc::new(MockBackend::new());
    backend.seed_vm(&VmSpec::new("web-7", "pve1"), VmState::Running).unwrap();
    let lc = lifecycle(&backend);

    let err = lc
        .create(&from_iso("web-7").force_create(true))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::DuplicateConflict { vm_id: 100, .. }));
    assert!(backend.mutations().is_empty());
    assert_eq!(lc.gate().available(), 4);
}

#[tokio::test]
async fn test_existing_name_on_other_node_is_rejected() {
    let backend = Arc::new(MockBackend::new());
    backend.seed_vm(&VmSpec::new("web-8", "node1"), VmState::Running).unwrap();
    let lc = lifecycle(&backend);

    let mut desired = from_iso("web-8");
    desired.spec.target_node = "node2".to_string();
    let err = lc.create(&desired).await.unwrap_err();

    assert!(matches!(err, LifecycleError::NodeMismatch { .. }));
    assert!(backend.mutations().is_empty());
}

#[tokio::test]
async fn test_recycle_stops_updates_and_starts_keeping_macs() {
    let backend = Arc::new(MockBackend::new());
    let seeded = VmSpec::new("web-9", "pve1")
        .with_network(0, NetworkDevice::new(NicModel::new(NicKind::Virtio)).with_bridge("vmbr0"));
    let vm = backend.seed_vm(&seeded, VmState::Running).unwrap();
    let mac = backend.peek(vm.vm_id()).unwrap().networks.get(0).unwrap().model.mac;
    let lc = lifecycle(&backend);

    let mut desired = from_iso("web-9");
    desired.spec.memory_mib = 4096;
    desired.spec.networks.insert(0, NetworkDevice::new(NicModel::new(NicKind::E1000)));
    let converged = lc.create(&desired).await.unwrap();

    assert_eq!(converged.vm, vm);
    assert_eq!(
        backend.mutations(),
        vec![Operation::Stop, Operation::UpdateConfig, Operation::Start]
    );
    let live = backend.peek(vm.vm_id()).unwrap();
    assert_eq!(live.memory_mib, 4096);
    let nic = live.networks.get(0).unwrap();
    assert_eq!(nic.model.kind, NicKind::E1000);
    assert_eq!(nic.model.mac, mac);
}

#[tokio::test]
async fn test_recycle_ignores_already_stopped() {
    let backend = Arc::new(MockBackend::new());
    backend.seed_vm(&VmSpec::new("web-10", "pve1"), VmState::Stopped).unwrap();
    let lc = lifecycle(&backend);

    let converged = lc.create(&from_iso("web-10")).await.unwrap();

    assert_eq!(converged.state, LifecycleState::Running);
    assert_eq!(
        backend.mutations(),
        vec![Operation::Stop, Operation::UpdateConfig, Operation::Start]
    );
}

// =============================================================================
// Update, read back, import
// =============================================================================

#[tokio::test]
async fn test_update_preserves_existing_macs() {
    let backend = Arc::new(MockBackend::new().with_settle_lag(1));
    let lc = lifecycle(&backend);
    let converged = lc.create(&from_iso("web-11")).await.unwrap();
    let vm_id = converged.vm.vm_id();
    let mac = backend.peek(vm_id).unwrap().networks.get(0).unwrap().model.mac;
    assert!(mac.is_some());
    backend.clear_calls();

    let mut desired = from_iso("web-11");
    desired.spec.memory_mib = 3072;
    desired.spec.networks.insert(0, NetworkDevice::new(NicModel::new(NicKind::E1000)));
    desired
        .spec
        .networks
        .insert(1, NetworkDevice::new(NicModel::new(NicKind::Virtio)).with_bridge("vmbr1"));
    let updated = lc.update(&converged.resource_id, &desired).await.unwrap();

    assert_eq!(updated.state, LifecycleState::Running);
    assert_eq!(backend.mutations(), vec![Operation::UpdateConfig, Operation::Start]);

    let sent = backend
        .calls()
        .into_iter()
        .find_map(|call| match call {
            Call::UpdateConfig { spec, .. } => Some(spec),
            _ => None,
        })
        .unwrap();
    assert_eq!(sent.networks.get(0).unwrap().model.mac, mac);
    assert_eq!(sent.networks.get(1).unwrap().model.mac, None);

    let live = backend.peek(vm_id).unwrap();
    assert_eq!(live.memory_mib, 3072);
    assert_eq!(live.networks.get(0).unwrap().model.mac, mac);
    assert!(live.networks.get(1).unwrap().model.mac.is_some());
}

#[tokio::test]
async fn test_update_waits_for_new_nic_before_returning() {
    let backend = Arc::new(MockBackend::new().with_settle_lag(3));
    let lc = lifecycle(&backend);
    let converged = lc.create(&from_iso("web-23")).await.unwrap();

    let mut desired = from_iso("web-23");
    desired
        .spec
        .networks
        .insert(1, NetworkDevice::new(NicModel::new(NicKind::Virtio)).with_bridge("vmbr1"));
    lc.update(&converged.resource_id, &desired).await.unwrap();

    let declared = lc.read(&converged.resource_id, &desired.spec).await.unwrap();
    assert_eq!(declared.spec.networks.len(), 2);
    let nic = declared.spec.networks.get(1).unwrap();
    assert_eq!(nic.bridge.as_deref(), Some("vmbr1"));
    assert!(nic.model.mac.is_some());
}

#[tokio::test]
async fn test_update_waits_for_description_change() {
    let backend = Arc::new(MockBackend::new().with_settle_lag(3));
    let lc = lifecycle(&backend);
    let converged = lc.create(&from_iso("web-24")).await.unwrap();

    let mut desired = from_iso("web-24");
    desired.spec = desired.spec.with_description("primary database");
    lc.update(&converged.resource_id, &desired).await.unwrap();

    let declared = lc.read(&converged.resource_id, &desired.spec).await.unwrap();
    assert_eq!(declared.spec.description, "primary database");
}

#[tokio::test]
async fn test_update_grows_disk_by_difference() {
    let backend = Arc::new(MockBackend::new());
    seed_template(&backend);
    let lc = lifecycle(&backend);
    let converged = lc.create(&from_template("web-12", 32)).await.unwrap();
    backend.clear_calls();

    lc.update(&converged.resource_id, &from_template("web-12", 40))
        .await
        .unwrap();
    assert_eq!(resize_deltas(&backend), vec![("virtio0".to_string(), 8)]);

    backend.clear_calls();
    lc.update(&converged.resource_id, &from_template("web-12", 20))
        .await
        .unwrap();
    assert!(resize_deltas(&backend).is_empty());
    assert_eq!(backend.peek(converged.vm.vm_id()).unwrap().disk_size_gib, 40);
}

#[tokio::test]
async fn test_update_refuses_to_move_node() {
    let backend = Arc::new(MockBackend::new());
    let lc = lifecycle(&backend);
    let id: ResourceId = "pve1/qemu/100".parse().unwrap();

    let mut desired = from_iso("web-13");
    desired.spec.target_node = "pve2".to_string();
    let err = lc.update(&id, &desired).await.unwrap_err();

    assert!(matches!(err, LifecycleError::NodeMismatch { ref node, .. } if node == "pve1"));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_read_back_records_generated_values() {
    let backend = Arc::new(MockBackend::new());
    let lc = lifecycle(&backend);
    let desired = from_iso("web-14");
    let converged = lc.create(&desired).await.unwrap();

    let declared = lc.read(&converged.resource_id, &desired.spec).await.unwrap();

    assert_eq!(declared.resource_id, converged.resource_id);
    assert_eq!(declared.spec.disk_size_gib, Some(8));
    let nic = declared.spec.networks.get(0).unwrap();
    assert!(nic.model.mac.is_some());
    assert_eq!(nic.bridge.as_deref(), Some("vmbr0"));

    // Feeding the baseline back is a no-op for the NIC identity.
    let again = lc.read(&converged.resource_id, &declared.spec).await.unwrap();
    assert_eq!(again.spec.networks, declared.spec.networks);
}

#[tokio::test]
async fn test_import_by_name() {
    let backend = Arc::new(MockBackend::new());
    backend
        .seed_vm(&VmSpec::new("legacy", "pve2").with_memory(4096), VmState::Running)
        .unwrap();
    let lc = lifecycle(&backend);

    let declared = lc.import("legacy").await.unwrap();
    assert_eq!(declared.resource_id.to_string(), "pve2/qemu/100");
    assert_eq!(declared.spec.memory_mib, 4096);
    assert_eq!(declared.spec.target_node, "pve2");

    let err = lc.import("missing").await.unwrap_err();
    assert!(matches!(err, LifecycleError::LookupFailure { .. }));
    assert!(backend.mutations().is_empty());
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn test_delete_stops_then_deletes() {
    let backend = Arc::new(MockBackend::new().with_settle_lag(2));
    let lc = lifecycle(&backend);
    let converged = lc.create(&from_iso("web-15")).await.unwrap();
    backend.clear_calls();

    let state = lc.delete(&converged.resource_id).await.unwrap();

    assert_eq!(state, LifecycleState::Deleted);
    assert_eq!(backend.mutations(), vec![Operation::Stop, Operation::Delete]);
    assert!(backend.peek(converged.vm.vm_id()).is_none());
}

#[tokio::test]
async fn test_delete_of_stopped_vm() {
    let backend = Arc::new(MockBackend::new());
    let vm = backend.seed_vm(&VmSpec::new("web-16", "pve1"), VmState::Stopped).unwrap();
    let lc = lifecycle(&backend);

    lc.delete(&ResourceId::from(&vm)).await.unwrap();
    assert!(backend.peek(vm.vm_id()).is_none());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_settle_timeout_aborts_and_releases_slot() {
    let backend = Arc::new(MockBackend::new().with_settle_lag(100_000));
    seed_template(&backend);
    let lc = Lifecycle::new(backend.clone(), ConcurrencyGate::new(1)).with_settle_policy(
        SettlePolicy {
            timeout: Duration::from_millis(50),
            ..fast_settle()
        },
    );

    let err = lc.create(&from_template("web-17", 40)).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Timeout { .. }));
    assert_eq!(backend.mutations(), vec![Operation::Clone]);
    assert_eq!(lc.gate().available(), 1);
}

#[tokio::test]
async fn test_fetch_error_during_settle_is_a_lookup_failure() {
    let backend = Arc::new(MockBackend::new());
    let vm = backend.seed_vm(&VmSpec::new("web-18", "pve1"), VmState::Running).unwrap();
    backend.fail_fetches(Some(HypervisorError::QueryFailed("503".to_string())));
    let lc = lifecycle(&backend);

    let err = lc.delete(&ResourceId::from(&vm)).await.unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::LookupFailure { source: HypervisorError::QueryFailed(_), .. }
    ));
    assert_eq!(backend.mutations(), vec![Operation::Stop]);
}

#[tokio::test]
async fn test_mutation_failure_is_propagated_verbatim() {
    let backend = Arc::new(MockBackend::new());
    backend.fail_next(Operation::Start, HypervisorError::StartFailed("boom".to_string()));
    let lc = lifecycle(&backend);

    let err = lc.create(&from_iso("web-19")).await.unwrap_err();

    match err {
        LifecycleError::MutationFailure { op, source, .. } => {
            assert_eq!(op, Operation::Start);
            assert_eq!(source, HypervisorError::StartFailed("boom".to_string()));
        }
        other => panic!("expected mutation failure, got {other:?}"),
    }
    // Nothing is rolled back.
    assert_eq!(backend.mutations(), vec![Operation::Create, Operation::Start]);
    assert_eq!(backend.peek(100).unwrap().state, VmState::Stopped);
    assert_eq!(lc.gate().available(), 4);
}

// =============================================================================
// Concurrency
// =============================================================================

/// Delegates to the mock, pausing in every call and recording how many calls
/// were in flight at once.
struct SlowBackend {
    inner: MockBackend,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowBackend {
    fn new() -> Self {
        Self {
            inner: MockBackend::new(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Hypervisor for SlowBackend {
    async fn lookup_by_name(&self, name: &str) -> qmconverge_hypervisor::error::Result<Option<VmRef>> {
        self.enter().await;
        self.inner.lookup_by_name(name).await
    }

    async fn next_vm_id(&self) -> qmconverge_hypervisor::error::Result<u32> {
        self.enter().await;
        self.inner.next_vm_id().await
    }

    async fn fetch_live_config(&self, vm: &VmRef) -> qmconverge_hypervisor::error::Result<LiveState> {
        self.enter().await;
        self.inner.fetch_live_config(vm).await
    }

    async fn create_vm(&self, vm: &VmRef, spec: &VmSpec, iso: &str) -> qmconverge_hypervisor::error::Result<()> {
        self.enter().await;
        self.inner.create_vm(vm, spec, iso).await
    }

    async fn clone_vm(&self, source: &VmRef, dest: &VmRef, spec: &VmSpec) -> qmconverge_hypervisor::error::Result<()> {
        self.enter().await;
        self.inner.clone_vm(source, dest, spec).await
    }

    async fn update_config(&self, vm: &VmRef, spec: &VmSpec) -> qmconverge_hypervisor::error::Result<()> {
        self.enter().await;
        self.inner.update_config(vm, spec).await
    }

    async fn resize_disk(&self, vm: &VmRef, device: &str, delta_gib: u64) -> qmconverge_hypervisor::error::Result<()> {
        self.enter().await;
        self.inner.resize_disk(vm, device, delta_gib).await
    }

    async fn start_vm(&self, vm: &VmRef) -> qmconverge_hypervisor::error::Result<()> {
        self.enter().await;
        self.inner.start_vm(vm).await
    }

    async fn stop_vm(&self, vm: &VmRef) -> qmconverge_hypervisor::error::Result<()> {
        self.enter().await;
        self.inner.stop_vm(vm).await
    }

    async fn delete_vm(&self, vm: &VmRef) -> qmconverge_hypervisor::error::Result<()> {
        self.enter().await;
        self.inner.delete_vm(vm).await
    }
}

#[tokio::test]
async fn test_gate_bounds_in_flight_operations() {
    let backend = Arc::new(SlowBackend::new());
    backend.inner.seed_vm(&template_spec(), VmState::Stopped).unwrap();
    let lc = Arc::new(
        Lifecycle::new(backend.clone(), ConcurrencyGate::new(2)).with_settle_policy(fast_settle()),
    );

    // Half the VMs already exist and get recycled, the rest are new.
    for i in 0..3 {
        backend
            .inner
            .seed_vm(&VmSpec::new(format!("batch-{i}"), "pve1"), VmState::Running)
            .unwrap();
    }

    let mut tasks = Vec::new();
    for i in 0..6 {
        let lc = Arc::clone(&lc);
        tasks.push(tokio::spawn(async move {
            lc.create(&from_iso(&format!("batch-{i}"))).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().state, LifecycleState::Running);
    }

    assert!(backend.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(lc.gate().available(), 2);
}

#[tokio::test]
async fn test_concurrent_creates_get_distinct_ids() {
    let backend = Arc::new(SlowBackend::new());
    let lc = Arc::new(
        Lifecycle::new(backend.clone(), ConcurrencyGate::new(4)).with_settle_policy(fast_settle()),
    );

    let tasks: Vec<_> = ["new-a", "new-b", "new-c"]
        .into_iter()
        .map(|name| {
            let lc = Arc::clone(&lc);
            tokio::spawn(async move { lc.create(&from_iso(name)).await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().resource_id.to_string());
    }
    ids.sort();
    assert_eq!(ids, vec!["pve1/qemu/100", "pve1/qemu/101", "pve1/qemu/102"]);

    let creates = backend
        .inner
        .mutations()
        .into_iter()
        .filter(|op| *op == Operation::Create)
        .count();
    assert_eq!(creates, 3);
}

#[tokio::test]
async fn test_no_call_is_issued_without_a_slot() {
    let backend = Arc::new(MockBackend::new());
    let lc = Arc::new(lifecycle(&backend));
    let gate = lc.gate().clone();

    // Hold every slot.
    let mut held = Vec::new();
    for _ in 0..gate.capacity() {
        held.push(gate.acquire().await.unwrap());
    }

    let task = {
        let lc = Arc::clone(&lc);
        tokio::spawn(async move { lc.create(&from_iso("queued")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(backend.calls().is_empty());

    held.clear();
    task.await.unwrap().unwrap();
    assert_eq!(backend.mutations(), vec![Operation::Create, Operation::Start]);
}

// =============================================================================
// Provisioning
// =============================================================================

struct RecordingProvisioner {
    gate: ConcurrencyGate,
    seen: Mutex<Vec<(String, ProvisioningKind, usize)>>,
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn provision(
        &self,
        _vm: &VmRef,
        vm_name: &str,
        kind: ProvisioningKind,
    ) -> qmconverge_core::Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push((vm_name.to_string(), kind, self.gate.available()));
        Ok(())
    }
}

#[tokio::test]
async fn test_provisioner_runs_after_slot_release() {
    let backend = Arc::new(MockBackend::new());
    let gate = ConcurrencyGate::new(1);
    let provisioner = Arc::new(RecordingProvisioner {
        gate: gate.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let lc = Lifecycle::new(backend.clone(), gate)
        .with_settle_policy(fast_settle())
        .with_provisioner(provisioner.clone());

    lc.create(&from_iso("web-20").provision_as(Some("centos")))
        .await
        .unwrap();

    let seen = provisioner.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![("web-20".to_string(), ProvisioningKind::Centos, 1)]);
    assert_eq!(backend.peek(100).unwrap().state, VmState::Running);
}

struct FailingProvisioner;

#[async_trait]
impl Provisioner for FailingProvisioner {
    async fn provision(
        &self,
        vm: &VmRef,
        _vm_name: &str,
        _kind: ProvisioningKind,
    ) -> qmconverge_core::Result<()> {
        Err(LifecycleError::ProvisioningFailed {
            vm: vm.to_string(),
            message: "ssh unreachable".to_string(),
        })
    }
}

#[tokio::test]
async fn test_provisioning_failure_leaves_vm_running() {
    let backend = Arc::new(MockBackend::new());
    let lc = lifecycle(&backend).with_provisioner(Arc::new(FailingProvisioner));

    let err = lc
        .create(&from_iso("web-21").provision_as(Some("ubuntu")))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::ProvisioningFailed { .. }));
    assert_eq!(lc.gate().available(), 4);
    assert_eq!(backend.peek(100).unwrap().state, VmState::Running);
}

#[tokio::test]
async fn test_delete_failure_leaves_vm_stopped() {
    let backend = Arc::new(MockBackend::new());
    let lc = lifecycle(&backend);
    let vm = backend.seed_vm(&VmSpec::new("web-22", "pve1"), VmState::Running).unwrap();
    backend.fail_next(Operation::Delete, HypervisorError::DeleteFailed("locked".to_string()));

    let err = lc.delete(&ResourceId::from(&vm)).await.unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::MutationFailure { op: Operation::Delete, .. }
    ));
    assert_eq!(backend.mutations(), vec![Operation::Stop, Operation::Delete]);
    assert_eq!(backend.peek(vm.vm_id()).unwrap().state, VmState::Stopped);
}
