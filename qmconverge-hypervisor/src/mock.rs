//! Mock hypervisor backend for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::devices::{DeviceCollection, DiskDevice, DiskSize, NetworkDevice};
use crate::error::{HypervisorError, Result};
use crate::nic_model::MacAddress;
use crate::traits::Hypervisor;
use crate::types::*;

/// First id handed out by [`Hypervisor::next_vm_id`].
const FIRST_VM_ID: u32 = 100;

/// Primary disk size of an ISO-installed VM that did not request one.
const DEFAULT_DISK_GIB: u64 = 8;

/// One adapter call as seen by the mock, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    LookupByName(String),
    NextVmId,
    FetchLiveConfig(VmRef),
    Create { vm: VmRef, iso: String },
    Clone { source: VmRef, dest: VmRef },
    UpdateConfig { vm: VmRef, spec: VmSpec },
    ResizeDisk { vm: VmRef, device: String, delta_gib: u64 },
    Start(VmRef),
    Stop(VmRef),
    Delete(VmRef),
}

impl Call {
    /// The mutation this call performs, if any.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Call::LookupByName(_) | Call::NextVmId | Call::FetchLiveConfig(_) => None,
            Call::Create { .. } => Some(Operation::Create),
            Call::Clone { .. } => Some(Operation::Clone),
            Call::UpdateConfig { .. } => Some(Operation::UpdateConfig),
            Call::ResizeDisk { .. } => Some(Operation::ResizeDisk),
            Call::Start(_) => Some(Operation::Start),
            Call::Stop(_) => Some(Operation::Stop),
            Call::Delete(_) => Some(Operation::Delete),
        }
    }
}

/// Mock hypervisor backend for testing.
///
/// VMs live in memory. Mutations other than `create_vm` are eventually
/// consistent: a change becomes visible to [`Hypervisor::fetch_live_config`]
/// only after `settle_lag` further fetches of that VM, which is what the
/// lifecycle settle polling has to cope with against a real cluster. NICs submitted without a MAC get a
/// fresh random one, just like the real API does.
pub struct MockBackend {
    state: RwLock<MockState>,
    settle_lag: u32,
    primary_disk: String,
}

#[derive(Default)]
struct MockState {
    vms: HashMap<u32, MockVm>,
    journal: Vec<Call>,
    failures: HashMap<Operation, HypervisorError>,
    fetch_failure: Option<HypervisorError>,
}

struct MockVm {
    node: String,
    /// What `fetch_live_config` currently reports; `None` until a fresh clone lands
    visible: Option<LiveState>,
    pending: Option<Pending>,
}

struct Pending {
    state: LiveState,
    fetches_left: u32,
}

impl MockVm {
    fn latest(&self) -> Option<&LiveState> {
        self.pending
            .as_ref()
            .map(|p| &p.state)
            .or(self.visible.as_ref())
    }

    fn stage(&mut self, state: LiveState, lag: u32) {
        if lag == 0 {
            self.visible = Some(state);
            self.pending = None;
        } else {
            self.pending = Some(Pending {
                state,
                fetches_left: lag,
            });
        }
    }

    fn observe(&mut self) -> Option<LiveState> {
        if let Some(pending) = self.pending.as_mut() {
            if pending.fetches_left == 0 {
                self.visible = self.pending.take().map(|p| p.state);
            } else {
                pending.fetches_left -= 1;
            }
        }
        self.visible.clone()
    }
}

impl MockBackend {
    /// Create a new mock backend whose mutations are visible immediately.
    pub fn new() -> Self {
        info!("Creating mock hypervisor backend");
        Self {
            state: RwLock::new(MockState::default()),
            settle_lag: 0,
            primary_disk: "virtio0".to_string(),
        }
    }

    /// Delay visibility of every mutation by `fetches` live-config reads.
    pub fn with_settle_lag(mut self, fetches: u32) -> Self {
        self.settle_lag = fetches;
        self
    }

    /// Device whose size is reported as `LiveState::disk_size_gib`.
    pub fn with_primary_disk(mut self, device: impl Into<String>) -> Self {
        self.primary_disk = device.into();
        self
    }

    /// Insert a VM that already exists on the cluster (a template, or a VM
    /// left over from an earlier run). It is visible immediately.
    pub fn seed_vm(&self, spec: &VmSpec, state: VmState) -> Result<VmRef> {
        let mut st = self.write()?;
        let vm_id = Self::allocate_id(&st);
        let live = live_from_spec(spec, spec.disk_size_gib.unwrap_or(DEFAULT_DISK_GIB), state, None);
        st.vms.insert(
            vm_id,
            MockVm {
                node: spec.target_node.clone(),
                visible: Some(live),
                pending: None,
            },
        );
        debug!(vm_id, vm_name = %spec.name, "Seeded mock VM");
        Ok(VmRef::new(spec.target_node.clone(), vm_id))
    }

    /// Insert a VM under an id recorded by an earlier run.
    pub fn restore_vm(&self, vm: &VmRef, spec: &VmSpec, state: VmState) -> Result<()> {
        let mut st = self.write()?;
        if st.vms.contains_key(&vm.vm_id()) {
            return Err(HypervisorError::InvalidState(format!(
                "VM {} already exists",
                vm.vm_id()
            )));
        }
        let live = live_from_spec(spec, spec.disk_size_gib.unwrap_or(DEFAULT_DISK_GIB), state, None);
        st.vms.insert(
            vm.vm_id(),
            MockVm {
                node: vm.node().to_string(),
                visible: Some(live),
                pending: None,
            },
        );
        debug!(vm = %vm, vm_name = %spec.name, "Restored mock VM");
        Ok(())
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: Operation, error: HypervisorError) {
        if let Ok(mut st) = self.state.write() {
            st.failures.insert(op, error);
        }
    }

    /// Make every `fetch_live_config` fail with `error` until cleared with `None`.
    pub fn fail_fetches(&self, error: Option<HypervisorError>) {
        if let Ok(mut st) = self.state.write() {
            st.fetch_failure = error;
        }
    }

    /// Every call issued so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state
            .read()
            .map(|st| st.journal.clone())
            .unwrap_or_default()
    }

    /// Mutating calls issued so far, in order.
    pub fn mutations(&self) -> Vec<Operation> {
        self.calls().iter().filter_map(Call::operation).collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut st) = self.state.write() {
            st.journal.clear();
        }
    }

    /// Latest state of a VM including changes not yet visible through the API.
    pub fn peek(&self, vm_id: u32) -> Option<LiveState> {
        let st = self.state.read().ok()?;
        st.vms.get(&vm_id).and_then(|vm| vm.latest().cloned())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MockState>> {
        self.state
            .write()
            .map_err(|_| HypervisorError::Internal("Lock poisoned".to_string()))
    }

    fn allocate_id(st: &MockState) -> u32 {
        st.vms
            .keys()
            .max()
            .map(|max| max + 1)
            .unwrap_or(FIRST_VM_ID)
            .max(FIRST_VM_ID)
    }

    /// Record the call and fire any failure queued for its operation.
    fn begin(st: &mut MockState, call: Call) -> Result<()> {
        let op = call.operation();
        st.journal.push(call);
        match op.and_then(|op| st.failures.remove(&op)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn vm_mut<'a>(st: &'a mut MockState, vm: &VmRef) -> Result<&'a mut MockVm> {
        st.vms
            .get_mut(&vm.vm_id())
            .filter(|m| m.node == vm.node())
            .ok_or_else(|| HypervisorError::VmNotFound(vm.to_string()))
    }

    fn latest_of(mock: &MockVm, vm: &VmRef) -> Result<LiveState> {
        mock.latest()
            .cloned()
            .ok_or_else(|| HypervisorError::VmNotFound(vm.to_string()))
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Build what the hypervisor would report after applying `spec`.
///
/// Existing disks keep their allocated size; only `resize_disk` grows them.
/// Devices the spec does not mention are left as they were.
fn live_from_spec(
    spec: &VmSpec,
    disk_size_gib: u64,
    state: VmState,
    previous: Option<&LiveState>,
) -> LiveState {
    let mut disks: DeviceCollection<DiskDevice> = spec
        .disks
        .iter()
        .map(|(idx, disk)| {
            let mut disk = disk.clone();
            if let Some(old) = previous.and_then(|p| p.disks.get(idx)) {
                disk.size = old.size;
            }
            (idx, disk)
        })
        .collect();
    let mut networks = spec.networks.clone();

    if let Some(previous) = previous {
        for (idx, disk) in previous.disks.iter() {
            if !disks.contains(idx) {
                disks.insert(idx, disk.clone());
            }
        }
        for (idx, nic) in previous.networks.iter() {
            if !networks.contains(idx) {
                networks.insert(idx, nic.clone());
            }
        }
    }

    LiveState {
        name: spec.name.clone(),
        state,
        description: spec.description.clone(),
        onboot: spec.onboot,
        storage: spec.storage.clone(),
        qemu_os: spec.qemu_os.clone(),
        memory_mib: spec.memory_mib,
        cores: spec.cores,
        sockets: spec.sockets,
        disk_size_gib,
        disks,
        networks: assign_macs(&networks),
    }
}

fn assign_macs(networks: &DeviceCollection<NetworkDevice>) -> DeviceCollection<NetworkDevice> {
    networks
        .iter()
        .map(|(idx, nic)| {
            let mut nic = nic.clone();
            if nic.model.mac.is_none() {
                nic.model = nic.model.with_mac(MacAddress::random());
            }
            (idx, nic)
        })
        .collect()
}

#[async_trait]
impl Hypervisor for MockBackend {
    #[instrument(skip(self))]
    async fn lookup_by_name(&self, name: &str) -> Result<Option<VmRef>> {
        let mut st = self.write()?;
        Self::begin(&mut st, Call::LookupByName(name.to_string()))?;

        let mut found: Vec<(u32, &MockVm)> = st
            .vms
            .iter()
            .filter(|(_, vm)| vm.latest().map(|l| l.name == name).unwrap_or(false))
            .map(|(id, vm)| (*id, vm))
            .collect();
        found.sort_by_key(|(id, _)| *id);

        Ok(found
            .first()
            .map(|(id, vm)| VmRef::new(vm.node.clone(), *id)))
    }

    async fn next_vm_id(&self) -> Result<u32> {
        let mut st = self.write()?;
        Self::begin(&mut st, Call::NextVmId)?;
        Ok(Self::allocate_id(&st))
    }

    #[instrument(skip(self), fields(vm = %vm))]
    async fn fetch_live_config(&self, vm: &VmRef) -> Result<LiveState> {
        let mut st = self.write()?;
        Self::begin(&mut st, Call::FetchLiveConfig(vm.clone()))?;
        if let Some(err) = st.fetch_failure.clone() {
            return Err(err);
        }

        Self::vm_mut(&mut st, vm)?
            .observe()
            .ok_or_else(|| HypervisorError::VmNotFound(vm.to_string()))
    }

    #[instrument(skip(self, spec), fields(vm = %vm, vm_name = %spec.name))]
    async fn create_vm(&self, vm: &VmRef, spec: &VmSpec, iso: &str) -> Result<()> {
        info!(iso = %iso, "Creating mock VM");

        let mut st = self.write()?;
        Self::begin(
            &mut st,
            Call::Create {
                vm: vm.clone(),
                iso: iso.to_string(),
            },
        )?;
        spec.validate()
            .map_err(|e| HypervisorError::CreateFailed(e.to_string()))?;

        if st.vms.contains_key(&vm.vm_id()) {
            return Err(HypervisorError::CreateFailed(format!(
                "VM {} already exists",
                vm.vm_id()
            )));
        }

        let live = live_from_spec(
            spec,
            spec.disk_size_gib.unwrap_or(DEFAULT_DISK_GIB),
            VmState::Stopped,
            None,
        );
        // Creation completes before the API call returns; only later changes lag.
        st.vms.insert(
            vm.vm_id(),
            MockVm {
                node: vm.node().to_string(),
                visible: Some(live),
                pending: None,
            },
        );

        info!("Mock VM created");
        Ok(())
    }

    #[instrument(skip(self, spec), fields(source = %source, dest = %dest))]
    async fn clone_vm(&self, source: &VmRef, dest: &VmRef, spec: &VmSpec) -> Result<()> {
        info!("Cloning mock VM");

        let mut st = self.write()?;
        Self::begin(
            &mut st,
            Call::Clone {
                source: source.clone(),
                dest: dest.clone(),
            },
        )?;

        let template = st
            .vms
            .get(&source.vm_id())
            .and_then(|vm| vm.latest().cloned())
            .ok_or_else(|| HypervisorError::CloneFailed(format!("source {} not found", source)))?;

        if st.vms.contains_key(&dest.vm_id()) {
            return Err(HypervisorError::CloneFailed(format!(
                "VM {} already exists",
                dest.vm_id()
            )));
        }

        // A clone gets fresh MACs on the NICs it inherits from the template.
        let mut live = live_from_spec(spec, template.disk_size_gib, VmState::Stopped, Some(&template));
        for idx in template.networks.indices() {
            if !spec.networks.contains(idx) {
                if let Some(nic) = live.networks.get_mut(idx) {
                    nic.model = nic.model.with_mac(MacAddress::random());
                }
            }
        }

        let mut mock = MockVm {
            node: dest.node().to_string(),
            visible: None,
            pending: None,
        };
        mock.stage(live, self.settle_lag);
        st.vms.insert(dest.vm_id(), mock);

        info!("Mock VM cloned");
        Ok(())
    }

    #[instrument(skip(self, spec), fields(vm = %vm))]
    async fn update_config(&self, vm: &VmRef, spec: &VmSpec) -> Result<()> {
        info!("Updating mock VM config");

        let mut st = self.write()?;
        Self::begin(
            &mut st,
            Call::UpdateConfig {
                vm: vm.clone(),
                spec: spec.clone(),
            },
        )?;
        spec.validate()
            .map_err(|e| HypervisorError::UpdateFailed(e.to_string()))?;

        let lag = self.settle_lag;
        let mock = Self::vm_mut(&mut st, vm)?;
        let current = Self::latest_of(mock, vm)?;
        let updated = live_from_spec(spec, current.disk_size_gib, current.state, Some(&current));
        mock.stage(updated, lag);

        Ok(())
    }

    #[instrument(skip(self), fields(vm = %vm))]
    async fn resize_disk(&self, vm: &VmRef, device: &str, delta_gib: u64) -> Result<()> {
        info!(device = %device, delta_gib, "Resizing mock disk");

        let mut st = self.write()?;
        Self::begin(
            &mut st,
            Call::ResizeDisk {
                vm: vm.clone(),
                device: device.to_string(),
                delta_gib,
            },
        )?;

        let lag = self.settle_lag;
        let is_primary = device == self.primary_disk;
        let mock = Self::vm_mut(&mut st, vm)?;
        let mut resized = Self::latest_of(mock, vm)?;

        let too_large = || {
            HypervisorError::ResizeFailed(format!(
                "growing {} on VM {} by {}G exceeds the maximum disk size",
                device, vm, delta_gib
            ))
        };

        let target = resized
            .disks
            .iter()
            .find(|(idx, disk)| disk.bus.device_name(*idx) == device)
            .map(|(idx, _)| idx);
        match target {
            Some(idx) => {
                if let Some(disk) = resized.disks.get_mut(idx) {
                    let grown = disk.size.as_gib().checked_add(delta_gib).ok_or_else(too_large)?;
                    disk.size = DiskSize::from_gib(grown);
                }
            }
            None if is_primary => {}
            None => {
                return Err(HypervisorError::ResizeFailed(format!(
                    "no disk {} on VM {}",
                    device, vm
                )))
            }
        }
        if is_primary {
            resized.disk_size_gib = resized
                .disk_size_gib
                .checked_add(delta_gib)
                .ok_or_else(too_large)?;
        }
        mock.stage(resized, lag);

        Ok(())
    }

    #[instrument(skip(self), fields(vm = %vm))]
    async fn start_vm(&self, vm: &VmRef) -> Result<()> {
        info!("Starting mock VM");

        let mut st = self.write()?;
        Self::begin(&mut st, Call::Start(vm.clone()))?;

        let lag = self.settle_lag;
        let mock = Self::vm_mut(&mut st, vm)?;
        let mut started = Self::latest_of(mock, vm)?;
        if started.state == VmState::Running {
            return Err(HypervisorError::AlreadyRunning(vm.to_string()));
        }
        started.state = VmState::Running;
        mock.stage(started, lag);

        info!("Mock VM started");
        Ok(())
    }

    #[instrument(skip(self), fields(vm = %vm))]
    async fn stop_vm(&self, vm: &VmRef) -> Result<()> {
        info!("Stopping mock VM");

        let mut st = self.write()?;
        Self::begin(&mut st, Call::Stop(vm.clone()))?;

        let lag = self.settle_lag;
        let mock = Self::vm_mut(&mut st, vm)?;
        let mut stopped = Self::latest_of(mock, vm)?;
        if stopped.state == VmState::Stopped {
            return Err(HypervisorError::AlreadyStopped(vm.to_string()));
        }
        stopped.state = VmState::Stopped;
        mock.stage(stopped, lag);

        info!("Mock VM stopped");
        Ok(())
    }

    #[instrument(skip(self), fields(vm = %vm))]
    async fn delete_vm(&self, vm: &VmRef) -> Result<()> {
        info!("Deleting mock VM");

        let mut st = self.write()?;
        Self::begin(&mut st, Call::Delete(vm.clone()))?;

        let mock = Self::vm_mut(&mut st, vm)?;
        if Self::latest_of(mock, vm)?.state == VmState::Running {
            return Err(HypervisorError::InvalidState(
                "VM must be stopped before deletion".to_string(),
            ));
        }
        st.vms.remove(&vm.vm_id());

        info!("Mock VM deleted");
        Ok(())
    }
}
