//! Device collection reconciliation.
//!
//! Merges the device lists an operator declared with what the hypervisor
//! reports, so that values the hypervisor generated (MAC addresses, allocated
//! sizes) are never replaced by declared ones.

use qmconverge_hypervisor::{
    DeviceAttributes, DeviceCollection, LiveState, NetworkDevice, VmRef, VmSpec,
};

/// Merge a declared collection into a live one.
///
/// - indices only in `configured` are copied unchanged;
/// - indices in both keep every live attribute and gain the configured ones
///   the live record lacks;
/// - indices only in `live` are carried through.
///
/// Applying the result again with the same `configured` changes nothing.
pub fn reconcile<D: DeviceAttributes>(
    live: &DeviceCollection<D>,
    configured: &DeviceCollection<D>,
) -> DeviceCollection<D> {
    let mut merged = live.clone();
    for (idx, declared) in configured.iter() {
        match merged.get_mut(idx) {
            Some(current) => current.fill_missing_from(declared),
            None => {
                merged.insert(idx, declared.clone());
            }
        }
    }
    merged
}

/// Network devices to send with a configuration update.
///
/// Every NIC that already exists on the VM keeps the MAC the hypervisor gave
/// it, paired with the declared model type. NICs the VM does not have yet are
/// sent without a MAC so the hypervisor assigns one. Submitting a model
/// without its MAC makes the hypervisor generate a new address, which breaks
/// DHCP leases and guest network identity on every pass.
pub fn network_update_payload(
    live: &DeviceCollection<NetworkDevice>,
    configured: &DeviceCollection<NetworkDevice>,
) -> DeviceCollection<NetworkDevice> {
    configured
        .iter()
        .map(|(idx, declared)| {
            let mut nic = declared.clone();
            nic.model = match live.get(idx).and_then(|current| current.model.mac) {
                Some(mac) => declared.model.with_mac(mac),
                None => declared.model.without_mac(),
            };
            (idx, nic)
        })
        .collect()
}

/// Build the new declared baseline from a live snapshot.
///
/// Scalar attributes come from the hypervisor; device collections are merged
/// with the previously declared ones, live taking precedence.
pub fn read_back(vm: &VmRef, live: &LiveState, declared: &VmSpec) -> VmSpec {
    VmSpec {
        name: live.name.clone(),
        target_node: vm.node().to_string(),
        description: live.description.clone(),
        onboot: live.onboot,
        storage: live.storage.clone().or_else(|| declared.storage.clone()),
        qemu_os: live.qemu_os.clone(),
        memory_mib: live.memory_mib,
        cores: live.cores,
        sockets: live.sockets,
        disk_size_gib: Some(live.disk_size_gib),
        disks: reconcile(&live.disks, &declared.disks),
        networks: reconcile(&live.networks, &declared.networks),
    }
}
