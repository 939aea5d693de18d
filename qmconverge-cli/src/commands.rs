//! Subcommand handlers.

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use tracing::{error, info, warn};

use qmconverge_core::{DeclaredState, DesiredVm, Lifecycle, ResourceId};

use crate::manifest::Manifest;
use crate::state_store::StateStore;

/// Create or update every VM in the manifest, then read each one back.
///
/// VMs are converged concurrently; the lifecycle gate bounds how many talk to
/// the hypervisor at once. Successful VMs are recorded even when others fail.
pub async fn apply(
    lifecycle: &Lifecycle,
    store: &mut StateStore,
    manifest: &Manifest,
    nodes: &[String],
) -> Result<()> {
    let unknown = manifest.unknown_nodes(nodes);
    if !unknown.is_empty() {
        bail!(
            "VMs target nodes outside the cluster ({}): {}",
            nodes.join(", "),
            unknown.join(", ")
        );
    }

    for (name, _) in store.iter() {
        if !manifest.vms.iter().any(|vm| vm.name() == name) {
            warn!(vm_name = %name, "Managed VM is not in the manifest; use destroy to remove it");
        }
    }

    let work: Vec<(&DesiredVm, Option<ResourceId>)> = manifest
        .vms
        .iter()
        .map(|desired| {
            let existing = store.get(desired.name()).map(|s| s.resource_id.clone());
            (desired, existing)
        })
        .collect();

    let results = join_all(work.into_iter().map(|(desired, existing)| async move {
        let result = converge(lifecycle, desired, existing.as_ref()).await;
        (desired.name(), result)
    }))
    .await;

    let total = results.len();
    let mut failed = 0;
    for (name, result) in results {
        match result {
            Ok(declared) => {
                info!(vm_name = %name, id = %declared.resource_id, "VM converged");
                store.insert(name, declared);
            }
            Err(e) => {
                error!(vm_name = %name, error = %e, "VM failed to converge");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} VMs failed to converge", failed, total);
    }
    info!(vms = total, "Apply complete");
    Ok(())
}

async fn converge(
    lifecycle: &Lifecycle,
    desired: &DesiredVm,
    existing: Option<&ResourceId>,
) -> qmconverge_core::Result<DeclaredState> {
    let converged = match existing {
        Some(id) => lifecycle.update(id, desired).await?,
        None => lifecycle.create(desired).await?,
    };
    lifecycle.read(&converged.resource_id, &desired.spec).await
}

/// Re-read every managed VM. Entries that cannot be read are kept as they were.
pub async fn refresh(lifecycle: &Lifecycle, store: &mut StateStore) -> Result<()> {
    let entries: Vec<(String, DeclaredState)> = store
        .iter()
        .map(|(name, declared)| (name.clone(), declared.clone()))
        .collect();

    let results = join_all(entries.iter().map(|(name, declared)| async move {
        let result = lifecycle.read(&declared.resource_id, &declared.spec).await;
        (name, result)
    }))
    .await;

    let total = results.len();
    let mut failed = 0;
    for (name, result) in results {
        match result {
            Ok(declared) => {
                store.insert(name.clone(), declared);
            }
            Err(e) => {
                error!(vm_name = %name, error = %e, "Failed to refresh VM");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} VMs could not be refreshed", failed, total);
    }
    info!(vms = total, "Refresh complete");
    Ok(())
}

/// Stop and delete one managed VM and forget it.
pub async fn destroy(lifecycle: &Lifecycle, store: &mut StateStore, name: &str) -> Result<()> {
    let Some(declared) = store.get(name) else {
        bail!("VM {} is not managed in {}", name, store.path().display());
    };
    let id = declared.resource_id.clone();

    lifecycle
        .delete(&id)
        .await
        .with_context(|| format!("Failed to destroy VM {} ({})", name, id))?;
    store.remove(name);

    info!(vm_name = %name, id = %id, "VM destroyed");
    Ok(())
}

/// Adopt an existing VM into the state file.
pub async fn import(lifecycle: &Lifecycle, store: &mut StateStore, name: &str) -> Result<()> {
    if let Some(existing) = store.get(name) {
        bail!("VM {} is already managed as {}", name, existing.resource_id);
    }

    let declared = lifecycle
        .import(name)
        .await
        .with_context(|| format!("Failed to import VM {}", name))?;

    info!(vm_name = %name, id = %declared.resource_id, "VM imported");
    store.insert(name, declared);
    Ok(())
}
