//! # qmconverge core
//!
//! Converges QEMU VMs on a hypervisor cluster towards a declared state.
//!
//! ```text
//!                    DesiredVm
//!                        │
//!              ┌─────────▼──────────┐
//!              │     Lifecycle      │── ConcurrencyGate (bounded slots)
//!              │  create / update / │── SettlePolicy (poll with backoff)
//!              │  read / import /   │
//!              │  delete            │── Provisioner (after Running)
//!              └──┬──────────────┬──┘
//!                 │              │
//!        ┌────────▼─────┐  ┌─────▼────────┐
//!        │   resolver   │  │  reconcile   │
//!        │ new/recycle  │  │ device merge │
//!        └────────┬─────┘  └──────────────┘
//!                 │
//!         dyn Hypervisor (qmconverge-hypervisor)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use qmconverge_core::{ConcurrencyGate, DesiredVm, Lifecycle};
//! use qmconverge_hypervisor::{MockBackend, VmSpec};
//!
//! let lifecycle = Lifecycle::new(Arc::new(MockBackend::new()), ConcurrencyGate::new(4));
//! let desired = DesiredVm::new(VmSpec::new("web-1", "pve1"))
//!     .from_iso("local:iso/debian.iso")
//!     .provision_as(None);
//! let converged = lifecycle.create(&desired).await?;
//! let baseline = lifecycle.read(&converged.resource_id, &desired.spec).await?;
//! ```

pub mod desired;
pub mod error;
pub mod gate;
pub mod identity;
pub mod orchestrator;
pub mod provision;
pub mod reconcile;
pub mod resolver;
pub mod settle;
pub mod state;

pub use desired::{DeclaredState, DesiredVm, LifecycleFlags, Source};
pub use error::{LifecycleError, Result};
pub use gate::{ConcurrencyGate, GatePermit, DEFAULT_MAX_PARALLEL};
pub use identity::ResourceId;
pub use orchestrator::{Converged, Lifecycle, DEFAULT_PRIMARY_DISK};
pub use provision::{Provisioner, ProvisioningKind};
pub use reconcile::{network_update_payload, read_back, reconcile};
pub use resolver::{resolve, Resolution};
pub use settle::SettlePolicy;
pub use state::LifecycleState;
