//! # qmconverge Hypervisor
//!
//! Adapter abstraction over a QEMU hypervisor cluster API, plus the data
//! model shared by the lifecycle engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Hypervisor Trait               │
//! │ (lookup, clone, update, resize, ...)    │
//! └─────────────────────┬───────────────────┘
//!                       │
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────────┐     ┌───────────────────┐
//! │    MockBackend    │     │  cluster REST API │
//! │    (in memory)    │     │  (external crate) │
//! └───────────────────┘     └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qmconverge_hypervisor::{Hypervisor, MockBackend, VmRef, VmSpec};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MockBackend::new();
//!     let vm = VmRef::new("pve1", backend.next_vm_id().await.unwrap());
//!
//!     let spec = VmSpec::new("my-vm", "pve1").with_cpu(1, 4).with_memory(4096);
//!     backend.create_vm(&vm, &spec, "local:iso/debian.iso").await.unwrap();
//!     backend.start_vm(&vm).await.unwrap();
//! }
//! ```

pub mod devices;
pub mod error;
pub mod mock;
pub mod nic_model;
pub mod traits;
pub mod types;

pub use devices::{
    DeviceAttributes, DeviceCollection, DeviceIndex, DiskBus, DiskCache, DiskDevice, DiskSize,
    NetworkDevice,
};
pub use error::HypervisorError;
pub use mock::{Call, MockBackend};
pub use nic_model::{MacAddress, NicKind, NicModel};
pub use traits::Hypervisor;
pub use types::*;
