//! Error types for the hypervisor adapter layer.

use thiserror::Error;

/// Errors that can occur during hypervisor operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HypervisorError {
    /// VM was not found.
    #[error("VM not found: {0}")]
    VmNotFound(String),

    /// The VM is already stopped.
    #[error("VM {0} is already stopped")]
    AlreadyStopped(String),

    /// The VM is already running.
    #[error("VM {0} is already running")]
    AlreadyRunning(String),

    /// Failed to create a VM.
    #[error("Failed to create VM: {0}")]
    CreateFailed(String),

    /// Failed to clone a VM.
    #[error("Failed to clone VM: {0}")]
    CloneFailed(String),

    /// Failed to update VM configuration.
    #[error("Failed to update VM config: {0}")]
    UpdateFailed(String),

    /// Failed to resize a disk.
    #[error("Failed to resize disk: {0}")]
    ResizeFailed(String),

    /// Failed to start a VM.
    #[error("Failed to start VM: {0}")]
    StartFailed(String),

    /// Failed to stop a VM.
    #[error("Failed to stop VM: {0}")]
    StopFailed(String),

    /// Failed to delete a VM.
    #[error("Failed to delete VM: {0}")]
    DeleteFailed(String),

    /// Query failed.
    #[error("Failed to query: {0}")]
    QueryFailed(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// VM is in an invalid state for the requested operation.
    #[error("Invalid VM state for operation: {0}")]
    InvalidState(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HypervisorError {
    /// True when the error only reports that the VM does not exist (yet).
    pub fn is_not_found(&self) -> bool {
        matches!(self, HypervisorError::VmNotFound(_))
    }

    /// True when a stop request found the VM already powered off.
    pub fn is_already_stopped(&self) -> bool {
        matches!(self, HypervisorError::AlreadyStopped(_))
    }

    /// True when a start request found the VM already powered on.
    pub fn is_already_running(&self) -> bool {
        matches!(self, HypervisorError::AlreadyRunning(_))
    }
}

/// Result type alias for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;
