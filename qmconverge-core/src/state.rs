//! Lifecycle state of one managed VM.

use std::fmt;

use tracing::{info, warn};

/// Where a VM is in its managed lifecycle.
///
/// ```text
/// Absent -> Provisioning -> Running -> Updating -> Running -> Deleted
///    \___________\______________\__________\______________-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Absent,
    Provisioning,
    Running,
    Updating,
    Deleted,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Absent => "absent",
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Running => "running",
            LifecycleState::Updating => "updating",
            LifecycleState::Deleted => "deleted",
            LifecycleState::Failed => "failed",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (_, Failed)
                | (Absent, Provisioning)
                | (Provisioning, Running)
                | (Running, Updating)
                | (Updating, Running)
                | (Running, Deleted)
                | (Updating, Deleted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Deleted | LifecycleState::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks and logs the transitions of one lifecycle operation.
#[derive(Debug)]
pub(crate) struct StateTracker {
    vm_name: String,
    current: LifecycleState,
    history: Vec<LifecycleState>,
}

impl StateTracker {
    pub(crate) fn new(vm_name: impl Into<String>, initial: LifecycleState) -> Self {
        Self {
            vm_name: vm_name.into(),
            current: initial,
            history: vec![initial],
        }
    }

    pub(crate) fn current(&self) -> LifecycleState {
        self.current
    }

    pub(crate) fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    pub(crate) fn transition(&mut self, to: LifecycleState) {
        let from = self.current;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(vm_name = %self.vm_name, %from, %to, "Unexpected lifecycle transition");
        }
        info!(vm_name = %self.vm_name, %from, %to, "Lifecycle transition");
        self.current = to;
        self.history.push(to);
    }

    /// Record a failure and hand the error back.
    pub(crate) fn fail<E: fmt::Display>(&mut self, err: E) -> E {
        warn!(vm_name = %self.vm_name, from = %self.current, error = %err, "Lifecycle operation failed");
        self.transition(LifecycleState::Failed);
        err
    }
}
