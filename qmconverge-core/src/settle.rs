//! Bounded polling for the hypervisor to reflect a mutation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use qmconverge_hypervisor::HypervisorError;

use crate::error::{LifecycleError, Result};

/// How long and how often to poll after a mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    /// Give up after this long
    pub timeout: Duration,
    /// Delay before the second probe
    pub initial_backoff: Duration,
    /// Ceiling for the doubling delay
    pub max_backoff: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl SettlePolicy {
    /// Probe until it yields a value or the timeout passes.
    ///
    /// The probe returns `Ok(Some(_))` once the condition holds and
    /// `Ok(None)` while it does not. A not-found error counts as "not yet";
    /// any other error aborts the wait as a [`LifecycleError::LookupFailure`].
    /// The probe is always run at least once, and never again after the
    /// deadline.
    pub async fn wait_for<T, F, Fut>(
        &self,
        vm: &str,
        condition: &'static str,
        mut probe: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, HypervisorError>>,
    {
        let start = Instant::now();
        let mut backoff = self.initial_backoff;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match probe().await {
                Ok(Some(value)) => {
                    debug!(vm, condition, attempts, elapsed = ?start.elapsed(), "Settled");
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(LifecycleError::lookup(vm, e)),
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                warn!(vm, condition, attempts, "Gave up waiting for hypervisor");
                return Err(LifecycleError::Timeout {
                    vm: vm.to_string(),
                    condition,
                    waited: elapsed,
                });
            }

            debug!(vm, condition, attempts, backoff = ?backoff, "Waiting for hypervisor");
            tokio::time::sleep(backoff.min(self.timeout - elapsed)).await;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}
