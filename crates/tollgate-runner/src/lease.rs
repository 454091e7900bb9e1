//! Scoped ownership of a provisioned environment.

use std::sync::Arc;
use tollgate_core::Result;
use tollgate_core::ports::{EnvironmentHandle, EnvironmentProvider};
use tracing::{debug, warn};

/// A held environment. Teardown happens exactly once: through
/// [`EnvironmentLease::release`], or asynchronously on drop.
pub struct EnvironmentLease {
    provider: Arc<dyn EnvironmentProvider>,
    handle: EnvironmentHandle,
    released: bool,
}

impl EnvironmentLease {
    /// Provision an environment for `job` on a target matching `label`.
    pub async fn acquire(
        provider: Arc<dyn EnvironmentProvider>,
        label: &str,
        job: &str,
    ) -> Result<Self> {
        let handle = provider.provision(label, job).await?;
        debug!(environment = %handle.id, job = %job, "Environment leased");
        Ok(Self {
            provider,
            handle,
            released: false,
        })
    }

    pub fn handle(&self) -> &EnvironmentHandle {
        &self.handle
    }

    /// Tear the environment down and wait for it.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        debug!(environment = %self.handle.id, "Releasing environment");
        self.provider.teardown(self.handle.clone()).await
    }
}

impl Drop for EnvironmentLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let handle = self.handle.clone();
        let provider = self.provider.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let id = handle.id;
                    if let Err(e) = provider.teardown(handle).await {
                        warn!(environment = %id, error = %e, "Environment teardown failed");
                    }
                });
            }
            Err(_) => {
                warn!(environment = %handle.id, "No runtime available, environment leaked");
            }
        }
    }
}
