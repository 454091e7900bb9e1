//! Port traits for the external collaborators.
//!
//! The orchestrator provisions environments and invokes toolchain actions
//! through these traits; it never reimplements them.

use crate::ids::EnvironmentId;
use crate::run::OutputLine;
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Handle to a provisioned, exclusively owned execution environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    pub id: EnvironmentId,
    pub label: String,
    pub job: String,
    /// Private working directory; never shared with another job.
    pub workspace: PathBuf,
}

/// Provisions and tears down isolated execution environments.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Acquire a fresh environment matching `label` for `job`.
    async fn provision(&self, label: &str, job: &str) -> Result<EnvironmentHandle>;

    /// Release an environment. Called exactly once per provisioned handle.
    async fn teardown(&self, handle: EnvironmentHandle) -> Result<()>;
}

/// Everything a step sees of the job it runs in.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub handle: EnvironmentHandle,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

/// What an action reports back.
#[derive(Debug, Clone, Default)]
pub struct ActionOutput {
    /// `None` when the action was killed (e.g. on timeout).
    pub exit_code: Option<i32>,
    pub output: Vec<OutputLine>,
    /// Why the action stopped early, when it did.
    pub error: Option<String>,
}

impl ActionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Resolves and invokes toolchain actions by identifier.
///
/// `Err(ActionNotFound | ActionUnavailable)` means the action could not be
/// started; a started action that fails reports a nonzero exit code instead.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn invoke(
        &self,
        action: &str,
        params: &BTreeMap<String, String>,
        ctx: &StepContext,
    ) -> Result<ActionOutput>;
}
