//! Built-in toolchain actions.
//!
//! Actions are resolved by identifier with any `@version` suffix stripped,
//! so `actions/checkout@v2` and `actions/checkout@v4` resolve to the same
//! implementation.

use crate::shell::run_process;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::process::Command;
use tollgate_core::ports::{ActionInvoker, ActionOutput, StepContext};
use tollgate_core::{Error, Result};
use tracing::info;

/// A natively implemented action.
#[async_trait]
pub trait Action: Send + Sync {
    /// Canonical identifier, without version.
    fn id(&self) -> &str;

    async fn invoke(
        &self,
        params: &BTreeMap<String, String>,
        ctx: &StepContext,
    ) -> Result<ActionOutput>;
}

/// Registry of actions, keyed by identifier and aliases.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with checkout, Rust toolchain and cargo actions.
    pub fn with_builtins(checkout: CheckoutAction) -> Self {
        let toolchain: Arc<dyn Action> = Arc::new(RustToolchainAction);
        let mut registry = Self::new();
        registry.register(Arc::new(checkout));
        registry.register(toolchain.clone());
        registry.alias("dtolnay/rust-toolchain", toolchain);
        registry.register(Arc::new(CargoAction));
        registry
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.id().to_string(), action);
    }

    pub fn alias(&mut self, id: &str, action: Arc<dyn Action>) {
        self.actions.insert(id.to_string(), action);
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(strip_version(id)).cloned()
    }
}

fn strip_version(id: &str) -> &str {
    id.split_once('@').map(|(name, _)| name).unwrap_or(id).trim()
}

#[async_trait]
impl ActionInvoker for ActionRegistry {
    async fn invoke(
        &self,
        action: &str,
        params: &BTreeMap<String, String>,
        ctx: &StepContext,
    ) -> Result<ActionOutput> {
        let resolved = self
            .resolve(action)
            .ok_or_else(|| Error::ActionNotFound(action.to_string()))?;
        resolved.invoke(params, ctx).await
    }
}

/// `actions/checkout`: shallow clone of the repository at the event branch.
#[derive(Debug, Clone, Default)]
pub struct CheckoutAction {
    repository: Option<String>,
}

impl CheckoutAction {
    pub fn new(repository: Option<String>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Action for CheckoutAction {
    fn id(&self) -> &str {
        "actions/checkout"
    }

    async fn invoke(
        &self,
        params: &BTreeMap<String, String>,
        ctx: &StepContext,
    ) -> Result<ActionOutput> {
        let repository = params
            .get("repository")
            .or(self.repository.as_ref())
            .or_else(|| ctx.env.get("TOLLGATE_REPOSITORY"))
            .ok_or_else(|| Error::ActionUnavailable("no repository configured for checkout".into()))?;

        let reference = params
            .get("ref")
            .or_else(|| ctx.env.get("TOLLGATE_BRANCH"))
            .map(String::as_str)
            .unwrap_or("main");

        info!(repository = %repository, reference = %reference, "Checking out repository");

        let mut cmd = Command::new("git");
        cmd.args(["clone", "--depth", "1", "--branch", reference, repository, "."]);
        run_process(cmd, ctx).await
    }
}

/// `actions-rs/toolchain`: installs a Rust toolchain through rustup.
///
/// A toolchain that cannot be resolved is reported as unavailable, not as a
/// failing step.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustToolchainAction;

#[async_trait]
impl Action for RustToolchainAction {
    fn id(&self) -> &str {
        "actions-rs/toolchain"
    }

    async fn invoke(
        &self,
        params: &BTreeMap<String, String>,
        ctx: &StepContext,
    ) -> Result<ActionOutput> {
        let toolchain = params.get("toolchain").map(String::as_str).unwrap_or("stable");
        let profile = params.get("profile").map(String::as_str).unwrap_or("minimal");

        info!(toolchain = %toolchain, profile = %profile, "Installing Rust toolchain");

        let mut probe = Command::new("rustup");
        probe.arg("--version");
        run_process(probe, ctx)
            .await
            .map_err(|_| Error::ActionUnavailable("rustup not found in PATH".into()))?;

        let mut install = Command::new("rustup");
        install.args(["toolchain", "install", toolchain, "--profile", profile]);
        for component in list_param(params, "components") {
            install.args(["-c", component]);
        }
        for target in list_param(params, "target").chain(list_param(params, "targets")) {
            install.args(["-t", target]);
        }

        let mut output = run_process(install, ctx).await?;
        if !output.success() {
            let reason = output
                .output
                .iter()
                .rev()
                .find(|l| !l.content.trim().is_empty())
                .map(|l| l.content.clone())
                .unwrap_or_else(|| format!("exit code {:?}", output.exit_code));
            return Err(Error::ActionUnavailable(format!(
                "toolchain '{}' could not be installed: {}",
                toolchain, reason
            )));
        }

        if params.get("override").map(String::as_str) == Some("true") {
            let mut set = Command::new("rustup");
            set.args(["override", "set", toolchain]);
            let overridden = run_process(set, ctx).await?;
            output.output.extend(overridden.output);
            output.exit_code = overridden.exit_code;
            output.error = overridden.error;
        }

        Ok(output)
    }
}

/// `actions-rs/cargo`: runs `cargo <command> <args>` in the workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct CargoAction;

#[async_trait]
impl Action for CargoAction {
    fn id(&self) -> &str {
        "actions-rs/cargo"
    }

    async fn invoke(
        &self,
        params: &BTreeMap<String, String>,
        ctx: &StepContext,
    ) -> Result<ActionOutput> {
        let command = params
            .get("command")
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::ActionUnavailable("'command' input is required".into()))?;

        let mut cmd = Command::new("cargo");
        if let Some(toolchain) = params.get("toolchain") {
            cmd.arg(format!("+{}", toolchain));
        }
        cmd.arg(command);
        if let Some(args) = params.get("args") {
            cmd.args(args.split_whitespace());
        }

        info!(command = %command, "Running cargo");
        run_process(cmd, ctx).await
    }
}

fn list_param<'a>(
    params: &'a BTreeMap<String, String>,
    key: &str,
) -> impl Iterator<Item = &'a str> + 'a {
    params
        .get(key)
        .map(String::as_str)
        .unwrap_or("")
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
}
