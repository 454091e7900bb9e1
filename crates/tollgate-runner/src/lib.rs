//! Step and job execution engine for tollgate.

pub mod actions;
pub mod environments;
pub mod executor;
pub mod lease;
pub mod runner;
pub mod shell;

pub use actions::{Action, ActionRegistry, CargoAction, CheckoutAction, RustToolchainAction};
pub use environments::{HostEnvironmentProvider, HostEnvironmentConfig};
pub use executor::{ExecutorConfig, JobContext, JobExecutor};
pub use lease::EnvironmentLease;
pub use runner::{StepRunner, StepsReport};
pub use shell::{ShellConfig, ShellRunner};
