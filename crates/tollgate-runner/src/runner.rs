//! Sequential, fail-fast step execution.

use crate::shell::ShellRunner;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tollgate_core::Result;
use tollgate_core::pipeline::Step;
use tollgate_core::ports::{ActionInvoker, ActionOutput, StepContext};
use tollgate_core::run::{StepOutcome, StepRecord, StepStatus};
use tracing::{debug, info, warn};

/// What running a job's steps produced.
#[derive(Debug, Clone)]
pub struct StepsReport {
    pub outcome: StepOutcome,
    /// One record per declared step, in order.
    pub records: Vec<StepRecord>,
}

/// Runs steps in order, stopping at the first failure.
pub struct StepRunner {
    shell: ShellRunner,
    actions: Arc<dyn ActionInvoker>,
}

impl StepRunner {
    pub fn new(shell: ShellRunner, actions: Arc<dyn ActionInvoker>) -> Self {
        Self { shell, actions }
    }

    /// Execute `steps` in declaration order.
    ///
    /// Steps after the one that ended the job are recorded as skipped and
    /// never invoked. A cancellation signal stops the running step.
    pub async fn run(
        &self,
        steps: &[Step],
        ctx: &StepContext,
        cancel: &mut watch::Receiver<bool>,
    ) -> StepsReport {
        let mut records: Vec<StepRecord> = steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepRecord::pending(index, step.name(), step.kind_label()))
            .collect();

        for (index, step) in steps.iter().enumerate() {
            if *cancel.borrow() {
                return finish(
                    records,
                    index,
                    StepStatus::Cancelled,
                    StepOutcome::Cancelled { step_index: index },
                );
            }

            debug!(step = index, name = %step.name(), kind = step.kind_label(), "Starting step");
            let started = Instant::now();
            let result = tokio::select! {
                result = self.invoke(step, ctx) => Some(result),
                _ = wait_cancelled(cancel) => None,
            };
            let record = &mut records[index];
            record.duration_ms = started.elapsed().as_millis() as u64;

            match result {
                None => {
                    warn!(step = index, name = %step.name(), "Step cancelled");
                    return finish(
                        records,
                        index,
                        StepStatus::Cancelled,
                        StepOutcome::Cancelled { step_index: index },
                    );
                }
                Some(Ok(output)) if output.success() => {
                    record.status = StepStatus::Succeeded;
                    absorb(record, output);
                    info!(step = index, name = %step.name(), "Step succeeded");
                }
                Some(Ok(output)) => {
                    let exit_code = output.exit_code;
                    absorb(record, output);
                    warn!(step = index, name = %step.name(), exit_code = ?exit_code, "Step failed");
                    return finish(
                        records,
                        index,
                        StepStatus::Failed,
                        StepOutcome::Failed {
                            step_index: index,
                            exit_code,
                        },
                    );
                }
                Some(Err(e)) => {
                    let message = e.to_string();
                    record.error = Some(message.clone());
                    warn!(step = index, name = %step.name(), error = %message, "Step could not be invoked");
                    return finish(
                        records,
                        index,
                        StepStatus::Errored,
                        StepOutcome::Errored {
                            step_index: index,
                            message,
                        },
                    );
                }
            }
        }

        StepsReport {
            outcome: StepOutcome::Succeeded,
            records,
        }
    }

    async fn invoke(&self, step: &Step, ctx: &StepContext) -> Result<ActionOutput> {
        match step {
            Step::ShellCommand { run, .. } => self.shell.execute(run, ctx).await,
            Step::ToolchainAction { action, params, .. } => {
                self.actions.invoke(action, params, ctx).await
            }
        }
    }
}

fn absorb(record: &mut StepRecord, output: ActionOutput) {
    record.exit_code = output.exit_code;
    record.output = output.output;
    record.error = output.error;
}

/// Set the ending step's status and mark everything after it skipped.
fn finish(
    mut records: Vec<StepRecord>,
    index: usize,
    status: StepStatus,
    outcome: StepOutcome,
) -> StepsReport {
    records[index].status = status;
    for record in records.iter_mut().skip(index + 1) {
        record.status = StepStatus::Skipped;
    }
    StepsReport { outcome, records }
}

/// Resolves once cancellation is requested. Never resolves if the sender
/// goes away without cancelling.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
