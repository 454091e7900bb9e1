//! End-to-end orchestration tests with counting environment providers.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tollgate_core::events::{EventKind, TriggerEvent};
use tollgate_core::ids::EnvironmentId;
use tollgate_core::pipeline::{JobSpec, PipelineSpec, Step, TriggerSpec};
use tollgate_core::ports::{ActionOutput, EnvironmentHandle, EnvironmentProvider, StepContext};
use tollgate_core::run::{JobStatus, PipelineStatus, StepStatus};
use tollgate_core::{Error, Result};
use tollgate_runner::{
    Action, ActionRegistry, ExecutorConfig, JobExecutor, ShellRunner, StepRunner,
};
use tollgate_scheduler::{Dispatch, Orchestrator};

/// Provider that hands out temporary directories and counts lifecycles.
/// Provisioning for the label `explode` panics.
struct Counting {
    root: PathBuf,
    provisioned: AtomicUsize,
    torn_down: AtomicUsize,
}

impl Counting {
    fn new(root: &std::path::Path) -> Arc<Self> {
        Arc::new(Self {
            root: root.to_path_buf(),
            provisioned: AtomicUsize::new(0),
            torn_down: AtomicUsize::new(0),
        })
    }

    fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    fn torn_down(&self) -> usize {
        self.torn_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvironmentProvider for Counting {
    async fn provision(&self, label: &str, job: &str) -> Result<EnvironmentHandle> {
        match label {
            "explode" => panic!("provider crashed"),
            "macos-latest" => Err(Error::Environment(format!(
                "no environment available for label '{}'",
                label
            ))),
            _ => {
                let id = EnvironmentId::new();
                let workspace = self.root.join(id.to_string());
                std::fs::create_dir_all(&workspace)?;
                self.provisioned.fetch_add(1, Ordering::SeqCst);
                Ok(EnvironmentHandle {
                    id,
                    label: label.to_string(),
                    job: job.to_string(),
                    workspace,
                })
            }
        }
    }

    async fn teardown(&self, handle: EnvironmentHandle) -> Result<()> {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
        let _ = std::fs::remove_dir_all(&handle.workspace);
        Ok(())
    }
}

/// Toolchain action that cannot be resolved on this host.
struct UnresolvableToolchain;

#[async_trait]
impl Action for UnresolvableToolchain {
    fn id(&self) -> &str {
        "actions-rs/toolchain"
    }

    async fn invoke(
        &self,
        _params: &BTreeMap<String, String>,
        _ctx: &StepContext,
    ) -> Result<ActionOutput> {
        Err(Error::ActionUnavailable("toolchain cannot be resolved".into()))
    }
}

fn orchestrator(spec: PipelineSpec, provider: Arc<Counting>) -> Orchestrator {
    let mut actions = ActionRegistry::new();
    actions.register(Arc::new(UnresolvableToolchain));
    let executor = JobExecutor::new(
        provider,
        StepRunner::new(ShellRunner::default(), Arc::new(actions)),
        ExecutorConfig::default(),
    );
    Orchestrator::new(spec, executor)
}

fn main_trigger() -> TriggerSpec {
    TriggerSpec::new()
        .with(EventKind::Push, &["main"])
        .with(EventKind::PullRequest, &["main"])
}

fn ci_spec(test_script: &str, fmt_script: &str) -> PipelineSpec {
    PipelineSpec::new(
        "CI",
        main_trigger(),
        vec![
            JobSpec::new("test", "ubuntu-latest", vec![Step::shell(test_script)]),
            JobSpec::new("rustfmt", "ubuntu-latest", vec![Step::shell(fmt_script)]),
        ],
    )
}

fn completed(dispatch: Dispatch) -> tollgate_core::run::PipelineRun {
    match dispatch {
        Dispatch::Completed(run) => run,
        Dispatch::NoMatch => panic!("expected the pipeline to run"),
    }
}

#[tokio::test]
async fn test_matching_push_runs_every_job() {
    let root = tempfile::tempdir().unwrap();
    let provider = Counting::new(root.path());
    let orchestrator = orchestrator(ci_spec("true", "true"), provider.clone());

    let run = completed(orchestrator.dispatch(TriggerEvent::push("main")).await.unwrap());

    assert_eq!(run.status, PipelineStatus::Succeeded);
    assert_eq!(run.exit_code(), 0);
    let names: Vec<&str> = run.jobs.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, vec!["test", "rustfmt"]);
    assert!(run.jobs.iter().all(|j| j.status == JobStatus::Succeeded));
    assert_eq!(provider.provisioned(), 2);
    assert_eq!(provider.torn_down(), 2);
}

#[tokio::test]
async fn test_pull_request_to_main_matches() {
    let root = tempfile::tempdir().unwrap();
    let provider = Counting::new(root.path());
    let orchestrator = orchestrator(ci_spec("true", "true"), provider.clone());

    let run = completed(
        orchestrator
            .dispatch(TriggerEvent::pull_request("main"))
            .await
            .unwrap(),
    );
    assert_eq!(run.status, PipelineStatus::Succeeded);
}

#[tokio::test]
async fn test_non_matching_event_is_idempotent_no_op() {
    let root = tempfile::tempdir().unwrap();
    let provider = Counting::new(root.path());
    let orchestrator = orchestrator(ci_spec("true", "true"), provider.clone());

    for _ in 0..2 {
        let dispatch = orchestrator
            .dispatch(TriggerEvent::push("feature-x"))
            .await
            .unwrap();
        assert!(matches!(dispatch, Dispatch::NoMatch));
    }
    assert_eq!(provider.provisioned(), 0);
    assert_eq!(provider.torn_down(), 0);
}

#[tokio::test]
async fn test_failing_job_does_not_stop_siblings() {
    let root = tempfile::tempdir().unwrap();
    let provider = Counting::new(root.path());
    let orchestrator = orchestrator(
        ci_spec("echo 'assertion failed' >&2; exit 101", "sleep 0.3"),
        provider.clone(),
    );

    let run = completed(orchestrator.dispatch(TriggerEvent::push("main")).await.unwrap());

    assert_eq!(run.status, PipelineStatus::Failed);
    assert_ne!(run.exit_code(), 0);
    let test = run.job("test").unwrap();
    assert_eq!(test.status, JobStatus::Failed);
    assert_eq!(test.failed_step, Some(0));
    assert!(test.steps[0].output.iter().any(|l| l.content == "assertion failed"));
    assert_eq!(run.job("rustfmt").unwrap().status, JobStatus::Succeeded);
    assert_eq!(provider.torn_down(), 2);
}

#[tokio::test]
async fn test_unresolvable_toolchain_errors_only_that_job() {
    let root = tempfile::tempdir().unwrap();
    let provider = Counting::new(root.path());
    let spec = PipelineSpec::new(
        "CI",
        main_trigger(),
        vec![
            JobSpec::new(
                "test",
                "ubuntu-latest",
                vec![
                    Step::action("actions-rs/toolchain@v1", &[("toolchain", "stable")]),
                    Step::shell("true"),
                ],
            ),
            JobSpec::new("rustfmt", "ubuntu-latest", vec![Step::shell("true")]),
        ],
    );
    let orchestrator = orchestrator(spec, provider.clone());

    let run = completed(orchestrator.dispatch(TriggerEvent::push("main")).await.unwrap());

    assert_eq!(run.status, PipelineStatus::Failed);
    let test = run.job("test").unwrap();
    assert_eq!(test.status, JobStatus::Errored);
    assert_eq!(test.steps[1].status, StepStatus::Skipped);
    assert!(matches!(test.failure(), Some(Error::StepError { .. })));
    assert_eq!(run.job("rustfmt").unwrap().status, JobStatus::Succeeded);
    assert_eq!(provider.provisioned(), provider.torn_down());
}

#[tokio::test]
async fn test_report_contains_every_job_in_declaration_order() {
    let root = tempfile::tempdir().unwrap();
    let provider = Counting::new(root.path());
    let jobs: Vec<JobSpec> = (0..6)
        .map(|i| {
            let script = if i % 2 == 0 { "true" } else { "exit 1" };
            JobSpec::new(format!("job-{}", i), "host", vec![Step::shell(script)])
        })
        .chain(std::iter::once(JobSpec::new(
            "mac",
            "macos-latest",
            vec![Step::shell("true")],
        )))
        .collect();
    let orchestrator = orchestrator(PipelineSpec::new("wide", main_trigger(), jobs), provider.clone());

    let run = completed(orchestrator.dispatch(TriggerEvent::push("main")).await.unwrap());

    assert_eq!(run.jobs.len(), 7);
    for (i, job) in run.jobs.iter().take(6).enumerate() {
        assert_eq!(job.name, format!("job-{}", i));
        let expected = if i % 2 == 0 { JobStatus::Succeeded } else { JobStatus::Failed };
        assert_eq!(job.status, expected);
    }
    assert_eq!(run.jobs[6].status, JobStatus::Errored);
    assert!(matches!(run.jobs[6].failure(), Some(Error::Environment(_))));
    assert_eq!(provider.provisioned(), 6);
    assert_eq!(provider.torn_down(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_jobs_run_concurrently() {
    let root = tempfile::tempdir().unwrap();
    let provider = Counting::new(root.path());
    let orchestrator = orchestrator(ci_spec("sleep 1", "sleep 1"), provider);

    let started = Instant::now();
    let run = completed(orchestrator.dispatch(TriggerEvent::push("main")).await.unwrap());

    assert_eq!(run.status, PipelineStatus::Succeeded);
    assert!(
        started.elapsed() < Duration::from_millis(1900),
        "jobs ran sequentially: {:?}",
        started.elapsed()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_job_becomes_errored() {
    let root = tempfile::tempdir().unwrap();
    let provider = Counting::new(root.path());
    let spec = PipelineSpec::new(
        "CI",
        main_trigger(),
        vec![
            JobSpec::new("boom", "explode", vec![Step::shell("true")]),
            JobSpec::new("test", "host", vec![Step::shell("true")]),
        ],
    );
    let orchestrator = orchestrator(spec, provider.clone());

    let run = completed(orchestrator.dispatch(TriggerEvent::push("main")).await.unwrap());

    assert_eq!(run.status, PipelineStatus::Failed);
    assert_eq!(run.jobs[0].name, "boom");
    assert_eq!(run.jobs[0].status, JobStatus::Errored);
    assert_eq!(run.jobs[1].status, JobStatus::Succeeded);
}

#[tokio::test]
async fn test_cancel_releases_every_environment() {
    let root = tempfile::tempdir().unwrap();
    let provider = Counting::new(root.path());
    let orchestrator = orchestrator(ci_spec("sleep 10", "sleep 10"), provider.clone());

    let handle = orchestrator.start(TriggerEvent::push("main")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.cancel();

    let started = Instant::now();
    let run = handle.wait().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(run.status, PipelineStatus::Failed);
    assert!(run.jobs.iter().all(|j| j.status == JobStatus::Cancelled));
    assert_eq!(provider.provisioned(), provider.torn_down());
}

fn slow_spec(cancel_in_progress: bool) -> PipelineSpec {
    let mut spec = PipelineSpec::new(
        "CI",
        TriggerSpec::new().with(EventKind::Push, &["main", "release/*"]),
        vec![JobSpec::new("test", "host", vec![Step::shell("sleep 10")])],
    );
    spec.cancel_in_progress = cancel_in_progress;
    spec
}

#[tokio::test]
async fn test_new_push_supersedes_in_progress_run() {
    let root = tempfile::tempdir().unwrap();
    let provider = Counting::new(root.path());
    let orchestrator = orchestrator(slow_spec(true), provider.clone());

    let first = orchestrator.start(TriggerEvent::push("main")).await.unwrap();
    let other = orchestrator
        .start(TriggerEvent::push("release/v1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let second = orchestrator.start(TriggerEvent::push("main")).await.unwrap();

    assert!(first.canceller().is_cancelled());
    assert!(!second.canceller().is_cancelled());
    assert!(!other.canceller().is_cancelled());

    let first = first.wait().await.unwrap();
    assert_eq!(first.jobs[0].status, JobStatus::Cancelled);

    second.cancel();
    other.cancel();
    second.wait().await.unwrap();
    other.wait().await.unwrap();
    assert_eq!(provider.provisioned(), 3);
    assert_eq!(provider.torn_down(), 3);
}

#[tokio::test]
async fn test_runs_overlap_without_cancel_in_progress() {
    let root = tempfile::tempdir().unwrap();
    let provider = Counting::new(root.path());
    let orchestrator = orchestrator(slow_spec(false), provider.clone());

    let first = orchestrator.start(TriggerEvent::push("main")).await.unwrap();
    let second = orchestrator.start(TriggerEvent::push("main")).await.unwrap();

    assert_ne!(first.id(), second.id());
    assert!(!first.canceller().is_cancelled());

    first.cancel();
    second.cancel();
    assert_eq!(first.wait().await.unwrap().status, PipelineStatus::Failed);
    assert_eq!(second.wait().await.unwrap().status, PipelineStatus::Failed);
    assert_eq!(provider.provisioned(), provider.torn_down());
}
