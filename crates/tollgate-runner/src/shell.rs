//! Process execution inside a job's environment.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tollgate_core::ports::{ActionOutput, StepContext};
use tollgate_core::run::{LogStream, OutputLine};
use tollgate_core::{Error, Result};
use tracing::{debug, info, warn};

/// Shell configuration.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub shell: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

/// Runs shell command steps.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    config: ShellConfig,
}

impl ShellRunner {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    /// Run `script` with `<shell> -c` in the step's workspace.
    pub async fn execute(&self, script: &str, ctx: &StepContext) -> Result<ActionOutput> {
        info!(
            shell = %self.config.shell,
            workspace = %ctx.handle.workspace.display(),
            "Executing shell command"
        );

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-e").arg("-c").arg(script);
        run_process(cmd, ctx).await
    }
}

/// How long output readers may keep draining once the process group is gone.
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

/// Spawn `cmd` in the step's workspace with the job environment, capture its
/// output line by line and wait for it within the step timeout.
///
/// The child leads its own process group. Whatever is left in the group is
/// killed once the command ends, and also if the returned future is dropped.
/// A spawn failure is `ActionUnavailable`; a timeout reports no
/// exit code.
pub(crate) async fn run_process(mut cmd: Command, ctx: &StepContext) -> Result<ActionOutput> {
    let program = cmd.as_std().get_program().to_string_lossy().to_string();

    cmd.current_dir(&ctx.handle.workspace)
        .envs(&ctx.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::ActionUnavailable(format!("could not spawn '{}': {}", program, e)))?;
    let mut group = ProcessGroup {
        leader: child.id(),
    };

    let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(stdout, LogStream::Stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(stderr, LogStream::Stderr, tx.clone())));
    }
    drop(tx);

    let collector = tokio::spawn(async move {
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            debug!(stream = ?line.stream, "{}", line.content);
            lines.push(line);
        }
        lines
    });

    let (exit_code, error) = match ctx.timeout {
        Some(limit) => match timeout(limit, child.wait()).await {
            Ok(status) => (status?.code(), None),
            Err(_) => {
                warn!(timeout_ms = limit.as_millis() as u64, "Command timed out, killing process group");
                group.kill();
                let _ = child.kill().await;
                (None, Some(format!("timed out after {:?}", limit)))
            }
        },
        None => (child.wait().await?.code(), None),
    };
    group.kill();

    let drained = timeout(OUTPUT_DRAIN, async {
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(program = %program, "Output still open after the process exited, dropping the rest");
        for reader in &readers {
            reader.abort();
        }
    }
    let output = match timeout(OUTPUT_DRAIN, collector).await {
        Ok(Ok(lines)) => lines,
        _ => Vec::new(),
    };

    debug!(program = %program, exit_code = ?exit_code, lines = output.len(), "Process finished");

    Ok(ActionOutput {
        exit_code,
        output,
        error,
    })
}

/// A spawned command's process group, killed on drop.
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn kill(&mut self) {
        if let Some(pid) = self.leader.take() {
            kill_group(pid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

async fn forward_lines<R>(reader: R, stream: LogStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(content)) = lines.next_line().await {
        if tx.send(OutputLine { stream, content }).await.is_err() {
            break;
        }
    }
}

/// Render an environment for logging without values.
pub(crate) fn env_keys(env: &BTreeMap<String, String>) -> String {
    env.keys().cloned().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::ids::EnvironmentId;
    use tollgate_core::ports::EnvironmentHandle;

    fn context(dir: &std::path::Path) -> StepContext {
        StepContext {
            handle: EnvironmentHandle {
                id: EnvironmentId::new(),
                label: "host".to_string(),
                job: "test".to_string(),
                workspace: dir.to_path_buf(),
            },
            env: BTreeMap::from([("GREETING".to_string(), "hello".to_string())]),
            timeout: Some(Duration::from_secs(30)),
        }
    }

    #[tokio::test]
    async fn test_shell_runner_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();

        let result = runner
            .execute("echo $GREETING", &context(dir.path()))
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output[0].content, "hello");
        assert_eq!(result.output[0].stream, LogStream::Stdout);
    }

    #[tokio::test]
    async fn test_shell_runner_failure_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();

        let result = runner
            .execute("echo oops >&2; exit 3", &context(dir.path()))
            .await
            .unwrap();

        assert!(!result.success());
        assert_eq!(result.exit_code, Some(3));
        assert!(
            result
                .output
                .iter()
                .any(|l| l.stream == LogStream::Stderr && l.content == "oops")
        );
    }

    #[tokio::test]
    async fn test_shell_runner_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();

        runner
            .execute("touch marker", &context(dir.path()))
            .await
            .unwrap();

        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_shell_runner_timeout_kills() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();
        let mut ctx = context(dir.path());
        ctx.timeout = Some(Duration::from_millis(200));

        let result = runner.execute("sleep 5", &ctx).await.unwrap();

        assert_eq!(result.exit_code, None);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_bounds_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();
        let mut ctx = context(dir.path());
        ctx.timeout = Some(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let result = runner.execute("sleep 4; true", &ctx).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.exit_code, None);
        assert_eq!(result.error.as_deref(), Some("timed out after 200ms"));
    }

    #[tokio::test]
    async fn test_background_process_does_not_outlive_step() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();

        let started = std::time::Instant::now();
        let result = runner
            .execute("(sleep 1; touch leftover) & echo started", &context(dir.path()))
            .await
            .unwrap();

        assert!(result.success());
        assert!(started.elapsed() < Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("leftover").exists());
    }

    #[tokio::test]
    async fn test_missing_shell_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(ShellConfig {
            shell: "/nonexistent/shell".to_string(),
        });

        let err = runner
            .execute("true", &context(dir.path()))
            .await
            .unwrap_err();

        assert!(err.is_unresolvable());
    }
}
