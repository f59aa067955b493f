//! Child process execution.
//!
//! Used twice per round: to re-run the user's command before analysis and to
//! run a confirmed suggestion. Both paths drain stdout and stderr on separate
//! tasks, ask the user whether to stop a command that is still running after
//! the watchdog interval, and kill the child on Ctrl-C.
//!
//! Every child leads its own process group. Terminating or interrupting a run
//! signals the whole group, so commands started by `$SHELL -c` go with it.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::gate::Confirm;

/// How long a child may run before the user is asked about it
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Captured result of one child process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Command line as the user sees it
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal or by the user
    pub exit_code: Option<i32>,
    /// The user stopped it at the watchdog prompt
    pub terminated: bool,
}

impl CommandOutput {
    /// Output for a command that never started; the failure becomes stderr
    pub fn not_started(command: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            command: command.into(),
            stderr: reason.to_string(),
            exit_code: Some(127),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Errors raised while running a child process
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Could not parse command (unbalanced quotes?): {0}")]
    Parse(String),

    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ExecError {
    pub(crate) fn from_confirm(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::Interrupted {
            ExecError::Interrupted
        } else {
            ExecError::Io(err)
        }
    }
}

/// Split a command line into program and arguments with POSIX quoting rules.
pub fn split_command(command: &str) -> Result<Vec<String>, ExecError> {
    let argv = shlex::split(command).ok_or_else(|| ExecError::Parse(command.to_string()))?;
    if argv.is_empty() {
        return Err(ExecError::EmptyCommand);
    }
    Ok(argv)
}

/// Shell used for re-running the user's own command
pub fn user_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.trim().is_empty())
        .unwrap_or_else(|| "sh".to_string())
}

fn shell_command(shell: &str, command: &str) -> Command {
    let mut cmd = std::process::Command::new(shell);
    cmd.arg("-c").arg(command);
    in_own_group(cmd)
}

fn in_own_group(mut cmd: std::process::Command) -> Command {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    Command::from(cmd)
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Kills a child's process group when dropped
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            signal_group(pgid);
        }
    }

    fn release(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // A group that is already gone fails with ESRCH, which is fine.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(pgid, error = %io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32) {}

#[derive(Clone, Copy)]
enum Channel {
    Stdout,
    Stderr,
}

/// Runs child processes under watchdog and Ctrl-C supervision
pub struct Runner<'a> {
    confirm: &'a dyn Confirm,
    echo: bool,
    watchdog: Duration,
}

impl<'a> Runner<'a> {
    pub fn new(confirm: &'a dyn Confirm) -> Self {
        Self {
            confirm,
            echo: true,
            watchdog: WATCHDOG_INTERVAL,
        }
    }

    /// Builder: mirror the child's output to our own stdout/stderr
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Builder: change the watchdog interval
    pub fn watchdog(mut self, interval: Duration) -> Self {
        self.watchdog = interval;
        self
    }

    /// Run `command` through the user's shell so shell diagnostics are captured.
    pub async fn run_shell(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let shell = user_shell();
        tracing::debug!(%shell, command, "running through shell");
        self.run(shell_command(&shell, command), command, ctrl_c()).await
    }

    /// Split `command` and spawn it directly, without a shell.
    pub async fn run_argv(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let argv = split_command(command)?;
        let mut cmd = std::process::Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        tracing::debug!(?argv, "running without shell");
        self.run(in_own_group(cmd), command, ctrl_c()).await
    }

    async fn run<F>(
        &self,
        mut cmd: Command,
        display: &str,
        interrupt: F,
    ) -> Result<CommandOutput, ExecError>
    where
        F: Future<Output = ()>,
    {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: display.to_string(),
            source,
        })?;
        let mut group = ProcessGroup::of(&child);

        let stdout = spawn_drain(child.stdout.take(), Channel::Stdout, self.echo);
        let stderr = spawn_drain(child.stderr.take(), Channel::Stderr, self.echo);

        tokio::pin!(interrupt);
        let status = self.supervise(&mut child, &mut group, interrupt).await?;

        let stdout = join_drain(stdout).await?;
        let stderr = join_drain(stderr).await?;
        group.release();

        let output = CommandOutput {
            command: display.to_string(),
            stdout,
            stderr,
            exit_code: status.and_then(|s| s.code()),
            terminated: status.is_none(),
        };
        tracing::debug!(exit_code = ?output.exit_code, terminated = output.terminated, "child finished");
        Ok(output)
    }

    /// Wait for the child. Returns `None` when the user chose to terminate it.
    async fn supervise<F>(
        &self,
        child: &mut Child,
        group: &mut ProcessGroup,
        mut interrupt: Pin<&mut F>,
    ) -> Result<Option<ExitStatus>, ExecError>
    where
        F: Future<Output = ()>,
    {
        loop {
            tokio::select! {
                status = child.wait() => return Ok(Some(status?)),
                _ = interrupt.as_mut() => {
                    group.kill();
                    let _ = child.wait().await;
                    return Err(ExecError::Interrupted);
                }
                _ = tokio::time::sleep(self.watchdog) => {}
            }

            let question = format!(
                "Still running after {}s. Terminate it?",
                self.watchdog.as_secs_f32().round()
            );
            let terminate = match self.confirm.confirm(&question).await {
                Ok(answer) => answer,
                Err(e) => {
                    group.kill();
                    let _ = child.wait().await;
                    return Err(ExecError::from_confirm(e));
                }
            };

            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if terminate {
                group.kill();
                child.wait().await?;
                return Ok(None);
            }
        }
    }
}

fn spawn_drain<R>(reader: Option<R>, channel: Channel, echo: bool) -> JoinHandle<io::Result<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else {
            return Ok(String::new());
        };
        let mut reader = BufReader::new(reader);
        let mut captured = String::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            if echo {
                match channel {
                    Channel::Stdout => tokio::io::stdout().write_all(&line).await?,
                    Channel::Stderr => tokio::io::stderr().write_all(&line).await?,
                }
            }
            captured.push_str(&String::from_utf8_lossy(&line));
        }
        Ok(captured)
    })
}

async fn join_drain(handle: JoinHandle<io::Result<String>>) -> Result<String, ExecError> {
    handle.await.map_err(io::Error::other)?.map_err(ExecError::Io)
}
