//! Execution strategy: one command string in, one OS process out.
//!
//! `ProcessStrategy` spawns the process, streams its output through the
//! configured callbacks, enforces the timeout and buffer limit, and settles
//! into either a `CommandResult` or a `CommandError`:
//!
//! | Outcome                                   | Settlement                  |
//! |-------------------------------------------|-----------------------------|
//! | `validate_output` returned false          | `CommandError::Validation`  |
//! | non-zero / missing exit code, no timeout  | `CommandError::Execution`   |
//! | timeout elapsed                           | `CommandError::Timeout`     |
//! | could not spawn                           | `CommandError::Spawn`       |
//! | exit code 0                               | `Ok(CommandResult)`         |
//!
//! On unix every child leads its own process group, so timeout and overflow
//! kills also reach grandchildren started by a shell.

use super::tokenize::split_program;
use super::types::{CommandOptions, CommandResult, KillSignal, OutputStream, ShellMode};
use crate::errors::CommandError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

const READ_CHUNK_SIZE: usize = 8192;

/// How long output is still read once the process itself has exited.
///
/// A background job started by a shell can hold the pipes open long after
/// the shell is gone; its output past this window is not collected.
const EXIT_DRAIN_WINDOW: Duration = Duration::from_millis(250);

/// Marker appended to stderr when the output limit kills a process.
pub const MAX_BUFFER_MARKER: &str = "[maxBuffer exceeded]";

/// Spawns processes for command strings.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Run `command` to completion under `options`.
    async fn execute(
        &self,
        command: &str,
        options: &CommandOptions,
    ) -> Result<CommandResult, CommandError>;

    /// Send SIGTERM to `pid`, or to every live process when `None`.
    ///
    /// Best effort: failures are logged, never returned.
    fn kill(&self, pid: Option<u32>);
}

/// Local child-process implementation of [`ExecutionStrategy`].
#[derive(Debug, Default)]
pub struct ProcessStrategy {
    /// Pids of children that have not settled yet
    live: Arc<Mutex<HashSet<u32>>>,
    /// Live pids that `kill` has signalled
    signalled: Arc<Mutex<HashSet<u32>>>,
    /// Shell used for `ShellMode::Default` instead of the platform shell
    default_shell: Option<PathBuf>,
}

/// Removes a pid from the live set when the execution settles or is dropped.
struct LiveGuard {
    live: Arc<Mutex<HashSet<u32>>>,
    signalled: Arc<Mutex<HashSet<u32>>>,
    pid: u32,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.remove(&self.pid);
        let mut signalled = self.signalled.lock().unwrap_or_else(|e| e.into_inner());
        signalled.remove(&self.pid);
    }
}

/// Raw output gathered while the process runs.
#[derive(Default)]
struct Collected {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    killed: bool,
    timed_out: bool,
    overflowed: bool,
}

impl ProcessStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `shell` whenever a command enables the shell without naming one.
    pub fn with_default_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.default_shell = Some(shell.into());
        self
    }

    /// Pids of processes currently running under this strategy.
    pub fn running(&self) -> Vec<u32> {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.iter().copied().collect()
    }

    fn track(&self, pid: u32) -> LiveGuard {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid);
        LiveGuard {
            live: Arc::clone(&self.live),
            signalled: Arc::clone(&self.signalled),
            pid,
        }
    }

    fn mark_signalled(&self, pid: u32) {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if live.contains(&pid) {
            self.signalled
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(pid);
        }
    }

    fn was_signalled(&self, pid: u32) -> bool {
        self.signalled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&pid)
    }

    fn build_command(&self, command: &str, options: &CommandOptions) -> std::io::Result<Command> {
        let mut cmd = match &options.shell {
            ShellMode::Disabled => {
                let (program, args) = split_program(command).ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command")
                })?;
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            ShellMode::Default => shell_command(self.default_shell.as_deref(), command),
            ShellMode::Program(shell) => shell_command(Some(shell), command),
        };

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        cmd.envs(&options.env)
            .stdin(if options.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        cmd.process_group(0);

        Ok(cmd)
    }

    /// Read both pipes until the process exits, honouring the timeout and
    /// buffer limit, then drain whatever output is still buffered.
    async fn collect(
        &self,
        child: &mut Child,
        command: &str,
        options: &CommandOptions,
    ) -> (Collected, std::io::Result<std::process::ExitStatus>) {
        let mut collected = Collected::default();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out_buf = vec![0u8; READ_CHUNK_SIZE];
        let mut err_buf = vec![0u8; READ_CHUNK_SIZE];
        let deadline = options.timeout.map(|t| tokio::time::Instant::now() + t);

        let status = loop {
            tokio::select! {
                read = read_pipe(&mut stdout, &mut out_buf), if stdout.is_some() => match read {
                    Ok(0) | Err(_) => stdout = None,
                    Ok(n) => {
                        if record_chunk(&out_buf[..n], OutputStream::Stdout, &mut collected, options) {
                            overflow(child, command, options, &mut collected);
                        }
                    }
                },
                read = read_pipe(&mut stderr, &mut err_buf), if stderr.is_some() => match read {
                    Ok(0) | Err(_) => stderr = None,
                    Ok(n) => {
                        if record_chunk(&err_buf[..n], OutputStream::Stderr, &mut collected, options) {
                            overflow(child, command, options, &mut collected);
                        }
                    }
                },
                _ = sleep_until(deadline), if !collected.killed => {
                    tracing::warn!(
                        command,
                        timeout_ms = options.timeout.map(|t| t.as_millis() as u64),
                        "Command timed out, terminating"
                    );
                    collected.timed_out = true;
                    collected.killed = true;
                    terminate(child, options.kill_signal);
                },
                status = child.wait() => {
                    break status;
                }
            }
        };

        let drained = tokio::time::timeout(EXIT_DRAIN_WINDOW, async {
            while stdout.is_some() || stderr.is_some() {
                tokio::select! {
                    read = read_pipe(&mut stdout, &mut out_buf), if stdout.is_some() => match read {
                        Ok(0) | Err(_) => stdout = None,
                        Ok(n) => {
                            if record_chunk(&out_buf[..n], OutputStream::Stdout, &mut collected, options) {
                                collected.overflowed = true;
                                break;
                            }
                        }
                    },
                    read = read_pipe(&mut stderr, &mut err_buf), if stderr.is_some() => match read {
                        Ok(0) | Err(_) => stderr = None,
                        Ok(n) => {
                            if record_chunk(&err_buf[..n], OutputStream::Stderr, &mut collected, options) {
                                collected.overflowed = true;
                                break;
                            }
                        }
                    },
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!(
                command,
                "Output pipes still open after exit, a background process holds them"
            );
        }

        (collected, status)
    }
}

#[async_trait]
impl ExecutionStrategy for ProcessStrategy {
    async fn execute(
        &self,
        command: &str,
        options: &CommandOptions,
    ) -> Result<CommandResult, CommandError> {
        let started = Instant::now();

        let spawned = self
            .build_command(command, options)
            .and_then(|mut cmd| cmd.spawn());
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                tracing::warn!(command, error = %source, "Failed to spawn command");
                let err = CommandError::Spawn {
                    command: command.to_string(),
                    source,
                };
                options.callbacks.error(&err);
                return Err(err);
            }
        };

        let pid = child.id();
        let _guard = pid.map(|pid| self.track(pid));
        tracing::debug!(command, pid, "Spawned command");
        options.callbacks.start(pid);

        if let (Some(input), Some(mut stdin)) = (options.input.clone(), child.stdin.take()) {
            // Written from a separate task so a process that fills its stdout
            // before draining stdin cannot deadlock the reader loop.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(error = %e, "Failed to write command stdin");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let (mut collected, status) = self.collect(&mut child, command, options).await;

        if collected.overflowed {
            if !collected.stderr.is_empty() {
                collected.stderr.push(b'\n');
            }
            collected.stderr.extend_from_slice(MAX_BUFFER_MARKER.as_bytes());
        }

        let stdout = options.encoding.decode(&collected.stdout);
        let stderr = options.encoding.decode(&collected.stderr);
        let mut result = CommandResult::new(command, None, stdout, stderr, started.elapsed());
        match status {
            Ok(status) => {
                result.exit_code = status.code();
                result.signal = exit_signal(&status);
            }
            Err(e) => tracing::warn!(command, error = %e, "Failed to wait for command"),
        }
        result.killed = collected.killed || pid.is_some_and(|pid| self.was_signalled(pid));
        result.timed_out = collected.timed_out;
        if result.killed && result.signal.is_none() {
            result.signal = Some(options.kill_signal.as_str().to_string());
        }
        result.refresh_success();

        tracing::debug!(
            command,
            pid,
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            killed = result.killed,
            "Command settled"
        );

        let validation_failed = options
            .validate_output
            .as_ref()
            .is_some_and(|validate| !validate(&result));

        options.callbacks.complete(&result);

        let outcome = if validation_failed {
            Err(CommandError::Validation {
                result: Box::new(result),
            })
        } else if !result.timed_out && result.exit_code != Some(0) {
            Err(CommandError::Execution {
                result: Box::new(result),
            })
        } else if result.timed_out {
            Err(CommandError::Timeout {
                timeout: options.timeout.unwrap_or_default(),
                result: Box::new(result),
            })
        } else {
            Ok(result)
        };

        if let Err(err) = &outcome {
            options.callbacks.error(err);
        }
        outcome
    }

    fn kill(&self, pid: Option<u32>) {
        match pid {
            Some(pid) => match signal_pid(pid, KillSignal::Term) {
                Ok(()) => self.mark_signalled(pid),
                Err(e) => tracing::warn!(pid, error = %e, "Failed to kill process"),
            },
            None => {
                for pid in self.running() {
                    let sent = signal_group(pid, KillSignal::Term)
                        .or_else(|_| signal_pid(pid, KillSignal::Term));
                    match sent {
                        Ok(()) => self.mark_signalled(pid),
                        Err(e) => tracing::warn!(pid, error = %e, "Failed to kill process"),
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
fn shell_command(shell: Option<&Path>, command: &str) -> Command {
    let mut cmd = Command::new(shell.unwrap_or_else(|| Path::new("sh")));
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(shell: Option<&Path>, command: &str) -> Command {
    match shell {
        Some(shell) => {
            let mut cmd = Command::new(shell);
            cmd.arg("-c").arg(command);
            cmd
        }
        None => {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(
    pipe: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match pipe {
        Some(pipe) => pipe.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Store a chunk and fire the stream/progress callbacks.
///
/// Returns true when the chunk pushed combined output over `max_buffer`.
fn record_chunk(
    bytes: &[u8],
    stream: OutputStream,
    collected: &mut Collected,
    options: &CommandOptions,
) -> bool {
    match stream {
        OutputStream::Stdout => collected.stdout.extend_from_slice(bytes),
        OutputStream::Stderr => collected.stderr.extend_from_slice(bytes),
    }

    let text = options.encoding.decode(bytes);
    options.callbacks.stream(&text, stream);
    if stream == OutputStream::Stdout {
        if let Some(info) = options.progress_extractor.extract(&text) {
            options.callbacks.progress(&info);
        }
    }

    !collected.killed
        && options
            .max_buffer
            .is_some_and(|max| collected.stdout.len() + collected.stderr.len() > max)
}

fn overflow(child: &mut Child, command: &str, options: &CommandOptions, collected: &mut Collected) {
    tracing::warn!(
        command,
        max_buffer = options.max_buffer,
        "Command output exceeded max buffer, terminating"
    );
    collected.overflowed = true;
    collected.killed = true;
    terminate(child, options.kill_signal);
}

/// Signal the child's process group, falling back to the child itself.
fn terminate(child: &mut Child, signal: KillSignal) {
    if let Some(pid) = child.id() {
        if signal_group(pid, signal).is_ok() || signal_pid(pid, signal).is_ok() {
            return;
        }
    }
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Failed to terminate command");
    }
}

#[cfg(unix)]
fn signal_pid(pid: u32, signal: KillSignal) -> std::io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal.as_raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: KillSignal) -> std::io::Result<()> {
    // SAFETY: kill(2) with a negative pid targets a process group.
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signal.as_raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn signal_pid(pid: u32, _signal: KillSignal) -> std::io::Result<()> {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("taskkill exited with {}", status)))
    }
}

#[cfg(not(unix))]
fn signal_group(pid: u32, signal: KillSignal) -> std::io::Result<()> {
    signal_pid(pid, signal)
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(KillSignal::name_of)
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<String> {
    None
}
