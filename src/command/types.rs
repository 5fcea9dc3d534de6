//! Value types shared by the execution strategy, the builders and the client.
//!
//! - `CommandOptions`: per-execution configuration, including the typed
//!   callback slots in `CommandCallbacks`
//! - `CommandResult`: structured outcome of one process execution
//! - `ParallelResult`: aggregate outcome of a concurrent batch
//! - `RetryOptions`: retry policy consumed by `CommandBuilder`

use crate::command::progress::{PercentExtractor, ProgressExtractor};
use crate::errors::CommandError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Which pipe a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// How the command string is turned into a process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellMode {
    /// Tokenize into executable + argv and spawn directly.
    #[default]
    Disabled,
    /// Hand the whole string to the platform shell (`sh -c` / `cmd /C`).
    Default,
    /// Hand the whole string to a specific shell executable.
    Program(PathBuf),
}

impl ShellMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ShellMode::Disabled)
    }
}

impl From<bool> for ShellMode {
    fn from(enabled: bool) -> Self {
        if enabled {
            ShellMode::Default
        } else {
            ShellMode::Disabled
        }
    }
}

/// Text decoding applied to captured output bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8, invalid sequences replaced with U+FFFD.
    #[default]
    Utf8,
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
}

impl Encoding {
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Utf8 => write!(f, "utf8"),
            Encoding::Latin1 => write!(f, "latin1"),
        }
    }
}

impl std::str::FromStr for Encoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" | "binary" => Ok(Encoding::Latin1),
            _ => anyhow::bail!("Invalid encoding '{}'. Valid values: utf8, latin1", s),
        }
    }
}

/// Signal used to terminate a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KillSignal {
    #[default]
    #[serde(rename = "SIGTERM")]
    Term,
    #[serde(rename = "SIGKILL")]
    Kill,
    #[serde(rename = "SIGINT")]
    Int,
    #[serde(rename = "SIGHUP")]
    Hup,
    #[serde(rename = "SIGQUIT")]
    Quit,
}

impl KillSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillSignal::Term => "SIGTERM",
            KillSignal::Kill => "SIGKILL",
            KillSignal::Int => "SIGINT",
            KillSignal::Hup => "SIGHUP",
            KillSignal::Quit => "SIGQUIT",
        }
    }

    #[cfg(unix)]
    pub fn as_raw(&self) -> libc::c_int {
        match self {
            KillSignal::Term => libc::SIGTERM,
            KillSignal::Kill => libc::SIGKILL,
            KillSignal::Int => libc::SIGINT,
            KillSignal::Hup => libc::SIGHUP,
            KillSignal::Quit => libc::SIGQUIT,
        }
    }

    /// Name of a raw signal number, for reporting how a process died.
    #[cfg(unix)]
    pub fn name_of(raw: i32) -> String {
        match raw {
            libc::SIGTERM => "SIGTERM".to_string(),
            libc::SIGKILL => "SIGKILL".to_string(),
            libc::SIGINT => "SIGINT".to_string(),
            libc::SIGHUP => "SIGHUP".to_string(),
            libc::SIGQUIT => "SIGQUIT".to_string(),
            libc::SIGPIPE => "SIGPIPE".to_string(),
            libc::SIGSEGV => "SIGSEGV".to_string(),
            libc::SIGABRT => "SIGABRT".to_string(),
            other => format!("SIG{}", other),
        }
    }
}

impl std::fmt::Display for KillSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for KillSignal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        match upper.trim_start_matches("SIG") {
            "TERM" => Ok(KillSignal::Term),
            "KILL" => Ok(KillSignal::Kill),
            "INT" => Ok(KillSignal::Int),
            "HUP" => Ok(KillSignal::Hup),
            "QUIT" => Ok(KillSignal::Quit),
            _ => anyhow::bail!(
                "Invalid kill signal '{}'. Valid values: SIGTERM, SIGKILL, SIGINT, SIGHUP, SIGQUIT",
                s
            ),
        }
    }
}

/// Progress report extracted from command output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Percentage complete, clamped to 0..=100
    pub percentage: u8,
    /// Output line or step description the percentage came from
    pub message: String,
}

pub type StreamCallback = Arc<dyn Fn(&str, OutputStream) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(&ProgressInfo) + Send + Sync>;
/// Receives the OS pid of the spawned process, `None` for batch-level starts.
pub type StartCallback = Arc<dyn Fn(Option<u32>) + Send + Sync>;
pub type CompleteCallback = Arc<dyn Fn(&CommandResult) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&CommandError) + Send + Sync>;
pub type ConditionFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;
pub type ValidateFn = Arc<dyn Fn(&CommandResult) -> bool + Send + Sync>;
pub type ShouldRetryFn = Arc<dyn Fn(&CommandResult, u32) -> bool + Send + Sync>;
pub type ParseFn = Arc<dyn Fn(&str) -> Box<dyn Any + Send> + Send + Sync>;

/// Optional side-effecting hooks invoked at fixed points of an execution.
#[derive(Clone, Default)]
pub struct CommandCallbacks {
    pub stream_output: Option<StreamCallback>,
    pub on_progress: Option<ProgressCallback>,
    pub on_start: Option<StartCallback>,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl CommandCallbacks {
    pub(crate) fn start(&self, pid: Option<u32>) {
        if let Some(cb) = &self.on_start {
            cb(pid);
        }
    }

    pub(crate) fn stream(&self, chunk: &str, stream: OutputStream) {
        if let Some(cb) = &self.stream_output {
            cb(chunk, stream);
        }
    }

    pub(crate) fn progress(&self, info: &ProgressInfo) {
        if let Some(cb) = &self.on_progress {
            cb(info);
        }
    }

    pub(crate) fn complete(&self, result: &CommandResult) {
        if let Some(cb) = &self.on_complete {
            cb(result);
        }
    }

    pub(crate) fn error(&self, error: &CommandError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }
}

impl std::fmt::Debug for CommandCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCallbacks")
            .field("stream_output", &self.stream_output.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_start", &self.on_start.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Retry policy for a single command.
#[derive(Clone)]
pub struct RetryOptions {
    /// Total attempts including the first one
    pub attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
    /// Double the delay after every failed attempt
    pub exponential_backoff: bool,
    /// Upper bound for the backoff delay
    pub max_delay: Option<Duration>,
    /// Return `false` to stop retrying after inspecting an attempt's result
    pub should_retry: Option<ShouldRetryFn>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(1000),
            exponential_backoff: false,
            max_delay: None,
            should_retry: None,
        }
    }
}

impl RetryOptions {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_exponential_backoff(mut self, max_delay: Option<Duration>) -> Self {
        self.exponential_backoff = true;
        self.max_delay = max_delay;
        self
    }

    pub fn with_should_retry(
        mut self,
        predicate: impl Fn(&CommandResult, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.delay;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.delay.saturating_mul(factor);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("attempts", &self.attempts)
            .field("delay", &self.delay)
            .field("exponential_backoff", &self.exponential_backoff)
            .field("max_delay", &self.max_delay)
            .field("should_retry", &self.should_retry.is_some())
            .finish()
    }
}

/// Configuration for one execution.
///
/// Cloning is cheap: callbacks and predicates are reference counted, so the
/// same draft can be shared by every command of a batch.
#[derive(Clone)]
pub struct CommandOptions {
    /// Working directory, defaults to the current process directory
    pub cwd: Option<PathBuf>,
    /// Merged over the inherited environment; these values win
    pub env: HashMap<String, String>,
    /// Kill the process once this much time has elapsed
    pub timeout: Option<Duration>,
    pub shell: ShellMode,
    pub encoding: Encoding,
    /// Kill the process once combined stdout+stderr exceeds this many bytes
    pub max_buffer: Option<usize>,
    /// Written to stdin, which is then closed
    pub input: Option<String>,
    pub kill_signal: KillSignal,
    pub callbacks: CommandCallbacks,
    pub retry: Option<RetryOptions>,
    pub condition: Option<ConditionFn>,
    pub validate_output: Option<ValidateFn>,
    pub parse_output: Option<ParseFn>,
    pub progress_extractor: Arc<dyn ProgressExtractor>,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: HashMap::new(),
            timeout: None,
            shell: ShellMode::Disabled,
            encoding: Encoding::Utf8,
            max_buffer: None,
            input: None,
            kill_signal: KillSignal::Term,
            callbacks: CommandCallbacks::default(),
            retry: None,
            condition: None,
            validate_output: None,
            parse_output: None,
            progress_extractor: Arc::new(PercentExtractor::default()),
        }
    }
}

impl CommandOptions {
    /// Evaluate the `condition` predicate; absent means "run".
    pub async fn should_run(&self) -> bool {
        match &self.condition {
            Some(condition) => condition().await,
            None => true,
        }
    }
}

impl std::fmt::Debug for CommandOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandOptions")
            .field("cwd", &self.cwd)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("shell", &self.shell)
            .field("encoding", &self.encoding)
            .field("max_buffer", &self.max_buffer)
            .field("input", &self.input.as_ref().map(|i| i.len()))
            .field("kill_signal", &self.kill_signal)
            .field("callbacks", &self.callbacks)
            .field("retry", &self.retry)
            .field("condition", &self.condition.is_some())
            .field("validate_output", &self.validate_output.is_some())
            .field("parse_output", &self.parse_output.is_some())
            .finish()
    }
}

/// Outcome of one process execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit code was 0 and the process did not time out
    pub success: bool,
    /// `None` when the process ended without reporting a code (signal, spawn failure)
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// The literal command string that was executed
    pub command: String,
    /// The process was forcibly terminated
    pub killed: bool,
    /// Signal that terminated the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CommandResult {
    /// Build a result for a process that ran to completion.
    ///
    /// Output is trimmed and `success` is derived from the exit code.
    pub fn new(
        command: impl Into<String>,
        exit_code: Option<i32>,
        stdout: impl AsRef<str>,
        stderr: impl AsRef<str>,
        duration: Duration,
    ) -> Self {
        Self {
            success: exit_code == Some(0),
            exit_code,
            stdout: stdout.as_ref().trim().to_string(),
            stderr: stderr.as_ref().trim().to_string(),
            duration,
            command: command.into(),
            killed: false,
            signal: None,
            timed_out: false,
            metadata: HashMap::new(),
        }
    }

    /// Synthetic successful result for a command whose condition was not met.
    pub fn skipped(command: impl Into<String>, reason: &str) -> Self {
        Self::new(command, Some(0), "", "", Duration::ZERO)
            .with_metadata("skipped", serde_json::Value::Bool(true))
            .with_metadata("reason", serde_json::Value::String(reason.to_string()))
    }

    /// Synthetic failing result for a command that produced no process result.
    pub fn failure(command: impl Into<String>, message: impl AsRef<str>) -> Self {
        Self::new(command, None, "", message, Duration::ZERO)
    }

    /// Convert an error into an in-band failing result.
    ///
    /// Keeps whatever exit code and output the error carried.
    pub fn from_error(command: &str, error: &CommandError) -> Self {
        match error.result() {
            Some(result) => {
                let mut result = result.clone();
                if matches!(error, CommandError::Validation { .. }) {
                    result.success = false;
                    result
                        .metadata
                        .insert("validation_failed".to_string(), serde_json::Value::Bool(true));
                }
                result
            }
            None => Self::failure(command, error.to_string()),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Recompute `success` from the exit code and timeout flag.
    pub(crate) fn refresh_success(&mut self) {
        self.success = self.exit_code == Some(0) && !self.timed_out;
    }

    pub fn is_skipped(&self) -> bool {
        self.metadata
            .get("skipped")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Aggregate outcome of a parallel batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelResult {
    /// Index-aligned with the input commands
    pub results: Vec<CommandResult>,
    pub all_successful: bool,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Commands whose result was not successful, in input order
    pub failed_commands: Vec<String>,
}

impl ParallelResult {
    /// Vacuously successful result for a batch that never ran.
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            all_successful: true,
            duration: Duration::ZERO,
            failed_commands: Vec::new(),
        }
    }

    pub fn from_results(results: Vec<CommandResult>, duration: Duration) -> Self {
        let failed_commands: Vec<String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.command.clone())
            .collect();
        Self {
            all_successful: failed_commands.is_empty(),
            results,
            duration,
            failed_commands,
        }
    }
}

/// Serde helpers for Duration serialization as milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
