//! Fluent single-command builder.
//!
//! Every builder (single, sequential, parallel) owns a `CommandOptions`
//! draft; the shared fluent setters live on [`ConfigureCommand`] so the three
//! builders configure identically:
//!
//! ```no_run
//! use procflow::command::{CommandClient, ConfigureCommand};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), procflow::errors::CommandError> {
//! let client = CommandClient::new();
//! let result = client
//!     .command("git status --porcelain")
//!     .in_directory("/srv/repo")
//!     .with_timeout(Duration::from_secs(10))
//!     .run()
//!     .await?;
//! println!("{}", result.stdout);
//! # Ok(())
//! # }
//! ```

use super::progress::ProgressExtractor;
use super::strategy::ExecutionStrategy;
use super::types::{
    CommandOptions, CommandResult, Encoding, KillSignal, OutputStream, ProgressInfo,
    RetryOptions, ShellMode,
};
use crate::errors::CommandError;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Reason recorded on results skipped by an `only_if` condition.
pub const SKIP_REASON: &str = "Condition not met";

/// Fluent setters over a builder's `CommandOptions` draft.
///
/// Each setter mutates the draft and hands the builder back for chaining.
/// The draft is only read when the builder runs.
pub trait ConfigureCommand: Sized {
    fn options_mut(&mut self) -> &mut CommandOptions;

    fn in_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options_mut().cwd = Some(dir.into());
        self
    }

    /// Merge variables into the draft; later values win on conflicts.
    fn with_env<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.options_mut()
            .env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options_mut().timeout = Some(timeout);
        self
    }

    /// `true`/`false` or a `ShellMode::Program` naming a specific shell.
    fn with_shell(mut self, shell: impl Into<ShellMode>) -> Self {
        self.options_mut().shell = shell.into();
        self
    }

    fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.options_mut().encoding = encoding;
        self
    }

    fn with_max_buffer(mut self, bytes: usize) -> Self {
        self.options_mut().max_buffer = Some(bytes);
        self
    }

    fn with_input(mut self, input: impl Into<String>) -> Self {
        self.options_mut().input = Some(input.into());
        self
    }

    fn with_kill_signal(mut self, signal: KillSignal) -> Self {
        self.options_mut().kill_signal = signal;
        self
    }

    fn stream_output(mut self, f: impl Fn(&str, OutputStream) + Send + Sync + 'static) -> Self {
        self.options_mut().callbacks.stream_output = Some(Arc::new(f));
        self
    }

    fn on_progress(mut self, f: impl Fn(&ProgressInfo) + Send + Sync + 'static) -> Self {
        self.options_mut().callbacks.on_progress = Some(Arc::new(f));
        self
    }

    fn on_start(mut self, f: impl Fn(Option<u32>) + Send + Sync + 'static) -> Self {
        self.options_mut().callbacks.on_start = Some(Arc::new(f));
        self
    }

    fn on_complete(mut self, f: impl Fn(&CommandResult) + Send + Sync + 'static) -> Self {
        self.options_mut().callbacks.on_complete = Some(Arc::new(f));
        self
    }

    fn on_error(mut self, f: impl Fn(&CommandError) + Send + Sync + 'static) -> Self {
        self.options_mut().callbacks.on_error = Some(Arc::new(f));
        self
    }

    fn with_progress_extractor(mut self, extractor: impl ProgressExtractor + 'static) -> Self {
        self.options_mut().progress_extractor = Arc::new(extractor);
        self
    }

    fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.options_mut().retry = Some(retry);
        self
    }

    /// Skip execution entirely when `condition` returns false.
    fn only_if(mut self, condition: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.options_mut().condition = Some(Arc::new(move || {
            let run = condition();
            futures::future::ready(run).boxed()
        }));
        self
    }

    /// Asynchronous form of [`only_if`](Self::only_if).
    fn only_if_async<F, Fut>(mut self, condition: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.options_mut().condition = Some(Arc::new(move || condition().boxed()));
        self
    }

    /// Treat the run as failed when `predicate` rejects the result.
    fn validate_output(
        mut self,
        predicate: impl Fn(&CommandResult) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.options_mut().validate_output = Some(Arc::new(predicate));
        self
    }

    fn parse_output<T: Send + 'static>(
        mut self,
        parser: impl Fn(&str) -> T + Send + Sync + 'static,
    ) -> Self {
        self.options_mut().parse_output =
            Some(Arc::new(move |stdout: &str| Box::new(parser(stdout)) as Box<dyn Any + Send>));
        self
    }

    /// Copy every field that is set on `options` into the draft.
    fn with_options(mut self, options: &CommandOptions) -> Self {
        let draft = self.options_mut();
        if let Some(cwd) = &options.cwd {
            draft.cwd = Some(cwd.clone());
        }
        draft
            .env
            .extend(options.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        if options.timeout.is_some() {
            draft.timeout = options.timeout;
        }
        if options.shell.is_enabled() {
            draft.shell = options.shell.clone();
        }
        draft.encoding = options.encoding;
        if options.max_buffer.is_some() {
            draft.max_buffer = options.max_buffer;
        }
        if options.input.is_some() {
            draft.input = options.input.clone();
        }
        draft.kill_signal = options.kill_signal;

        let callbacks = &options.callbacks;
        if callbacks.stream_output.is_some() {
            draft.callbacks.stream_output = callbacks.stream_output.clone();
        }
        if callbacks.on_progress.is_some() {
            draft.callbacks.on_progress = callbacks.on_progress.clone();
        }
        if callbacks.on_start.is_some() {
            draft.callbacks.on_start = callbacks.on_start.clone();
        }
        if callbacks.on_complete.is_some() {
            draft.callbacks.on_complete = callbacks.on_complete.clone();
        }
        if callbacks.on_error.is_some() {
            draft.callbacks.on_error = callbacks.on_error.clone();
        }

        if options.retry.is_some() {
            draft.retry = options.retry.clone();
        }
        if options.condition.is_some() {
            draft.condition = options.condition.clone();
        }
        if options.validate_output.is_some() {
            draft.validate_output = options.validate_output.clone();
        }
        if options.parse_output.is_some() {
            draft.parse_output = options.parse_output.clone();
        }
        draft.progress_extractor = Arc::clone(&options.progress_extractor);
        self
    }
}

/// Builder for one command string.
pub struct CommandBuilder {
    command: String,
    options: CommandOptions,
    strategy: Arc<dyn ExecutionStrategy>,
}

impl std::fmt::Debug for CommandBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuilder")
            .field("command", &self.command)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ConfigureCommand for CommandBuilder {
    fn options_mut(&mut self) -> &mut CommandOptions {
        &mut self.options
    }
}

impl CommandBuilder {
    pub fn new(command: impl Into<String>, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        Self {
            command: command.into(),
            options: CommandOptions::default(),
            strategy,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn options(&self) -> &CommandOptions {
        &self.options
    }

    /// Run the command.
    ///
    /// A failed `only_if` condition yields a successful result flagged
    /// `metadata.skipped` without spawning anything. With a retry policy the
    /// command is attempted up to `retry.attempts` times.
    pub async fn run(&self) -> Result<CommandResult, CommandError> {
        if !self.options.should_run().await {
            tracing::debug!(command = %self.command, "Condition not met, skipping command");
            return Ok(CommandResult::skipped(&self.command, SKIP_REASON));
        }

        match &self.options.retry {
            Some(retry) => {
                run_with_retry(self.strategy.as_ref(), &self.command, &self.options, retry).await
            }
            None => self.strategy.execute(&self.command, &self.options).await,
        }
    }

    /// Run, then feed stdout through the `parse_output` parser.
    pub async fn run_and_parse<T: 'static>(&self) -> Result<T, CommandError> {
        let parser = self
            .options
            .parse_output
            .clone()
            .ok_or_else(|| CommandError::MissingParser(self.command.clone()))?;

        let result = self.run().await?;
        parser(&result.stdout)
            .downcast::<T>()
            .map(|parsed| *parsed)
            .map_err(|_| CommandError::ParserTypeMismatch(self.command.clone()))
    }
}

/// Attempt `command` until it succeeds, the retry predicate opts out, or
/// the attempts run out.
///
/// An attempt whose error carries a result is shown to `should_retry` too;
/// opting out there surfaces that error unchanged.
async fn run_with_retry(
    strategy: &dyn ExecutionStrategy,
    command: &str,
    options: &CommandOptions,
    retry: &RetryOptions,
) -> Result<CommandResult, CommandError> {
    let attempts = retry.attempts.max(1);
    let mut last_result: Option<CommandResult> = None;
    let mut attempt = 1;

    loop {
        let last_attempt = attempt >= attempts;
        match strategy.execute(command, options).await {
            Ok(result) => {
                let stop = retry
                    .should_retry
                    .as_ref()
                    .is_some_and(|should_retry| !should_retry(&result, attempt));
                if stop || result.success || last_attempt {
                    return Ok(result);
                }
                last_result = Some(result);
            }
            Err(err) => {
                let stop = match (&retry.should_retry, err.result()) {
                    (Some(should_retry), Some(result)) => !should_retry(result, attempt),
                    _ => false,
                };
                if stop {
                    return Err(err);
                }
                if last_attempt {
                    return match last_result {
                        Some(result) => Ok(result),
                        None => Err(CommandError::RetryExhausted {
                            command: command.to_string(),
                            attempts,
                            source: Box::new(err),
                        }),
                    };
                }
            }
        }

        let delay = retry.delay_for(attempt);
        tracing::debug!(
            command,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Command attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
