//! `CommandClient`: the single entry point for running commands.
//!
//! The client owns the execution strategy, the template registry and the
//! execution history. Construct one per application and share it; every
//! builder it hands out runs through the same strategy.

use super::builder::{CommandBuilder, ConfigureCommand};
use super::history::{CommandHistory, HistoryEntry};
use super::parallel::ParallelBuilder;
use super::sequential::SequentialBuilder;
use super::strategy::{ExecutionStrategy, ProcessStrategy};
use super::template::{CommandTemplate, builtin_templates};
use super::types::{CommandOptions, CommandResult, ParallelResult, ShellMode};
use crate::config::ClientConfig;
use crate::errors::CommandError;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, RwLock};
use std::time::Duration;

const COMMAND_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

static NOT_FOUND_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)not found|could not find").expect("not-found regex is valid")
});

/// Names `command_exists` will hand to the shell: no whitespace or metacharacters.
static COMMAND_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w./+-]+$").expect("command name regex is valid"));

/// How `execute_many` runs a list of commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Parallel,
    Sequential,
    /// Sequential with each stdout piped into the next stdin
    Pipe,
}

impl std::str::FromStr for ExecutionMode {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parallel" => Ok(ExecutionMode::Parallel),
            "sequential" => Ok(ExecutionMode::Sequential),
            "pipe" => Ok(ExecutionMode::Pipe),
            other => Err(CommandError::UnknownMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Pipe => write!(f, "pipe"),
        }
    }
}

/// Outcome of `execute_many`, shaped by the mode.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutput {
    Parallel(ParallelResult),
    Sequential(Vec<CommandResult>),
}

impl BatchOutput {
    pub fn results(&self) -> &[CommandResult] {
        match self {
            BatchOutput::Parallel(outcome) => &outcome.results,
            BatchOutput::Sequential(results) => results,
        }
    }

    pub fn all_successful(&self) -> bool {
        match self {
            BatchOutput::Parallel(outcome) => outcome.all_successful,
            BatchOutput::Sequential(results) => results.iter().all(|r| r.success),
        }
    }
}

pub struct CommandClient {
    strategy: Arc<dyn ExecutionStrategy>,
    /// Applied to every builder and direct execution before caller options
    defaults: CommandOptions,
    templates: RwLock<HashMap<String, CommandTemplate>>,
    history: Mutex<CommandHistory>,
}

impl Default for CommandClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandClient {
    /// Client backed by local child processes, with the built-in templates.
    pub fn new() -> Self {
        Self::with_strategy(Arc::new(ProcessStrategy::new()))
    }

    pub fn with_strategy(strategy: Arc<dyn ExecutionStrategy>) -> Self {
        let templates = builtin_templates()
            .into_iter()
            .map(|(name, template)| (name.to_string(), template))
            .collect();
        Self {
            strategy,
            defaults: CommandOptions::default(),
            templates: RwLock::new(templates),
            history: Mutex::new(CommandHistory::default()),
        }
    }

    /// Client configured from resolved settings.
    ///
    /// Config templates are registered after the built-ins and replace any
    /// built-in of the same name.
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut strategy = ProcessStrategy::new();
        if let Some(shell) = &config.shell {
            strategy = strategy.with_default_shell(shell);
        }

        let mut client = Self::with_strategy(Arc::new(strategy))
            .with_history_capacity(config.history_capacity);
        client.defaults.timeout = config.default_timeout;
        client.defaults.max_buffer = config.max_buffer;

        for (name, template) in &config.templates {
            client.register_template(name, template.clone());
        }
        client
    }

    pub fn with_history_capacity(self, capacity: usize) -> Self {
        Self {
            history: Mutex::new(CommandHistory::new(capacity)),
            ..self
        }
    }

    pub fn strategy(&self) -> &Arc<dyn ExecutionStrategy> {
        &self.strategy
    }

    pub fn command(&self, command: impl Into<String>) -> CommandBuilder {
        CommandBuilder::new(command, Arc::clone(&self.strategy)).with_options(&self.defaults)
    }

    pub fn parallel<S: Into<String>>(&self, commands: impl IntoIterator<Item = S>) -> ParallelBuilder {
        ParallelBuilder::new(commands, Arc::clone(&self.strategy)).with_options(&self.defaults)
    }

    pub fn sequence<S: Into<String>>(
        &self,
        commands: impl IntoIterator<Item = S>,
    ) -> SequentialBuilder {
        SequentialBuilder::new(commands, Arc::clone(&self.strategy)).with_options(&self.defaults)
    }

    /// A sequence with output piping already enabled.
    pub fn pipe<S: Into<String>>(&self, commands: impl IntoIterator<Item = S>) -> SequentialBuilder {
        self.sequence(commands).pipe_output()
    }

    /// Run `command` straight through the strategy and record the outcome.
    ///
    /// Failures are recorded too, as the result the error carried or a
    /// synthetic failing result, before the error is returned.
    pub async fn execute_directly(
        &self,
        command: &str,
        options: &CommandOptions,
    ) -> Result<CommandResult, CommandError> {
        let options = self.with_defaults(options);
        let outcome = self.strategy.execute(command, &options).await;

        let recorded = match &outcome {
            Ok(result) => result.clone(),
            Err(err) => CommandResult::from_error(command, err),
        };
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(HistoryEntry::new(command, &options, recorded));

        outcome
    }

    /// Run a list of commands in the named mode (`parallel`, `sequential`
    /// or `pipe`) with `options` applied to the whole batch.
    pub async fn execute_many<S: Into<String>>(
        &self,
        commands: impl IntoIterator<Item = S>,
        mode: &str,
        options: &CommandOptions,
    ) -> Result<BatchOutput, CommandError> {
        let mode: ExecutionMode = mode.parse()?;
        tracing::debug!(%mode, "Executing command batch");

        let output = match mode {
            ExecutionMode::Parallel => {
                BatchOutput::Parallel(self.parallel(commands).with_options(options).run().await)
            }
            ExecutionMode::Sequential => {
                BatchOutput::Sequential(self.sequence(commands).with_options(options).run().await)
            }
            ExecutionMode::Pipe => {
                BatchOutput::Sequential(self.pipe(commands).with_options(options).run().await)
            }
        };
        Ok(output)
    }

    /// Terminate `pid`, or every process the strategy is running.
    pub fn kill(&self, pid: Option<u32>) {
        self.strategy.kill(pid);
    }

    pub fn register_template(&self, name: impl Into<String>, template: CommandTemplate) {
        let name = name.into();
        tracing::info!(template = %name, command = %template.command, "Registered command template");
        self.templates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, template);
    }

    pub fn template(&self, name: &str) -> Option<CommandTemplate> {
        self.templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Registered template names, sorted.
    pub fn template_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Expand a template without building: the concrete command string and
    /// the template's default options.
    pub fn expand_template(
        &self,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<(String, CommandOptions), CommandError> {
        let template = self
            .template(name)
            .ok_or_else(|| CommandError::TemplateNotFound(name.to_string()))?;
        let command = template.expand(name, params)?;
        Ok((command, template.options()))
    }

    /// A builder for the expanded template with its default options applied.
    pub fn from_template(
        &self,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<CommandBuilder, CommandError> {
        let (command, options) = self.expand_template(name, params)?;
        Ok(self.command(command).with_options(&options))
    }

    /// Most recent `limit` entries (all when `None`), oldest first.
    pub fn get_history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recent(limit)
    }

    pub fn clear_history(&self) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        tracing::info!("Cleared command history");
    }

    pub fn history_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.get_history(None))
    }

    /// Build and run a one-off command with `options` applied.
    pub async fn exec(
        &self,
        command: &str,
        options: &CommandOptions,
    ) -> Result<CommandResult, CommandError> {
        self.command(command).with_options(options).run().await
    }

    /// `exec`, returning only stdout.
    pub async fn get_output(
        &self,
        command: &str,
        options: &CommandOptions,
    ) -> Result<String, CommandError> {
        Ok(self.exec(command, options).await?.stdout)
    }

    /// Whether `command` resolves to an executable on this machine.
    ///
    /// Never fails: any error while looking it up counts as "not found".
    pub async fn command_exists(&self, command: &str) -> bool {
        let name = command.trim();
        if name.is_empty() {
            return false;
        }
        if !COMMAND_NAME_REGEX.is_match(name) {
            tracing::debug!(command = name, "Not a plain command name, skipping lookup");
            return false;
        }

        let lookup = if cfg!(windows) {
            format!("where {}", name)
        } else {
            format!("command -v {}", name)
        };

        match self
            .command(lookup)
            .with_shell(ShellMode::Default)
            .with_timeout(COMMAND_LOOKUP_TIMEOUT)
            .run()
            .await
        {
            Ok(result) => {
                result.success
                    && !result.stdout.trim().is_empty()
                    && !NOT_FOUND_REGEX.is_match(&result.stderr)
            }
            Err(e) => {
                tracing::debug!(command = name, error = %e, "Command lookup failed");
                false
            }
        }
    }

    fn with_defaults(&self, options: &CommandOptions) -> CommandOptions {
        let mut merged = options.clone();
        if merged.timeout.is_none() {
            merged.timeout = self.defaults.timeout;
        }
        if merged.max_buffer.is_none() {
            merged.max_buffer = self.defaults.max_buffer;
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::CountingStrategy;
    use std::path::PathBuf;

    fn spy_client() -> (Arc<CountingStrategy>, CommandClient) {
        let spy = Arc::new(CountingStrategy::default());
        let client = CommandClient::with_strategy(spy.clone());
        (spy, client)
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_history_evicts_oldest_first() {
        let (_, client) = spy_client();
        for n in 0..105 {
            client
                .execute_directly(&format!("echo {}", n), &CommandOptions::default())
                .await
                .unwrap();
        }

        let history = client.get_history(None);
        assert_eq!(history.len(), 100);
        assert_eq!(history[0].command, "echo 5");
        assert_eq!(history[99].command, "echo 104");
        assert_eq!(client.get_history(Some(3)).len(), 3);

        client.clear_history();
        assert!(client.get_history(None).is_empty());
    }

    #[tokio::test]
    async fn test_failed_direct_execution_is_recorded() {
        let (_, client) = spy_client();
        let err = client
            .execute_directly("fail-now", &CommandOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(1));

        let history = client.get_history(None);
        assert_eq!(history.len(), 1);
        assert!(!history[0].result.success);
        assert_eq!(history[0].result.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_recorded_with_safe_defaults() {
        let client = CommandClient::new();
        let err = client
            .execute_directly("definitely-not-a-real-binary-xyz", &CommandOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));

        let entry = &client.get_history(None)[0];
        assert_eq!(entry.result.exit_code, None);
        assert_eq!(entry.result.stdout, "");
        assert!(!entry.result.success);
    }

    #[tokio::test]
    async fn test_builders_do_not_touch_history() {
        let (spy, client) = spy_client();
        client.command("echo hi").run().await.unwrap();
        client.parallel(["a", "b"]).run().await;
        assert_eq!(spy.calls(), 3);
        assert!(client.get_history(None).is_empty());
    }

    #[test]
    fn test_template_defaults_and_override() {
        let (_, client) = spy_client();
        client.register_template("greet", CommandTemplate::new("echo {{x}}").with_default("x", "default"));

        let builder = client.from_template("greet", &HashMap::new()).unwrap();
        assert_eq!(builder.command(), "echo default");

        let builder = client
            .from_template("greet", &params(&[("x", "override")]))
            .unwrap();
        assert_eq!(builder.command(), "echo override");
    }

    #[test]
    fn test_template_options_are_applied() {
        let (_, client) = spy_client();
        client.register_template(
            "list",
            CommandTemplate::new("ls")
                .in_directory("/tmp")
                .with_timeout(Duration::from_secs(3))
                .with_env("LC_ALL", "C"),
        );
        let builder = client.from_template("list", &HashMap::new()).unwrap();
        let options = builder.options();
        assert_eq!(options.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(options.timeout, Some(Duration::from_secs(3)));
        assert_eq!(options.env.get("LC_ALL").map(String::as_str), Some("C"));
    }

    #[test]
    fn test_template_errors() {
        let (_, client) = spy_client();
        let err = client.from_template("nope", &HashMap::new()).unwrap_err();
        assert!(matches!(err, CommandError::TemplateNotFound(ref name) if name == "nope"));
        assert!(err.is_configuration());

        let err = client.from_template("git-commit", &HashMap::new()).unwrap_err();
        assert!(matches!(err, CommandError::TemplateValidation { .. }));
    }

    #[test]
    fn test_builtin_templates_registered() {
        let (_, client) = spy_client();
        let names = client.template_names();
        for name in ["disk-usage", "docker-build", "git-commit", "git-status", "npm-install", "npm-run"] {
            assert!(names.iter().any(|n| n == name), "missing {}", name);
        }
    }

    #[tokio::test]
    async fn test_execute_many_modes() {
        let (spy, client) = spy_client();

        let output = client
            .execute_many(["a", "fail-b", "c"], "parallel", &CommandOptions::default())
            .await
            .unwrap();
        assert!(matches!(output, BatchOutput::Parallel(_)));
        assert_eq!(output.results().len(), 3);
        assert!(!output.all_successful());

        let output = client
            .execute_many(["a", "fail-b", "c"], "sequential", &CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(output.results().len(), 2);

        let options = CommandOptions {
            input: Some("seed".to_string()),
            ..CommandOptions::default()
        };
        let output = client
            .execute_many(["first", "second"], "pipe", &options)
            .await
            .unwrap();
        assert_eq!(output.results()[0].stdout, "seed");
        assert_eq!(output.results()[1].stdout, "seed");

        let before = spy.calls();
        let err = client
            .execute_many(["a"], "sideways", &CommandOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::UnknownMode(ref m) if m == "sideways"));
        assert_eq!(spy.calls(), before);
    }

    #[tokio::test]
    async fn test_kill_delegates_to_strategy() {
        let (spy, client) = spy_client();
        client.kill(Some(42));
        client.kill(None);
        assert_eq!(spy.kills(), vec![Some(42), None]);
    }

    #[test]
    fn test_from_config_applies_defaults_and_templates() {
        let config = ClientConfig {
            history_capacity: 2,
            default_timeout: Some(Duration::from_secs(7)),
            shell: None,
            max_buffer: Some(1024),
            templates: vec![(
                "git-status".to_string(),
                CommandTemplate::new("git status --short"),
            )],
        };
        let client = CommandClient::from_config(&config);

        let options = client.command("true").options().clone();
        assert_eq!(options.timeout, Some(Duration::from_secs(7)));
        assert_eq!(options.max_buffer, Some(1024));

        let (command, _) = client.expand_template("git-status", &HashMap::new()).unwrap();
        assert_eq!(command, "git status --short");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_and_get_output() {
        let client = CommandClient::new();
        let options = CommandOptions {
            shell: ShellMode::Default,
            ..CommandOptions::default()
        };
        let output = client.get_output("printf 'a b'", &options).await.unwrap();
        assert_eq!(output, "a b");

        let result = client.exec("true", &CommandOptions::default()).await.unwrap();
        assert!(result.success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_exists() {
        let client = CommandClient::new();
        assert!(client.command_exists("sh").await);
        assert!(!client.command_exists("definitely-not-a-real-binary-xyz").await);
        assert!(!client.command_exists("   ").await);
    }

    #[tokio::test]
    async fn test_command_exists_rejects_shell_syntax() {
        let client = CommandClient::new();
        assert!(!client.command_exists("definitely-not-a-real-binary-xyz || echo sh").await);
        assert!(!client.command_exists("sh; true").await);
        assert!(!client.command_exists("$(echo sh)").await);
        assert!(client.command_exists("/bin/sh").await);
    }
}
