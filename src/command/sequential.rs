//! Sequential execution of a list of commands under one options draft.
//!
//! Commands run strictly one after another: command N+1 never starts before
//! command N has settled. With `pipe_output`, each command after the first
//! receives the previous command's stdout on stdin.

use super::builder::ConfigureCommand;
use super::strategy::ExecutionStrategy;
use super::types::{CommandOptions, CommandResult, ProgressInfo};
use crate::errors::CommandError;
use std::sync::Arc;

/// Builder for an ordered list of commands.
pub struct SequentialBuilder {
    commands: Vec<String>,
    options: CommandOptions,
    strategy: Arc<dyn ExecutionStrategy>,
    stop_on_error: bool,
    pipe: bool,
    rollback: Vec<String>,
}

impl ConfigureCommand for SequentialBuilder {
    fn options_mut(&mut self) -> &mut CommandOptions {
        &mut self.options
    }
}

impl SequentialBuilder {
    pub fn new<S: Into<String>>(
        commands: impl IntoIterator<Item = S>,
        strategy: Arc<dyn ExecutionStrategy>,
    ) -> Self {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            options: CommandOptions::default(),
            strategy,
            stop_on_error: true,
            pipe: false,
            rollback: Vec::new(),
        }
    }

    /// Keep going after a failing command instead of stopping.
    pub fn continue_on_error(mut self) -> Self {
        self.stop_on_error = false;
        self
    }

    /// Feed each command's stdout into the next command's stdin.
    pub fn pipe_output(mut self) -> Self {
        self.pipe = true;
        self
    }

    /// Commands run, in order, when a transaction fails.
    pub fn with_rollback<S: Into<String>>(mut self, commands: impl IntoIterator<Item = S>) -> Self {
        self.rollback = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn is_piped(&self) -> bool {
        self.pipe
    }

    pub fn stops_on_error(&self) -> bool {
        self.stop_on_error
    }

    /// Run every command in order.
    ///
    /// Returns the results produced so far: shorter than the command list
    /// when a failure stopped the run, empty when the `only_if` condition
    /// blocked it.
    pub async fn run(&self) -> Vec<CommandResult> {
        self.run_steps(self.stop_on_error).await
    }

    /// Run with stop-on-first-failure forced on, whatever `continue_on_error`
    /// says; on failure the rollback commands run and the transaction errors.
    pub async fn run_as_transaction(&self) -> Result<Vec<CommandResult>, CommandError> {
        let results = self.run_steps(true).await;

        let Some(step) = results.iter().position(|r| !r.success) else {
            return Ok(results);
        };

        let command = results[step].command.clone();
        tracing::warn!(step = step + 1, command = %command, "Transaction step failed, rolling back");
        self.roll_back().await;

        Err(CommandError::TransactionRolledBack {
            step: step + 1,
            command,
            results,
        })
    }

    async fn run_steps(&self, stop_on_error: bool) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(self.commands.len());
        if !self.options.should_run().await {
            tracing::debug!("Condition not met, skipping sequence");
            return results;
        }

        let total = self.commands.len();
        // Step errors and step progress replace the per-process ones.
        let mut step_options = self.options.clone();
        step_options.callbacks.on_error = None;
        step_options.callbacks.on_progress = None;

        for (index, command) in self.commands.iter().enumerate() {
            if self.pipe && index > 0 {
                step_options.input = results
                    .last()
                    .map(|previous: &CommandResult| previous.stdout.clone());
            }

            let result = match self.strategy.execute(command, &step_options).await {
                Ok(result) => result,
                Err(err) => CommandResult::from_error(command, &err),
            };

            self.options.callbacks.progress(&ProgressInfo {
                percentage: ((index + 1) * 100 / total) as u8,
                message: format!("Completed {}/{}: {}", index + 1, total, command),
            });

            let failed = !result.success;
            let exit_code = result.exit_code;
            let stderr = result.stderr.clone();
            results.push(result);

            if failed && stop_on_error {
                let err = CommandError::StepFailed {
                    step: index + 1,
                    total,
                    command: command.clone(),
                    exit_code,
                    stderr,
                };
                tracing::debug!(error = %err, "Stopping sequence");
                self.options.callbacks.error(&err);
                break;
            }
        }

        results
    }

    async fn roll_back(&self) {
        let mut options = self.options.clone();
        options.callbacks = Default::default();
        options.input = None;

        for command in &self.rollback {
            if let Err(e) = self.strategy.execute(command, &options).await {
                tracing::warn!(command = %command, error = %e, "Rollback command failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::strategy::ProcessStrategy;
    use crate::command::testing::CountingStrategy;
    use std::sync::Mutex;

    fn process() -> Arc<dyn ExecutionStrategy> {
        Arc::new(ProcessStrategy::new())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stops_on_first_failure() {
        let results = SequentialBuilder::new(["echo a", "exit 1", "echo c"], process())
            .with_shell(true)
            .run()
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[0].stdout, "a");
        assert!(!results[1].success);
        assert_eq!(results[1].exit_code, Some(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_continue_on_error_runs_everything() {
        let results = SequentialBuilder::new(["echo a", "exit 1", "echo c"], process())
            .with_shell(true)
            .continue_on_error()
            .run()
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].stdout, "c");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_output_feeds_stdin() {
        let results = SequentialBuilder::new(["echo hello world", "tr a-z A-Z", "wc -w"], process())
            .pipe_output()
            .run()
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].stdout, "HELLO WORLD");
        assert_eq!(results[2].stdout, "2");
    }

    #[tokio::test]
    async fn test_spawn_failure_becomes_failed_step() {
        let results = SequentialBuilder::new(["definitely-not-a-real-binary-xyz", "echo b"], process())
            .continue_on_error()
            .run()
            .await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert_eq!(results[0].exit_code, None);
        assert!(results[1].success);
    }

    #[tokio::test]
    async fn test_progress_and_step_error_callbacks() {
        let spy = Arc::new(CountingStrategy::default());
        let progress = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&progress);
        let error_sink = Arc::clone(&errors);
        let results = SequentialBuilder::new(["build", "fail-tests", "deploy"], spy.clone())
            .on_progress(move |info| sink.lock().unwrap().push(info.clone()))
            .on_error(move |err| error_sink.lock().unwrap().push(err.to_string()))
            .run()
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(spy.commands(), vec!["build", "fail-tests"]);

        let progress = progress.lock().unwrap();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].percentage, 33);
        assert_eq!(progress[0].message, "Completed 1/3: build");
        assert_eq!(progress[1].percentage, 66);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Step 2/3"));
        assert!(errors[0].contains("fail-tests"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_reports_steps_not_output() {
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&progress);
        let results = SequentialBuilder::new(["echo 50%", "echo 10%", "true"], process())
            .with_shell(true)
            .on_progress(move |info| sink.lock().unwrap().push(info.percentage))
            .run()
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(*progress.lock().unwrap(), vec![33, 66, 100]);
    }

    #[tokio::test]
    async fn test_condition_blocks_whole_sequence() {
        let spy = Arc::new(CountingStrategy::default());
        let results = SequentialBuilder::new(["a", "b"], spy.clone())
            .only_if(|| false)
            .run()
            .await;
        assert!(results.is_empty());
        assert_eq!(spy.calls(), 0);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_and_keeps_policy() {
        let spy = Arc::new(CountingStrategy::default());
        let builder = SequentialBuilder::new(["migrate", "fail-seed", "restart"], spy.clone())
            .continue_on_error()
            .with_rollback(["undo-migrate"]);

        let err = builder.run_as_transaction().await.unwrap_err();
        match &err {
            CommandError::TransactionRolledBack { step, command, results } => {
                assert_eq!(*step, 2);
                assert_eq!(command, "fail-seed");
                assert_eq!(results.len(), 2);
            }
            other => panic!("Expected TransactionRolledBack, got {:?}", other),
        }
        assert_eq!(spy.commands(), vec!["migrate", "fail-seed", "undo-migrate"]);

        // The builder's own continue-on-error setting is untouched.
        assert!(!builder.stops_on_error());
        let results = builder.run().await;
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_transaction_success() {
        let spy = Arc::new(CountingStrategy::default());
        let results = SequentialBuilder::new(["a", "b"], spy.clone())
            .run_as_transaction()
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
    }
}
