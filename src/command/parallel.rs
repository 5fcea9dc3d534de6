//! Concurrent execution of a list of commands under one options draft.
//!
//! Every command starts at once; results come back index-aligned with the
//! input regardless of completion order.

use super::builder::ConfigureCommand;
use super::strategy::ExecutionStrategy;
use super::types::{CommandOptions, CommandResult, ParallelResult};
use crate::errors::CommandError;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Instant;

/// Builder for a batch of concurrently running commands.
pub struct ParallelBuilder {
    commands: Vec<String>,
    options: CommandOptions,
    strategy: Arc<dyn ExecutionStrategy>,
}

impl ConfigureCommand for ParallelBuilder {
    fn options_mut(&mut self) -> &mut CommandOptions {
        &mut self.options
    }
}

impl ParallelBuilder {
    pub fn new<S: Into<String>>(
        commands: impl IntoIterator<Item = S>,
        strategy: Arc<dyn ExecutionStrategy>,
    ) -> Self {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            options: CommandOptions::default(),
            strategy,
        }
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Run every command and wait for all of them.
    ///
    /// Never fails as a whole: per-command errors become failing results.
    /// `on_start` fires once for the batch, `on_complete` once per result.
    pub async fn run(&self) -> ParallelResult {
        if !self.options.should_run().await {
            tracing::debug!("Condition not met, skipping parallel batch");
            return ParallelResult::empty();
        }

        let started = Instant::now();
        self.options.callbacks.start(None);

        let options = self.per_command_options();
        let results: Vec<CommandResult> = futures::future::join_all(
            self.commands
                .iter()
                .map(|command| self.execute_one(command, &options)),
        )
        .await;

        for result in &results {
            self.options.callbacks.complete(result);
        }

        let outcome = ParallelResult::from_results(results, started.elapsed());
        tracing::debug!(
            total = self.commands.len(),
            failed = outcome.failed_commands.len(),
            duration_ms = outcome.duration.as_millis() as u64,
            "Parallel batch finished"
        );
        outcome
    }

    /// Run the whole batch, then pick the first successful result in input
    /// order. All commands are spawned and awaited; nothing is cancelled.
    pub async fn run_until_success(&self) -> Result<CommandResult, CommandError> {
        let outcome = self.run().await;
        let total = outcome.results.len();
        outcome
            .results
            .into_iter()
            .find(|r| r.success)
            .ok_or(CommandError::NoSuccessfulCommand { total })
    }

    /// Run the batch but stop collecting at the first failing result.
    ///
    /// The remaining executions are not killed. They settle in a background
    /// task, staying in the strategy's live set so `kill` still reaches them.
    /// Results are the ones settled by then, in input order.
    pub async fn run_with_fail_fast(&self) -> ParallelResult {
        if !self.options.should_run().await {
            tracing::debug!("Condition not met, skipping parallel batch");
            return ParallelResult::empty();
        }

        let started = Instant::now();
        self.options.callbacks.start(None);

        let options = self.per_command_options();
        let mut pending: FuturesUnordered<BoxFuture<'static, (usize, CommandResult)>> = self
            .commands
            .iter()
            .enumerate()
            .map(|(index, command)| {
                let strategy = Arc::clone(&self.strategy);
                let command = command.clone();
                let options = options.clone();
                async move { (index, settle(strategy.as_ref(), &command, &options).await) }.boxed()
            })
            .collect();

        let mut settled: Vec<(usize, CommandResult)> = Vec::with_capacity(self.commands.len());
        while let Some((index, result)) = pending.next().await {
            self.options.callbacks.complete(&result);
            let failed = !result.success;
            settled.push((index, result));
            if failed {
                tracing::debug!(
                    command = %self.commands[index],
                    untracked = pending.len(),
                    "Fail-fast: stopped tracking remaining commands"
                );
                break;
            }
        }
        if !pending.is_empty() {
            tokio::spawn(async move { while pending.next().await.is_some() {} });
        }

        settled.sort_by_key(|(index, _)| *index);
        let results = settled.into_iter().map(|(_, result)| result).collect();
        ParallelResult::from_results(results, started.elapsed())
    }

    /// Batch-level lifecycle callbacks are fired here, not per process.
    fn per_command_options(&self) -> CommandOptions {
        let mut options = self.options.clone();
        options.callbacks.on_start = None;
        options.callbacks.on_complete = None;
        options.input = None;
        options
    }

    async fn execute_one(&self, command: &str, options: &CommandOptions) -> CommandResult {
        settle(self.strategy.as_ref(), command, options).await
    }
}

async fn settle(
    strategy: &dyn ExecutionStrategy,
    command: &str,
    options: &CommandOptions,
) -> CommandResult {
    match strategy.execute(command, options).await {
        Ok(result) => result,
        Err(err) => CommandResult::from_error(command, &err),
    }
}
