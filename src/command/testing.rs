//! Test doubles for the execution strategy.

use super::strategy::ExecutionStrategy;
use super::types::{CommandOptions, CommandResult};
use crate::errors::CommandError;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Records every command it is asked to run without spawning anything.
///
/// Commands starting with `fail` exit 1; everything else succeeds and echoes
/// the command string (or the piped input, when present) back as stdout.
#[derive(Default)]
pub(crate) struct CountingStrategy {
    calls: AtomicUsize,
    commands: Mutex<Vec<String>>,
    kills: Mutex<Vec<Option<u32>>>,
}

impl CountingStrategy {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn kills(&self) -> Vec<Option<u32>> {
        self.kills.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionStrategy for CountingStrategy {
    async fn execute(
        &self,
        command: &str,
        options: &CommandOptions,
    ) -> Result<CommandResult, CommandError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().unwrap().push(command.to_string());
        options.callbacks.start(None);

        let stdout = options.input.clone().unwrap_or_else(|| command.to_string());
        let exit_code = if command.starts_with("fail") { 1 } else { 0 };
        let result = CommandResult::new(command, Some(exit_code), stdout, "", Duration::ZERO);
        options.callbacks.complete(&result);

        if result.success {
            Ok(result)
        } else {
            let err = CommandError::Execution {
                result: Box::new(result),
            };
            options.callbacks.error(&err);
            Err(err)
        }
    }

    fn kill(&self, pid: Option<u32>) {
        self.kills.lock().unwrap().push(pid);
    }
}
