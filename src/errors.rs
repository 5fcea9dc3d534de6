//! Typed error hierarchy for command execution.
//!
//! `CommandError` covers every way a command or a batch of commands can fail:
//! - process-level failures raised by the execution strategy (`Spawn`,
//!   `Execution`, `Timeout`, `Validation`)
//! - programmer errors (`UnknownMode`, `TemplateNotFound`, `TemplateValidation`,
//!   `MissingParser`, `ParserTypeMismatch`)
//! - orchestration outcomes raised by the builders (`RetryExhausted`,
//!   `StepFailed`, `TransactionRolledBack`, `NoSuccessfulCommand`)
//!
//! A skipped command is not an error; it resolves to a successful result
//! flagged with `metadata.skipped`.

use crate::command::CommandResult;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while executing commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{}' failed with exit code {}", .result.command, display_exit_code(.result.exit_code))]
    Execution { result: Box<CommandResult> },

    #[error("Command '{}' timed out after {}ms", .result.command, .timeout.as_millis())]
    Timeout {
        timeout: Duration,
        result: Box<CommandResult>,
    },

    #[error("Output validation failed for command '{}'", .result.command)]
    Validation { result: Box<CommandResult> },

    #[error("Unknown execution mode '{0}'. Valid values: parallel, sequential, pipe")]
    UnknownMode(String),

    #[error("Template '{0}' not found")]
    TemplateNotFound(String),

    #[error("Invalid parameters for template '{name}': {message}")]
    TemplateValidation { name: String, message: String },

    #[error("No output parser configured for command '{0}'")]
    MissingParser(String),

    #[error("Output parser for command '{0}' produces a different type than requested")]
    ParserTypeMismatch(String),

    #[error("Command '{command}' failed after {attempts} attempts: {source}")]
    RetryExhausted {
        command: String,
        attempts: u32,
        #[source]
        source: Box<CommandError>,
    },

    #[error("Step {step}/{total} failed: {command}")]
    StepFailed {
        step: usize,
        total: usize,
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Transaction rolled back: step {step} ('{command}') failed")]
    TransactionRolledBack {
        step: usize,
        command: String,
        results: Vec<CommandResult>,
    },

    #[error("None of the {total} commands succeeded")]
    NoSuccessfulCommand { total: usize },
}

fn display_exit_code(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl CommandError {
    /// The result attached to a process-level failure, if any.
    pub fn result(&self) -> Option<&CommandResult> {
        match self {
            CommandError::Execution { result }
            | CommandError::Timeout { result, .. }
            | CommandError::Validation { result } => Some(result),
            CommandError::RetryExhausted { source, .. } => source.result(),
            _ => None,
        }
    }

    /// The command string this error refers to, if it names one.
    pub fn command(&self) -> Option<&str> {
        match self {
            CommandError::Spawn { command, .. }
            | CommandError::RetryExhausted { command, .. }
            | CommandError::StepFailed { command, .. }
            | CommandError::TransactionRolledBack { command, .. }
            | CommandError::MissingParser(command)
            | CommandError::ParserTypeMismatch(command) => Some(command),
            _ => self.result().map(|r| r.command.as_str()),
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::StepFailed { exit_code, .. } => *exit_code,
            _ => self.result().and_then(|r| r.exit_code),
        }
    }

    pub fn stdout(&self) -> &str {
        self.result().map(|r| r.stdout.as_str()).unwrap_or("")
    }

    pub fn stderr(&self) -> &str {
        match self {
            CommandError::StepFailed { stderr, .. } => stderr,
            _ => self.result().map(|r| r.stderr.as_str()).unwrap_or(""),
        }
    }

    /// Whether this error was raised by the timeout path.
    pub fn is_timeout(&self) -> bool {
        match self {
            CommandError::Timeout { .. } => true,
            CommandError::RetryExhausted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Whether this is a programmer error rather than a runtime failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CommandError::UnknownMode(_)
                | CommandError::TemplateNotFound(_)
                | CommandError::TemplateValidation { .. }
                | CommandError::MissingParser(_)
                | CommandError::ParserTypeMismatch(_)
        )
    }
}
