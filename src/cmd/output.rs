//! Terminal rendering of command results.
//!
//! Command output goes to stdout/stderr unchanged; status lines go to stderr
//! so piping `procflow run` behaves like piping the command itself.

use console::{Emoji, style};
use procflow::command::CommandResult;
use procflow::errors::CommandError;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR] ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP] ");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T] ");

/// Write captured stdout/stderr of a result.
pub fn print_output(result: &CommandResult) {
    if !result.stdout.is_empty() {
        println!("{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        eprintln!("{}", result.stderr);
    }
}

/// One status line: icon, command, exit code and duration.
pub fn print_status(result: &CommandResult) {
    let icon = if result.is_skipped() {
        &SKIP
    } else if result.timed_out {
        &CLOCK
    } else if result.success {
        &CHECK
    } else {
        &CROSS
    };

    let exit = match (result.exit_code, &result.signal) {
        (Some(code), _) => format!("exit {}", code),
        (None, Some(signal)) => signal.clone(),
        (None, None) => "no exit code".to_string(),
    };

    let command = if result.success {
        style(&result.command).green()
    } else {
        style(&result.command).red()
    };

    eprintln!(
        "{}{} {}",
        icon,
        command,
        style(format!("({}, {}ms)", exit, result.duration.as_millis())).dim()
    );
}

pub fn print_error(err: &CommandError) {
    eprintln!("{}{}", CROSS, style(err).red().bold());
}

/// Exit code mirroring a failed command; 1 when it has none of its own.
pub fn failure_code(exit_code: Option<i32>) -> i32 {
    exit_code.filter(|code| *code != 0).unwrap_or(1)
}

/// Print the outcome of a single command and return the exit code to use.
///
/// `streamed` output was already printed as it arrived.
pub fn report(outcome: Result<CommandResult, CommandError>, streamed: bool) -> i32 {
    match outcome {
        Ok(result) => {
            if !streamed {
                print_output(&result);
            }
            print_status(&result);
            0
        }
        Err(err) => {
            if let Some(result) = err.result() {
                if !streamed {
                    print_output(result);
                }
                print_status(result);
            }
            print_error(&err);
            failure_code(err.exit_code())
        }
    }
}
