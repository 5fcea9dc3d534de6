//! Multi-command execution: `procflow parallel` and `procflow sequence`.

use super::output;
use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use procflow::command::{CommandClient, CommandResult, ConfigureCommand, ProgressInfo};
use procflow::errors::CommandError;

pub async fn cmd_parallel(
    client: &CommandClient,
    commands: Vec<String>,
    fail_fast: bool,
    shell: bool,
) -> Result<i32> {
    let total = commands.len();
    let builder = client.parallel(commands).with_shell(shell);
    let outcome = if fail_fast {
        builder.run_with_fail_fast().await
    } else {
        builder.run().await
    };

    for result in &outcome.results {
        print_labelled(result);
    }

    let succeeded = outcome.results.iter().filter(|r| r.success).count();
    eprintln!(
        "{} {}/{} succeeded in {}ms",
        style("parallel:").bold(),
        succeeded,
        total,
        outcome.duration.as_millis()
    );

    if outcome.all_successful && outcome.results.len() == total {
        Ok(0)
    } else {
        Ok(1)
    }
}

pub async fn cmd_sequence(
    client: &CommandClient,
    commands: Vec<String>,
    pipe: bool,
    continue_on_error: bool,
    transaction: bool,
    rollback: Vec<String>,
    shell: bool,
) -> Result<i32> {
    let total = commands.len();

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░"),
    );
    bar.set_prefix("Sequence");

    let progress_bar = bar.clone();
    let mut builder = client
        .sequence(commands)
        .with_shell(shell)
        .with_rollback(rollback)
        .on_progress(move |info: &ProgressInfo| {
            progress_bar.set_position(u64::from(info.percentage));
            progress_bar.set_message(info.message.clone());
        });
    if pipe {
        builder = builder.pipe_output();
    }
    if continue_on_error {
        builder = builder.continue_on_error();
    }

    let (results, error) = if transaction {
        match builder.run_as_transaction().await {
            Ok(results) => (results, None),
            Err(CommandError::TransactionRolledBack {
                step,
                command,
                results,
            }) => (
                results,
                Some(CommandError::TransactionRolledBack {
                    step,
                    command,
                    results: Vec::new(),
                }),
            ),
            Err(other) => (Vec::new(), Some(other)),
        }
    } else {
        (builder.run().await, None)
    };
    bar.finish_and_clear();

    for result in &results {
        if pipe {
            output::print_status(result);
        } else {
            print_labelled(result);
        }
    }
    // Only the final stage's output is meaningful for a pipe.
    if pipe {
        if let Some(last) = results.last() {
            output::print_output(last);
        }
    }
    if let Some(err) = &error {
        output::print_error(err);
    }

    let failed = results.iter().find(|r| !r.success);
    match failed {
        Some(result) => Ok(output::failure_code(result.exit_code)),
        None if error.is_some() || results.len() < total => Ok(1),
        None => Ok(0),
    }
}

fn print_labelled(result: &CommandResult) {
    output::print_status(result);
    for line in result.stdout.lines() {
        println!("{} {}", style(format!("[{}]", result.command)).dim(), line);
    }
    for line in result.stderr.lines() {
        eprintln!("{} {}", style(format!("[{}]", result.command)).dim(), line);
    }
}
