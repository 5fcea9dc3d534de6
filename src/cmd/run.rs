//! Single command execution: `procflow run` and `procflow exists`.

use super::output;
use anyhow::Result;
use console::style;
use procflow::command::{CommandClient, ConfigureCommand, OutputStream, RetryOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[allow(clippy::too_many_arguments)]
pub async fn cmd_run(
    client: &CommandClient,
    command: &str,
    cwd: Option<PathBuf>,
    timeout_secs: Option<u64>,
    shell: bool,
    retry: Option<u32>,
    retry_delay_ms: u64,
    stream: bool,
) -> Result<i32> {
    let mut builder = client.command(command).with_shell(shell);
    if let Some(cwd) = cwd {
        builder = builder.in_directory(cwd);
    }
    if let Some(secs) = timeout_secs {
        builder = builder.with_timeout(Duration::from_secs(secs));
    }
    if let Some(attempts) = retry {
        builder = builder.with_retry(
            RetryOptions::new(attempts).with_delay(Duration::from_millis(retry_delay_ms)),
        );
    }
    if stream {
        builder = builder.stream_output(|chunk: &str, stream: OutputStream| match stream {
            OutputStream::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(chunk.as_bytes());
                let _ = out.flush();
            }
            OutputStream::Stderr => {
                let mut err = std::io::stderr().lock();
                let _ = err.write_all(chunk.as_bytes());
                let _ = err.flush();
            }
        });
    }

    Ok(output::report(builder.run().await, stream))
}

pub async fn cmd_exists(client: &CommandClient, command: &str) -> Result<i32> {
    if client.command_exists(command).await {
        eprintln!("{}{} is available", output::CHECK, style(command).green());
        Ok(0)
    } else {
        eprintln!("{}{} not found", output::CROSS, style(command).red());
        Ok(1)
    }
}
