use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use procflow::command::CommandClient;
use procflow::config::ProcflowToml;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cmd;

#[derive(Parser)]
#[command(name = "procflow")]
#[command(version, about = "Run, sequence and parallelize shell commands")]
pub struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding .procflow/procflow.toml (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single command
    Run {
        command: String,
        /// Working directory for the command
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Kill the command after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Run through the shell instead of tokenizing
        #[arg(long)]
        shell: bool,
        /// Attempt the command up to this many times
        #[arg(long)]
        retry: Option<u32>,
        /// Delay between attempts in milliseconds
        #[arg(long, default_value = "1000")]
        retry_delay: u64,
        /// Print output as it arrives
        #[arg(long)]
        stream: bool,
    },
    /// Run commands concurrently
    Parallel {
        #[arg(required = true)]
        commands: Vec<String>,
        /// Stop collecting results at the first failure
        #[arg(long)]
        fail_fast: bool,
        #[arg(long)]
        shell: bool,
    },
    /// Run commands one after another
    Sequence {
        #[arg(required = true)]
        commands: Vec<String>,
        /// Feed each command's stdout into the next command's stdin
        #[arg(long)]
        pipe: bool,
        /// Keep going after a failing command
        #[arg(long, conflicts_with = "transaction")]
        continue_on_error: bool,
        /// Stop at the first failure and run the rollback commands
        #[arg(long)]
        transaction: bool,
        /// Command run when a transaction fails (repeatable)
        #[arg(long = "rollback", requires = "transaction")]
        rollback: Vec<String>,
        #[arg(long)]
        shell: bool,
    },
    /// Expand and run a named template
    Template {
        name: String,
        /// Template parameters as key=value
        params: Vec<String>,
        /// Print the expanded command without running it
        #[arg(long)]
        dry_run: bool,
    },
    /// List registered templates
    Templates,
    /// Check whether a command is available (exit status 0 when found)
    Exists { command: String },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "procflow=debug"
    } else {
        "procflow=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = ProcflowToml::load_or_default(&project_dir)?.resolve();
    let client = CommandClient::from_config(&config);

    let code = match cli.command {
        Commands::Run {
            command,
            cwd,
            timeout,
            shell,
            retry,
            retry_delay,
            stream,
        } => {
            cmd::cmd_run(
                &client,
                &command,
                cwd,
                timeout,
                shell,
                retry,
                retry_delay,
                stream,
            )
            .await?
        }
        Commands::Parallel {
            commands,
            fail_fast,
            shell,
        } => cmd::cmd_parallel(&client, commands, fail_fast, shell).await?,
        Commands::Sequence {
            commands,
            pipe,
            continue_on_error,
            transaction,
            rollback,
            shell,
        } => {
            cmd::cmd_sequence(
                &client,
                commands,
                pipe,
                continue_on_error,
                transaction,
                rollback,
                shell,
            )
            .await?
        }
        Commands::Template {
            name,
            params,
            dry_run,
        } => cmd::cmd_template(&client, &name, &params, dry_run).await?,
        Commands::Templates => cmd::cmd_templates(&client)?,
        Commands::Exists { command } => cmd::cmd_exists(&client, &command).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
