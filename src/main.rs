use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskforge::config::TaskforgeConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "taskforge")]
#[command(version, about = "Task queue and code generation orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .taskforge/ with a default config and an empty queue
    Init,
    /// Enqueue a task
    Add {
        /// What to build
        description: String,

        /// Don't open a pull request
        #[arg(long)]
        no_pr: bool,

        #[arg(long, default_value = "main")]
        base_branch: String,

        /// Work on this branch instead of feature/<task-id>
        #[arg(long)]
        branch_name: Option<String>,

        /// Extra requirements passed to the generator
        #[arg(long)]
        requirements: Option<String>,

        /// Skip planning and run a single step
        #[arg(long)]
        no_plan: bool,

        /// Files to include as generation context (repeatable)
        #[arg(long = "existing-file")]
        existing_files: Vec<PathBuf>,
    },
    /// List queued tasks
    List {
        /// pending, processing, completed or failed
        #[arg(short, long)]
        status: Option<String>,

        #[arg(long)]
        json: bool,
    },
    /// Show one task
    Show { id: String },
    /// Move a failed task back to pending
    Retry { id: String },
    /// Queue partition counts
    Stats,
    /// Process queued tasks until interrupted
    Worker {
        /// Process at most one task and exit
        #[arg(long)]
        once: bool,
    },
    /// Serve the admin API (and run the worker alongside it)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        no_worker: bool,

        /// Bind 0.0.0.0 and allow any origin
        #[arg(long)]
        dev: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Inspect or merge pull requests
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Create a default taskforge.toml
    Init,
    /// Validate the configuration
    Validate,
}

#[derive(Subcommand)]
pub enum ReviewCommands {
    /// List comments on a pull request
    Comments {
        number: u64,
        #[arg(long)]
        json: bool,
    },
    /// Merge a pull request
    Merge {
        number: u64,
        /// merge, squash or rebase
        #[arg(long, default_value = "merge")]
        method: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = TaskforgeConfig::with_cli_args(project_dir, cli.verbose, cli.log_json)?;
    let log_dir = config.toml.logging.file.then(|| config.log_dir());
    let _guard = taskforge::logging::init(config.verbose, config.log_json, log_dir.as_deref());

    match cli.command {
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::Add {
            description,
            no_pr,
            base_branch,
            branch_name,
            requirements,
            no_plan,
            existing_files,
        } => {
            let args = cmd::AddArgs {
                description,
                no_pr,
                base_branch,
                branch_name,
                requirements,
                no_plan,
                existing_files,
            };
            cmd::cmd_add(&config, args).await?;
        }
        Commands::List { status, json } => cmd::cmd_list(&config, status.as_deref(), json).await?,
        Commands::Show { id } => cmd::cmd_show(&config, id).await?,
        Commands::Retry { id } => cmd::cmd_retry(&config, id).await?,
        Commands::Stats => cmd::cmd_stats(&config).await?,
        Commands::Worker { once } => cmd::cmd_worker(&config, once).await?,
        Commands::Serve {
            port,
            no_worker,
            dev,
        } => cmd::cmd_serve(&config, port, !no_worker, dev).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command)?,
        Commands::Review { command } => cmd::cmd_review(&config, command).await?,
    }

    Ok(())
}
