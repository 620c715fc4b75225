//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                              |
//! |-----------|-----------------------------------------------|
//! | `init`    | `Init`                                        |
//! | `tasks`   | `Add`, `List`, `Show`, `Retry`, `Stats`       |
//! | `run`     | `Worker`, `Serve`                             |
//! | `config`  | `Config`                                      |
//! | `review`  | `Review`                                      |

pub mod config;
pub mod init;
pub mod review;
pub mod run;
pub mod tasks;

use std::sync::Arc;

use anyhow::{Context, Result};

use taskforge::capability::{ClaudeCliGenerator, GitHubClient};
use taskforge::config::TaskforgeConfig;
use taskforge::engine::Orchestrator;
use taskforge::queue::{QueueHandle, QueueStore};

pub use config::cmd_config;
pub use init::cmd_init;
pub use review::cmd_review;
pub use run::{cmd_serve, cmd_worker};
pub use tasks::{AddArgs, cmd_add, cmd_list, cmd_retry, cmd_show, cmd_stats};

/// Open the configured queue file, creating it when missing.
pub fn open_queue(config: &TaskforgeConfig) -> Result<QueueHandle> {
    let path = config.queue_file();
    let store = QueueStore::open(&path)
        .with_context(|| format!("Failed to open queue at {}", path.display()))?;
    Ok(QueueHandle::new(store))
}

/// GitHub client from config and environment.
pub fn github_client(config: &TaskforgeConfig) -> Result<GitHubClient> {
    let repository = config.github_repository().context(
        "GitHub repository not configured; set [github] repository in .taskforge/taskforge.toml or GITHUB_REPOSITORY",
    )?;
    if config.github_token().is_none() {
        tracing::warn!("GITHUB_TOKEN is not set; write operations will be rejected");
    }
    Ok(GitHubClient::new(
        &config.github_api_url(),
        &repository,
        config.github_token(),
    )?)
}

/// Orchestrator wired to the Claude CLI generator and GitHub.
pub fn build_orchestrator(config: &TaskforgeConfig) -> Result<Orchestrator> {
    let generator = ClaudeCliGenerator::new(&config.claude_cmd(), &config.project_dir)
        .with_model(config.model())
        .with_timeout(config.generator_timeout());
    let vcs = github_client(config)?;
    Ok(Orchestrator::new(
        Arc::new(generator),
        Arc::new(vcs),
        &config.workspace_dir(),
    ))
}
