//! `taskforge init`: create the per-project state directory.
//!
//! ```text
//! .taskforge/
//! ├── taskforge.toml   # configuration (defaults written on first init)
//! ├── queue.json       # durable task queue
//! ├── workspace/       # generated files, one directory per branch
//! ├── logs/            # daily-rolling logs when [logging] file = true
//! └── .gitignore       # keeps runtime state out of version control
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::config::{TaskforgeConfig, TaskforgeToml};
use crate::queue::QueueStore;

const GITIGNORE: &str = "queue.json\nqueue.json.lock\nworkspace/\nlogs/\n";

#[derive(Debug)]
pub struct InitResult {
    pub state_dir: PathBuf,
    /// False when `.taskforge/` already existed.
    pub created: bool,
    /// Whether a default `taskforge.toml` was written.
    pub wrote_config: bool,
}

/// Create (or complete) the state directory for `config.project_dir`.
///
/// Existing files are never overwritten.
pub fn init_project(config: &TaskforgeConfig) -> Result<InitResult> {
    let state_dir = config.state_dir.clone();
    let created = !state_dir.exists();

    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create directory: {}", state_dir.display()))?;

    let config_file = config.config_file();
    let wrote_config = !config_file.exists();
    if wrote_config {
        TaskforgeToml::default().save(&config_file)?;
    }

    let workspace = config.workspace_dir();
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create workspace: {}", workspace.display()))?;

    QueueStore::open(&config.queue_file()).context("Failed to create queue file")?;

    let gitignore = state_dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, GITIGNORE)
            .with_context(|| format!("Failed to write {}", gitignore.display()))?;
    }

    tracing::debug!(dir = %state_dir.display(), created, "Initialized state directory");
    Ok(InitResult {
        state_dir,
        created,
        wrote_config,
    })
}

pub fn is_initialized(config: &TaskforgeConfig) -> bool {
    config.state_dir.exists()
}
