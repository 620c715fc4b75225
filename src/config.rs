//! Project configuration read from `.taskforge/taskforge.toml`.
//!
//! Settings are layered: the TOML file, then environment variables, then
//! CLI flags. Every section is optional and falls back to defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [queue]
//! path = ".taskforge/queue.json"
//!
//! [worker]
//! poll_interval_secs = 5
//! shutdown_grace_secs = 30
//!
//! [workspace]
//! dir = ".taskforge/workspace"
//!
//! [generator]
//! claude_cmd = "claude"
//! timeout_secs = 600
//! model = "claude-sonnet-4"
//!
//! [github]
//! repository = "owner/repo"
//! api_url = "https://api.github.com"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//!
//! [logging]
//! json = false
//! file = false
//! ```
//!
//! `CLAUDE_CMD`, `GITHUB_REPOSITORY` and `GITHUB_API_URL` override the file.
//! The GitHub token is only ever read from `GITHUB_TOKEN`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::github::DEFAULT_API_URL;

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".taskforge";
/// Name of the config file inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "taskforge.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Queue document path, relative to the project directory.
    pub path: String,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            path: format!("{}/queue.json", STATE_DIR),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub poll_interval_secs: u64,
    /// How long an in-flight task may run after shutdown is requested.
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSection {
    pub dir: String,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            dir: format!("{}/workspace", STATE_DIR),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    pub claude_cmd: Option<String>,
    pub timeout_secs: u64,
    pub model: Option<String>,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            claude_cmd: None,
            timeout_secs: 600,
            model: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSection {
    /// `owner/repo`
    pub repository: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub json: bool,
    /// Also write daily-rolling log files under `.taskforge/logs`.
    pub file: bool,
}

/// Contents of `taskforge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskforgeToml {
    pub queue: QueueSection,
    pub worker: WorkerSection,
    pub workspace: WorkspaceSection,
    pub generator: GeneratorSection,
    pub github: GitHubSection,
    pub server: ServerSection,
    pub logging: LoggingSection,
}

impl TaskforgeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskforge.toml")
    }

    /// Load `<state_dir>/taskforge.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize taskforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Claude command (env `CLAUDE_CMD` → file → "claude").
    pub fn claude_cmd(&self, env: impl Fn(&str) -> Option<String>) -> String {
        non_empty(env("CLAUDE_CMD"))
            .or_else(|| non_empty(self.generator.claude_cmd.clone()))
            .unwrap_or_else(|| "claude".to_string())
    }

    /// Repository slug (env `GITHUB_REPOSITORY` → file).
    pub fn github_repository(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        non_empty(env("GITHUB_REPOSITORY")).or_else(|| non_empty(self.github.repository.clone()))
    }

    /// API base URL (env `GITHUB_API_URL` → file → public GitHub).
    pub fn github_api_url(&self, env: impl Fn(&str) -> Option<String>) -> String {
        non_empty(env("GITHUB_API_URL"))
            .or_else(|| non_empty(self.github.api_url.clone()))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.worker.poll_interval_secs == 0 {
            warnings.push("worker.poll_interval_secs is 0; the worker will busy-poll".to_string());
        }
        if self.generator.timeout_secs == 0 {
            warnings.push("generator.timeout_secs is 0; every generation will time out".to_string());
        }
        if self.queue.path.trim().is_empty() {
            warnings.push("queue.path is empty".to_string());
        }
        if self.workspace.dir.trim().is_empty() {
            warnings.push("workspace.dir is empty".to_string());
        }
        match self.github.repository.as_deref().map(str::trim) {
            None | Some("") => warnings.push(
                "github.repository is not set; set it here or via GITHUB_REPOSITORY".to_string(),
            ),
            Some(repo) if !is_valid_repository(repo) => warnings.push(format!(
                "Invalid github.repository '{}': expected 'owner/repo'",
                repo
            )),
            Some(_) => {}
        }
        if let Some(url) = self.github.api_url.as_deref()
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            warnings.push(format!("Invalid github.api_url '{}': expected an http(s) URL", url));
        }

        warnings
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn is_valid_repository(repo: &str) -> bool {
    let mut parts = repo.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
    )
}

/// Process environment lookup used outside of tests.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Resolved configuration for one project directory.
#[derive(Debug, Clone)]
pub struct TaskforgeConfig {
    pub project_dir: PathBuf,
    /// `<project_dir>/.taskforge`
    pub state_dir: PathBuf,
    pub toml: TaskforgeToml,
    /// CLI override: debug-level logging
    pub verbose: bool,
    /// CLI override: JSON log output
    pub log_json: bool,
}

impl TaskforgeConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let state_dir = project_dir.join(STATE_DIR);
        let toml = TaskforgeToml::load_or_default(&state_dir)?;

        Ok(Self {
            project_dir,
            state_dir,
            toml,
            verbose: false,
            log_json: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool, log_json: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.log_json = log_json || config.toml.logging.json;
        Ok(config)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }

    pub fn queue_file(&self) -> PathBuf {
        self.resolve(&self.toml.queue.path)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.resolve(&self.toml.workspace.dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn claude_cmd(&self) -> String {
        self.toml.claude_cmd(process_env)
    }

    pub fn model(&self) -> Option<String> {
        non_empty(self.toml.generator.model.clone())
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.generator.timeout_secs)
    }

    pub fn github_repository(&self) -> Option<String> {
        self.toml.github_repository(process_env)
    }

    pub fn github_api_url(&self) -> String {
        self.toml.github_api_url(process_env)
    }

    pub fn github_token(&self) -> Option<String> {
        non_empty(process_env("GITHUB_TOKEN"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.toml.worker.poll_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.toml.worker.shutdown_grace_secs)
    }

    /// Validate configuration and return warnings.
    ///
    /// A repository supplied through the environment silences the
    /// missing-repository warning.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if self.toml.github.repository.is_none() && self.github_repository().is_some() {
            warnings.retain(|w| !w.starts_with("github.repository is not set"));
        }
        if self.github_token().is_none() {
            warnings.push("GITHUB_TOKEN is not set; GitHub calls will fail".to_string());
        }
        warnings
    }
}
