use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{FileRecord, check_relative_path};
use super::generator::{CodeGenerator, GenerationRequest, PlannedStep};
use crate::errors::CapabilityError;
use crate::util::{extract_json_object, truncate_chars};

const FILES_SYSTEM_PROMPT: &str = r#"You are a code generator. Produce the complete contents of every file needed for the task.

You MUST respond with valid JSON only (no markdown, no explanation) matching this schema:
{
  "files": [
    {"path": "relative/path/to/file.ext", "content": "full file contents"}
  ]
}

Rules:
- Paths are relative to the repository root. Never use absolute paths or "..".
- Return whole files, not diffs.
- When existing files are shown, return updated versions of any you change plus any new files.
"#;

const PLAN_SYSTEM_PROMPT: &str = r#"You are a software engineering planner. Break the task into a small number of ordered implementation steps.

You MUST respond with valid JSON only (no markdown, no explanation) matching this schema:
{
  "steps": [
    {"id": "step-1", "description": "What this step implements", "order": 1, "dependencies": []}
  ]
}

Rules:
- "order" starts at 1 and increases by one per step.
- "dependencies" lists ids of earlier steps that must be finished first.
- For simple tasks, return a single step. Do not over-decompose.
"#;

const COMMIT_SYSTEM_PROMPT: &str = "You write git commit messages. Respond with a single conventional-commit \
subject line (e.g. \"feat: add login form\"), at most 72 characters, and nothing else.";

const MAX_COMMIT_SUBJECT: usize = 72;

#[derive(Debug, Deserialize)]
struct FilesPayload {
    files: Vec<FileRecord>,
}

#[derive(Debug, Deserialize)]
struct PlanPayload {
    steps: Vec<PlannedStep>,
}

/// Code generator backed by the Claude CLI in print mode.
pub struct ClaudeCliGenerator {
    claude_cmd: String,
    model: Option<String>,
    timeout: Duration,
    working_dir: PathBuf,
}

impl ClaudeCliGenerator {
    pub fn new(claude_cmd: &str, working_dir: &Path) -> Self {
        Self {
            claude_cmd: claude_cmd.to_string(),
            model: None,
            timeout: Duration::from_secs(600),
            working_dir: working_dir.to_path_buf(),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call_claude(&self, system: &str, prompt: &str) -> Result<String, CapabilityError> {
        let mut cmd = Command::new(&self.claude_cmd);
        cmd.args(["--print", "--output-format", "text"]);
        if let Some(model) = &self.model {
            cmd.args(["--model", model]);
        }
        cmd.args(["-p", prompt, "--system", system])
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| {
                CapabilityError::Unavailable(format!("failed to run {}: {}", self.claude_cmd, e))
            })?,
            Err(_) => {
                return Err(CapabilityError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::Unavailable(format!(
                "{} exited with {}: {}",
                self.claude_cmd,
                output.status,
                truncate_chars(stderr.trim(), 500)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

pub(crate) fn parse_files(response: &str) -> Result<Vec<FileRecord>, CapabilityError> {
    let json = extract_json_object(response)
        .ok_or_else(|| CapabilityError::Malformed("no JSON object in file response".into()))?;
    let payload: FilesPayload = serde_json::from_str(json)
        .map_err(|e| CapabilityError::Malformed(format!("invalid file payload: {}", e)))?;
    if payload.files.is_empty() {
        return Err(CapabilityError::Malformed("response contained no files".into()));
    }
    for file in &payload.files {
        check_relative_path(&file.path)?;
    }
    Ok(payload.files)
}

pub(crate) fn parse_plan(response: &str) -> Result<Vec<PlannedStep>, CapabilityError> {
    let json = extract_json_object(response)
        .ok_or_else(|| CapabilityError::Malformed("no JSON object in plan response".into()))?;
    let payload: PlanPayload = serde_json::from_str(json)
        .map_err(|e| CapabilityError::Malformed(format!("invalid plan payload: {}", e)))?;
    if payload.steps.is_empty() {
        return Err(CapabilityError::Malformed("plan contained no steps".into()));
    }
    Ok(payload.steps)
}

/// First non-empty line, stripped of quoting and fences.
pub(crate) fn parse_commit_message(response: &str) -> Result<String, CapabilityError> {
    let line = response
        .lines()
        .map(|l| l.trim().trim_matches(|c| c == '`' || c == '"' || c == '\''))
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| CapabilityError::Malformed("empty commit message".into()))?;
    Ok(truncate_chars(line, MAX_COMMIT_SUBJECT))
}

#[async_trait]
impl CodeGenerator for ClaudeCliGenerator {
    fn name(&self) -> &'static str {
        "claude-cli"
    }

    async fn generate_files(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<FileRecord>, CapabilityError> {
        let prompt = format!("{}\nRespond with JSON only.", request.render_prompt());
        let response = self.call_claude(FILES_SYSTEM_PROMPT, &prompt).await?;
        parse_files(&response).inspect_err(|_| {
            tracing::debug!(
                raw = %truncate_chars(&response, 500),
                "Unparseable file generation response"
            );
        })
    }

    async fn generate_plan(&self, description: &str) -> Result<Vec<PlannedStep>, CapabilityError> {
        let prompt = format!(
            "Create an implementation plan for this task.\n\n## Task\n{}\n\nRespond with JSON only.",
            description
        );
        let response = self.call_claude(PLAN_SYSTEM_PROMPT, &prompt).await?;
        parse_plan(&response)
    }

    async fn generate_commit_message(
        &self,
        description: &str,
        paths: &[String],
    ) -> Result<String, CapabilityError> {
        let prompt = format!(
            "Write a commit message for this change.\n\n## Change\n{}\n\n## Files\n{}",
            description,
            paths.join("\n")
        );
        let response = self.call_claude(COMMIT_SYSTEM_PROMPT, &prompt).await?;
        parse_commit_message(&response)
    }
}
