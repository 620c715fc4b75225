use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use super::FileRecord;
use crate::errors::CapabilityError;

/// Input to a file-generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    /// The overall task description.
    pub description: String,
    /// The current step's own goal, when it differs from the overall task.
    pub step: Option<String>,
    /// Files already known to the task (caller-supplied and prior steps).
    pub context_files: BTreeMap<String, String>,
    pub requirements: Option<String>,
}

impl GenerationRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    /// Render the user prompt. Sections with no content are omitted entirely.
    pub fn render_prompt(&self) -> String {
        let mut prompt = format!("## Task\n{}\n", self.description.trim());

        if let Some(step) = self.step.as_deref().filter(|s| !s.trim().is_empty()) {
            let _ = write!(prompt, "\n## Current Step\n{}\n", step.trim());
        }

        if !self.context_files.is_empty() {
            prompt.push_str("\n## Existing Files\n");
            for (path, content) in &self.context_files {
                let _ = write!(prompt, "\n### {}\n```\n{}\n```\n", path, content);
            }
        }

        if let Some(requirements) = self.requirements.as_deref().filter(|r| !r.trim().is_empty()) {
            let _ = write!(prompt, "\n## Requirements\n{}\n", requirements);
        }

        prompt
    }
}

/// One step of a plan outline as returned by a generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default, deserialize_with = "ids_string_or_number")]
    pub dependencies: Vec<String>,
}

fn id_from_value<E: serde::de::Error>(value: serde_json::Value) -> Result<String, E> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(E::custom(format!("step id must be a string or number, got {}", other))),
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    id_from_value(serde_json::Value::deserialize(deserializer)?)
}

fn ids_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Vec::<serde_json::Value>::deserialize(deserializer)?
        .into_iter()
        .map(id_from_value)
        .collect()
}

/// Abstraction over the code-generation service.
/// Real implementation: `ClaudeCliGenerator`. Deterministic tier: `TemplateGenerator`.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn generate_files(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<FileRecord>, CapabilityError>;

    async fn generate_plan(&self, description: &str) -> Result<Vec<PlannedStep>, CapabilityError>;

    async fn generate_commit_message(
        &self,
        description: &str,
        paths: &[String],
    ) -> Result<String, CapabilityError>;
}

/// Deterministic generator with no external dependency.
///
/// Plans are a single step wrapping the description verbatim and commit
/// messages are `feat: <description>`. File generation is unsupported, so a
/// failing primary generator is never masked by an empty result.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn commit_message(description: &str) -> String {
        format!("feat: {}", description)
    }

    pub fn single_step(description: &str) -> PlannedStep {
        PlannedStep {
            id: "step-1".to_string(),
            description: description.to_string(),
            order: 1,
            dependencies: Vec::new(),
        }
    }
}

#[async_trait]
impl CodeGenerator for TemplateGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn generate_files(
        &self,
        _request: &GenerationRequest,
    ) -> Result<Vec<FileRecord>, CapabilityError> {
        Err(CapabilityError::Unsupported("template generator"))
    }

    async fn generate_plan(&self, description: &str) -> Result<Vec<PlannedStep>, CapabilityError> {
        Ok(vec![Self::single_step(description)])
    }

    async fn generate_commit_message(
        &self,
        description: &str,
        _paths: &[String],
    ) -> Result<String, CapabilityError> {
        Ok(Self::commit_message(description))
    }
}

/// Two-tier generator: every call tries `primary` and falls back to
/// `secondary` on error. If both fail the primary's error is returned.
#[derive(Clone)]
pub struct FallbackGenerator {
    primary: Arc<dyn CodeGenerator>,
    secondary: Arc<dyn CodeGenerator>,
}

impl FallbackGenerator {
    pub fn new(primary: Arc<dyn CodeGenerator>, secondary: Arc<dyn CodeGenerator>) -> Self {
        Self { primary, secondary }
    }

    /// `primary` backed by the deterministic `TemplateGenerator`.
    pub fn with_template(primary: Arc<dyn CodeGenerator>) -> Self {
        Self::new(primary, Arc::new(TemplateGenerator))
    }

    fn recover<T>(
        &self,
        operation: &str,
        primary_err: CapabilityError,
        secondary: Result<T, CapabilityError>,
    ) -> Result<T, CapabilityError> {
        match secondary {
            Ok(value) => {
                tracing::warn!(
                    operation,
                    primary = self.primary.name(),
                    fallback = self.secondary.name(),
                    error = %primary_err,
                    "Generator call failed, using fallback"
                );
                Ok(value)
            }
            Err(secondary_err) => {
                tracing::debug!(
                    operation,
                    fallback = self.secondary.name(),
                    error = %secondary_err,
                    "Fallback generator also failed"
                );
                Err(primary_err)
            }
        }
    }
}

#[async_trait]
impl CodeGenerator for FallbackGenerator {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn generate_files(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<FileRecord>, CapabilityError> {
        match self.primary.generate_files(request).await {
            Ok(files) => Ok(files),
            Err(e) => {
                let secondary = self.secondary.generate_files(request).await;
                self.recover("generate_files", e, secondary)
            }
        }
    }

    async fn generate_plan(&self, description: &str) -> Result<Vec<PlannedStep>, CapabilityError> {
        match self.primary.generate_plan(description).await {
            Ok(steps) => Ok(steps),
            Err(e) => {
                let secondary = self.secondary.generate_plan(description).await;
                self.recover("generate_plan", e, secondary)
            }
        }
    }

    async fn generate_commit_message(
        &self,
        description: &str,
        paths: &[String],
    ) -> Result<String, CapabilityError> {
        match self.primary.generate_commit_message(description, paths).await {
            Ok(message) => Ok(message),
            Err(e) => {
                let secondary = self.secondary.generate_commit_message(description, paths).await;
                self.recover("generate_commit_message", e, secondary)
            }
        }
    }
}
