use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::capability::{CodeGenerator, FileRecord, GenerationRequest, check_relative_path};
use crate::errors::TaskError;
use crate::queue::TaskOptions;
use crate::util::percent_encode;

use super::planner::PlanStep;

/// What a step produced. Committing it is the orchestrator's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub files: Vec<FileRecord>,
    pub commit_message: String,
}

/// Runs generation for one step (or a whole single-step task) and saves the
/// resulting files under a per-branch workspace directory.
pub struct StepExecutor {
    generator: Arc<dyn CodeGenerator>,
    workspace_dir: PathBuf,
}

impl StepExecutor {
    pub fn new(generator: Arc<dyn CodeGenerator>, workspace_dir: &Path) -> Self {
        Self {
            generator,
            workspace_dir: workspace_dir.to_path_buf(),
        }
    }

    /// Workspace directory for `branch`, e.g. `feature/task-1` → `<ws>/feature%2Ftask-1`.
    ///
    /// One flat directory per branch name; distinct names never share one.
    pub fn branch_dir(&self, branch: &str) -> PathBuf {
        let mut name = percent_encode(branch, false);
        if name.starts_with('.') {
            name.replace_range(..1, "%2E");
        }
        if name.is_empty() {
            // A lone `%` is never produced by the encoder.
            name.push('%');
        }
        self.workspace_dir.join(name)
    }

    /// Generate files for `request` and write them into the branch workspace.
    pub async fn generate_and_save(
        &self,
        branch: &str,
        request: &GenerationRequest,
    ) -> Result<Vec<FileRecord>, TaskError> {
        let files = self.generator.generate_files(request).await?;
        self.save_files(branch, &files).await?;
        Ok(files)
    }

    pub async fn save_files(&self, branch: &str, files: &[FileRecord]) -> Result<(), TaskError> {
        let root = self.branch_dir(branch);
        for file in files {
            check_relative_path(&file.path)?;
            let target = root.join(&file.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| TaskError::Workspace {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
            tokio::fs::write(&target, &file.content)
                .await
                .map_err(|source| TaskError::Workspace {
                    path: target.clone(),
                    source,
                })?;
        }
        tracing::debug!(branch, dir = %root.display(), files = files.len(), "Saved files to workspace");
        Ok(())
    }

    /// Commit message for `description` and the given files.
    pub async fn commit_message(
        &self,
        description: &str,
        files: &[FileRecord],
    ) -> Result<String, TaskError> {
        let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        Ok(self.generator.generate_commit_message(description, &paths).await?)
    }

    /// Execute one plan step.
    ///
    /// Context is the caller-supplied existing files overlaid with files from
    /// earlier steps (later versions win), plus the task requirements.
    pub async fn execute_step(
        &self,
        step: &PlanStep,
        overall_description: &str,
        branch: &str,
        options: &TaskOptions,
        accumulated: &BTreeMap<String, String>,
    ) -> Result<StepOutput, TaskError> {
        let mut context_files = options.existing_files.clone();
        context_files.extend(accumulated.iter().map(|(k, v)| (k.clone(), v.clone())));

        let request = GenerationRequest {
            description: overall_description.to_string(),
            step: (step.description.trim() != overall_description.trim())
                .then(|| step.description.clone()),
            context_files,
            requirements: options.requirements.clone(),
        };

        let files = self.generate_and_save(branch, &request).await?;
        let commit_message = self.commit_message(&step.description, &files).await?;
        Ok(StepOutput {
            files,
            commit_message,
        })
    }
}
