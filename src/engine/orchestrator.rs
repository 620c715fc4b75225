use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::Instrument;

use super::executor::StepExecutor;
use super::planner::{Plan, Planner, StepResult, StepStatus};
use super::status::{RunState, StatusRegistry};
use crate::capability::{
    CodeGenerator, FallbackGenerator, FileRecord, GenerationRequest, MergeMethod, MergeOutcome,
    ReviewComments, ReviewRequestRef, VersionControl,
};
use crate::errors::TaskError;
use crate::queue::{Task, TaskOptions, TaskResult, new_task_id};
use crate::util::truncate_chars;

const MAX_TITLE_CHARS: usize = 72;

/// Task-level state machine: plan, generate, commit, open a review request.
///
/// The orchestrator never touches the durable queue. It returns a
/// `TaskResult` or a `TaskError`; moving the queued task to `completed` or
/// `failed` is the worker's job.
pub struct Orchestrator {
    vcs: Arc<dyn VersionControl>,
    planner: Planner,
    executor: StepExecutor,
    statuses: StatusRegistry,
}

impl Orchestrator {
    /// `generator` is wrapped in a `FallbackGenerator` backed by the
    /// template tier, so planning and commit messages always have a fallback.
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        vcs: Arc<dyn VersionControl>,
        workspace_dir: &Path,
    ) -> Self {
        let generator: Arc<dyn CodeGenerator> = Arc::new(FallbackGenerator::with_template(generator));
        Self {
            vcs,
            planner: Planner::new(Arc::clone(&generator)),
            executor: StepExecutor::new(generator, workspace_dir),
            statuses: StatusRegistry::new(),
        }
    }

    pub fn statuses(&self) -> &StatusRegistry {
        &self.statuses
    }

    /// Run a dequeued task. The queue task id doubles as the run id.
    pub async fn process_task(&self, task: &Task) -> Result<TaskResult, TaskError> {
        self.run(&task.id, &task.description, &task.options).await
    }

    /// Run a task that did not come from the queue, under a fresh run id.
    pub async fn execute(
        &self,
        description: &str,
        options: &TaskOptions,
    ) -> Result<TaskResult, TaskError> {
        let run_id = new_task_id();
        self.run(&run_id, description, options).await
    }

    async fn run(
        &self,
        run_id: &str,
        description: &str,
        options: &TaskOptions,
    ) -> Result<TaskResult, TaskError> {
        let branch = options.branch_for(run_id);
        let span = tracing::info_span!("run", task_id = run_id, branch = %branch);

        async {
            self.statuses.start(run_id, description, &branch).await;
            tracing::info!("Processing task");

            let outcome = self.dispatch(run_id, description, &branch, options).await;

            match &outcome {
                Ok(result) => {
                    tracing::info!(
                        files = result.files.len(),
                        pr = ?result.pr.as_ref().map(|p| p.number),
                        "Task completed"
                    );
                    self.statuses.complete(run_id, result).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Task failed");
                    self.statuses.fail(run_id, &e.to_string()).await;
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Plan (when enabled) and run the single- or multi-step path.
    async fn dispatch(
        &self,
        run_id: &str,
        description: &str,
        branch: &str,
        options: &TaskOptions,
    ) -> Result<TaskResult, TaskError> {
        if !options.planning_enabled() {
            return self.run_single_step(run_id, description, branch, options).await;
        }
        let plan = self.planner.generate_plan(description).await?;
        if plan.is_multi_step() {
            self.run_multi_step(run_id, description, branch, options, plan)
                .await
        } else {
            self.run_single_step(run_id, description, branch, options)
                .await
        }
    }

    /// Create `branch` from `base` unless it already exists.
    async fn ensure_branch(&self, branch: &str, base: &str) -> Result<(), TaskError> {
        if self.vcs.branch_exists(branch).await? {
            tracing::debug!(branch, "Branch already exists");
            return Ok(());
        }
        self.vcs.create_branch(branch, base).await?;
        Ok(())
    }

    async fn open_review_request(
        &self,
        run_id: &str,
        description: &str,
        branch: &str,
        options: &TaskOptions,
        plan: Option<&Plan>,
    ) -> Result<ReviewRequestRef, TaskError> {
        let mut body = format!("Automated changes for task `{}`.\n\n{}\n", run_id, description);
        if let Some(plan) = plan {
            body.push_str("\n## Plan\n\n");
            body.push_str(&plan.checklist());
            body.push('\n');
        }
        let pr = self
            .vcs
            .open_review_request(&review_title(description), &body, branch, &options.base_branch)
            .await?;
        Ok(pr)
    }

    async fn run_single_step(
        &self,
        run_id: &str,
        description: &str,
        branch: &str,
        options: &TaskOptions,
    ) -> Result<TaskResult, TaskError> {
        let request = GenerationRequest {
            description: description.to_string(),
            step: None,
            context_files: options.existing_files.clone(),
            requirements: options.requirements.clone(),
        };
        let files = self.executor.generate_and_save(branch, &request).await?;

        self.ensure_branch(branch, &options.base_branch).await?;
        let commit_message = self.executor.commit_message(description, &files).await?;
        self.vcs.commit_files(branch, &files, &commit_message).await?;

        let pr = if options.create_pr {
            Some(
                self.open_review_request(run_id, description, branch, options, None)
                    .await?,
            )
        } else {
            None
        };

        Ok(TaskResult {
            branch_name: branch.to_string(),
            files,
            commit_message,
            pr,
        })
    }

    async fn run_multi_step(
        &self,
        run_id: &str,
        description: &str,
        branch: &str,
        options: &TaskOptions,
        mut plan: Plan,
    ) -> Result<TaskResult, TaskError> {
        self.statuses.set_plan(run_id, &plan).await;
        self.ensure_branch(branch, &options.base_branch).await?;

        let mut accumulated: BTreeMap<String, String> = BTreeMap::new();
        let mut all_files: Vec<FileRecord> = Vec::new();
        let mut pr: Option<ReviewRequestRef> = None;

        for index in 0..plan.steps.len() {
            let step_id = plan.steps[index].id.clone();

            let missing = plan.unmet_dependencies(index);
            if !missing.is_empty() {
                let err = TaskError::UnmetDependency {
                    step: step_id,
                    missing,
                };
                plan.steps[index].status = StepStatus::Failed;
                plan.steps[index].error = Some(err.to_string());
                self.statuses.set_plan(run_id, &plan).await;
                return Err(err);
            }

            plan.current_step_index = index;
            plan.steps[index].status = StepStatus::InProgress;
            self.statuses.set_plan(run_id, &plan).await;
            tracing::info!(step_id = %step_id, step = index + 1, of = plan.steps.len(), "Executing step");

            let step = plan.steps[index].clone();
            let executed = async {
                let output = self
                    .executor
                    .execute_step(&step, description, branch, options, &accumulated)
                    .await?;
                self.vcs
                    .commit_files(branch, &output.files, &output.commit_message)
                    .await?;
                Ok::<_, TaskError>(output)
            }
            .await;

            let output = match executed {
                Ok(output) => output,
                Err(e) => {
                    tracing::error!(step_id = %step_id, error = %e, "Step failed");
                    plan.steps[index].status = StepStatus::Failed;
                    plan.steps[index].error = Some(e.to_string());
                    self.statuses.set_plan(run_id, &plan).await;
                    return Err(e);
                }
            };

            for file in &output.files {
                accumulated.insert(file.path.clone(), file.content.clone());
                merge_file(&mut all_files, file);
            }
            plan.steps[index].status = StepStatus::Completed;
            plan.steps[index].result = Some(StepResult {
                files: output.files,
                commit_message: output.commit_message,
            });

            if index == 0 && options.create_pr && pr.is_none() {
                pr = Some(
                    self.open_review_request(run_id, description, branch, options, Some(&plan))
                        .await?,
                );
            }
            self.statuses.set_plan(run_id, &plan).await;
        }

        let commit_message = self.executor.commit_message(description, &all_files).await?;
        Ok(TaskResult {
            branch_name: branch.to_string(),
            files: all_files,
            commit_message,
            pr,
        })
    }

    /// Issue-style and inline comments on review request `number`.
    pub async fn get_pr_comments(&self, number: u64) -> Result<ReviewComments, TaskError> {
        Ok(self.vcs.list_comments(number).await?)
    }

    pub async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<MergeOutcome, TaskError> {
        let outcome = self.vcs.merge_review_request(number, method).await?;
        tracing::info!(pr = number, method = %method, sha = %outcome.merged_ref, "Merged pull request");
        Ok(outcome)
    }

    pub async fn get_task_status(&self, id: &str) -> Option<RunState> {
        self.statuses.get(id).await
    }

    pub async fn list_tasks(&self) -> Vec<RunState> {
        self.statuses.list().await
    }
}

/// First line of the description, shortened to a title.
fn review_title(description: &str) -> String {
    let first_line = description
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Automated changes");
    truncate_chars(first_line, MAX_TITLE_CHARS)
}

/// Replace an earlier version of the same path or append.
fn merge_file(files: &mut Vec<FileRecord>, file: &FileRecord) {
    match files.iter_mut().find(|f| f.path == file.path) {
        Some(existing) => existing.content = file.content.clone(),
        None => files.push(file.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::PlannedStep;
    use crate::engine::status::RunStatus;
    use crate::errors::CapabilityError;
    use crate::testing::{FakeGenerator, FakeVcs};
    use tempfile::TempDir;

    fn planned(id: &str, order: u32, deps: &[&str]) -> PlannedStep {
        PlannedStep {
            id: id.to_string(),
            description: format!("Step {}", id),
            order,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn orchestrator(
        generator: Arc<FakeGenerator>,
        vcs: Arc<FakeVcs>,
        dir: &TempDir,
    ) -> Orchestrator {
        Orchestrator::new(generator, vcs, dir.path())
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<RunState>) -> Vec<RunState> {
        let mut states = Vec::new();
        while let Ok(state) = rx.try_recv() {
            states.push(state);
        }
        states
    }

    #[tokio::test]
    async fn test_single_step_creates_branch_commits_and_opens_pr() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(FakeGenerator::new());
        let vcs = Arc::new(FakeVcs::new());
        let orch = orchestrator(generator.clone(), vcs.clone(), &dir);
        let task = Task::new("Create a simple hello world HTML page", TaskOptions::default());

        let result = orch.process_task(&task).await.unwrap();

        let branch = format!("feature/{}", task.id);
        assert_eq!(result.branch_name, branch);
        assert_eq!(result.files, vec![FileRecord::new("index.html", "<h1>Hello World</h1>")]);
        assert_eq!(result.pr.as_ref().map(|p| p.number), Some(42));
        assert_eq!(
            vcs.events(),
            vec![
                format!("create_branch:{}", branch),
                format!("commit:{}", branch),
                format!("review:{}", branch),
            ]
        );
        assert_eq!(
            vcs.created_branches.lock().unwrap()[0],
            (branch.clone(), "main".to_string())
        );

        let review = vcs.reviews.lock().unwrap()[0].clone();
        assert_eq!(review.title, "Create a simple hello world HTML page");
        assert!(review.body.contains(&task.id));
        assert_eq!(review.base, "main");

        let status = orch.get_task_status(&task.id).await.unwrap();
        assert_eq!(status.status, RunStatus::Completed);
        assert!(orch.executor.branch_dir(&branch).join("index.html").exists());
    }

    #[tokio::test]
    async fn test_single_step_never_reports_in_progress() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(Arc::new(FakeGenerator::new()), Arc::new(FakeVcs::new()), &dir);
        let mut rx = orch.statuses().subscribe();
        orch.execute("One shot", &TaskOptions::default()).await.unwrap();
        let statuses: Vec<RunStatus> = drain(&mut rx).into_iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![RunStatus::Processing, RunStatus::Completed]);
    }

    #[tokio::test]
    async fn test_no_pr_when_create_pr_false() {
        let dir = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        let orch = orchestrator(Arc::new(FakeGenerator::new()), vcs.clone(), &dir);
        let options = TaskOptions {
            create_pr: false,
            ..TaskOptions::default()
        };
        let result = orch.execute("No PR please", &options).await.unwrap();
        assert!(result.pr.is_none());
        assert!(vcs.reviews.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_existing_branch_is_not_recreated() {
        let dir = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        let orch = orchestrator(Arc::new(FakeGenerator::new()), vcs.clone(), &dir);
        let options = TaskOptions {
            branch_name: Some("fixed-branch".into()),
            create_pr: false,
            ..TaskOptions::default()
        };

        orch.execute("First", &options).await.unwrap();
        orch.execute("Second", &options).await.unwrap();

        assert_eq!(vcs.created_branches.lock().unwrap().len(), 1);
        let commits = vcs.commits.lock().unwrap();
        assert_eq!(commits.len(), 2);
        assert!(commits.iter().all(|c| c.branch == "fixed-branch"));
    }

    #[tokio::test]
    async fn test_planning_disabled_skips_planner() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(
            FakeGenerator::new().with_plan(vec![planned("a", 1, &[]), planned("b", 2, &[])]),
        );
        let orch = orchestrator(generator.clone(), Arc::new(FakeVcs::new()), &dir);
        let options = TaskOptions {
            use_planning: Some(false),
            ..TaskOptions::default()
        };
        orch.execute("Direct", &options).await.unwrap();
        assert_eq!(generator.plan_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(generator.file_calls(), 1);
    }

    #[tokio::test]
    async fn test_planning_failure_falls_back_to_single_step() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(FakeGenerator::new().failing_plan());
        let vcs = Arc::new(FakeVcs::new());
        let orch = orchestrator(generator.clone(), vcs.clone(), &dir);
        let result = orch.execute("Whole task", &TaskOptions::default()).await.unwrap();
        assert_eq!(generator.file_calls(), 1);
        assert_eq!(vcs.commits.lock().unwrap().len(), 1);
        assert!(result.pr.is_some());
    }

    #[tokio::test]
    async fn test_commit_message_falls_back_to_template() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(FakeGenerator::new().failing_commit_message());
        let vcs = Arc::new(FakeVcs::new());
        let orch = orchestrator(generator, vcs.clone(), &dir);
        let result = orch.execute("Add a footer", &TaskOptions::default()).await.unwrap();
        assert_eq!(result.commit_message, "feat: Add a footer");
        assert_eq!(vcs.commits.lock().unwrap()[0].message, "feat: Add a footer");
    }

    #[tokio::test]
    async fn test_multi_step_commits_each_step_and_opens_pr_after_first() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(
            FakeGenerator::new()
                .with_plan(vec![planned("a", 1, &[]), planned("b", 2, &["a"])])
                .with_file_responses(vec![
                    Ok(vec![FileRecord::new("index.html", "v1")]),
                    Ok(vec![
                        FileRecord::new("index.html", "v2"),
                        FileRecord::new("style.css", "body {}"),
                    ]),
                ]),
        );
        let vcs = Arc::new(FakeVcs::new());
        let orch = orchestrator(generator.clone(), vcs.clone(), &dir);
        let mut rx = orch.statuses().subscribe();
        let options = TaskOptions {
            branch_name: Some("feature/site".into()),
            ..TaskOptions::default()
        };

        let result = orch.execute("Build a site", &options).await.unwrap();

        assert_eq!(
            vcs.events(),
            vec![
                "create_branch:feature/site",
                "commit:feature/site",
                "review:feature/site",
                "commit:feature/site",
            ]
        );
        assert_eq!(
            result.files,
            vec![
                FileRecord::new("index.html", "v2"),
                FileRecord::new("style.css", "body {}"),
            ]
        );

        // Step b sees step a's output as context.
        let requests = generator.requests.lock().unwrap().clone();
        assert_eq!(requests[1].context_files["index.html"], "v1");
        assert_eq!(requests[1].step.as_deref(), Some("Step b"));

        let review = vcs.reviews.lock().unwrap()[0].clone();
        assert!(review.body.contains("- [x] Step a"));
        assert!(review.body.contains("- [ ] Step b"));

        let states = drain(&mut rx);
        assert!(states.iter().any(|s| s.status == RunStatus::InProgress));
        let indices: Vec<usize> = states
            .iter()
            .filter_map(|s| s.plan.as_ref().map(|p| p.current_step_index))
            .collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(indices.last(), Some(&1));

        let final_state = orch.get_task_status(&states[0].id).await.unwrap();
        assert_eq!(final_state.status, RunStatus::Completed);
        let plan = final_state.plan.unwrap();
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(plan.steps[0].result.as_ref().unwrap().files[0].content, "v1");

        let commit_requests = generator.commit_requests.lock().unwrap();
        assert_eq!(commit_requests.last().unwrap().0, "Build a site");
        assert_eq!(commit_requests.last().unwrap().1, vec!["index.html", "style.css"]);
    }

    #[tokio::test]
    async fn test_multi_step_failure_aborts_remaining_steps() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(
            FakeGenerator::new()
                .with_plan(vec![planned("a", 1, &[]), planned("b", 2, &["a"])])
                .failing_files("generation offline"),
        );
        let vcs = Arc::new(FakeVcs::new());
        let orch = orchestrator(generator.clone(), vcs.clone(), &dir);

        let err = orch.execute("Build", &TaskOptions::default()).await.unwrap_err();
        assert!(matches!(err, TaskError::Capability(CapabilityError::Unavailable(_))));
        assert_eq!(generator.file_calls(), 1);
        assert!(vcs.commits.lock().unwrap().is_empty());
        assert!(vcs.reviews.lock().unwrap().is_empty());

        let state = orch.list_tasks().await.pop().unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        let plan = state.plan.unwrap();
        assert_eq!(plan.steps[0].status, StepStatus::Failed);
        assert!(plan.steps[0].error.as_deref().unwrap().contains("generation offline"));
        assert_eq!(plan.steps[1].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_unmet_dependency_fails_before_generation() {
        let dir = TempDir::new().unwrap();
        // Step a depends on b, which runs later.
        let generator = Arc::new(
            FakeGenerator::new().with_plan(vec![planned("a", 1, &["b"]), planned("b", 2, &[])]),
        );
        let vcs = Arc::new(FakeVcs::new());
        let orch = orchestrator(generator.clone(), vcs.clone(), &dir);

        let err = orch.execute("Build", &TaskOptions::default()).await.unwrap_err();
        match err {
            TaskError::UnmetDependency { step, missing } => {
                assert_eq!(step, "a");
                assert_eq!(missing, vec!["b"]);
            }
            other => panic!("Expected UnmetDependency, got {:?}", other),
        }
        assert_eq!(generator.file_calls(), 0);
        assert!(vcs.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_marks_step_failed() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(
            FakeGenerator::new().with_plan(vec![planned("a", 1, &[]), planned("b", 2, &[])]),
        );
        let vcs = Arc::new(FakeVcs::new().failing_commits());
        let orch = orchestrator(generator.clone(), vcs, &dir);

        let err = orch.execute("Build", &TaskOptions::default()).await.unwrap_err();
        assert!(matches!(err, TaskError::Capability(CapabilityError::Api { status: 422, .. })));
        assert_eq!(generator.file_calls(), 1);
        let plan = orch.list_tasks().await.pop().unwrap().plan.unwrap();
        assert_eq!(plan.steps[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_review_failure_fails_single_step_task() {
        let dir = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new().failing_reviews());
        let orch = orchestrator(Arc::new(FakeGenerator::new()), vcs.clone(), &dir);
        let err = orch.execute("x", &TaskOptions::default()).await.unwrap_err();
        assert!(matches!(err, TaskError::Capability(_)));
        // The commit landed before the review request was attempted.
        assert_eq!(vcs.commits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_base_branch_fails_task() {
        let dir = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        let orch = orchestrator(Arc::new(FakeGenerator::new()), vcs.clone(), &dir);
        let options = TaskOptions {
            base_branch: "develop".into(),
            ..TaskOptions::default()
        };
        let err = orch.execute("x", &options).await.unwrap_err();
        assert!(matches!(err, TaskError::Capability(CapabilityError::Api { status: 404, .. })));
        assert!(vcs.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_generates_fresh_run_ids() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(Arc::new(FakeGenerator::new()), Arc::new(FakeVcs::new()), &dir);
        let options = TaskOptions {
            create_pr: false,
            ..TaskOptions::default()
        };
        let a = orch.execute("a", &options).await.unwrap();
        let b = orch.execute("b", &options).await.unwrap();
        assert_ne!(a.branch_name, b.branch_name);
        assert_eq!(orch.list_tasks().await.len(), 2);
    }

    #[tokio::test]
    async fn test_pr_comments_and_merge() {
        let dir = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        let orch = orchestrator(Arc::new(FakeGenerator::new()), vcs.clone(), &dir);

        let comments = orch.get_pr_comments(42).await.unwrap();
        assert_eq!(comments.issue_comments[0].author, "alice");
        assert!(orch.get_pr_comments(0).await.is_err());

        let outcome = orch.merge_pr(42, MergeMethod::Squash).await.unwrap();
        assert_eq!(outcome.merged_ref, "abc123");
        assert_eq!(vcs.events(), vec!["merge:42:squash"]);
    }

    #[tokio::test]
    async fn test_merge_without_sha_fails() {
        let dir = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new().without_merge_sha());
        let orch = orchestrator(Arc::new(FakeGenerator::new()), vcs, &dir);
        assert!(matches!(
            orch.merge_pr(1, MergeMethod::Merge).await,
            Err(TaskError::Capability(CapabilityError::Malformed(_)))
        ));
    }

    #[test]
    fn test_review_title_uses_first_line() {
        assert_eq!(review_title("Add login\n\nDetails here"), "Add login");
        assert_eq!(review_title("   "), "Automated changes");
        assert_eq!(review_title(&"x".repeat(100)).chars().count(), MAX_TITLE_CHARS);
    }
}
