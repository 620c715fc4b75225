use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capability::{CodeGenerator, FileRecord, PlannedStep};
use crate::errors::TaskError;
use crate::util::truncate_chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Files and commit message produced by a completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub files: Vec<FileRecord>,
    pub commit_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    /// 1-based execution position; always equals index + 1.
    pub order: u32,
    pub dependencies: Vec<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanStep {
    fn from_planned(planned: PlannedStep, order: u32) -> Self {
        Self {
            id: planned.id,
            description: planned.description,
            order,
            dependencies: planned.dependencies,
            status: StepStatus::Pending,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    pub current_step_index: usize,
}

impl Plan {
    /// One step wrapping the whole description verbatim.
    pub fn single_step(description: &str) -> Self {
        Self {
            steps: vec![PlanStep {
                id: "step-1".to_string(),
                description: description.to_string(),
                order: 1,
                dependencies: Vec::new(),
                status: StepStatus::Pending,
                result: None,
                error: None,
            }],
            current_step_index: 0,
        }
    }

    /// Build a plan from a generator outline.
    ///
    /// Steps are sorted by their declared order (ties keep outline order) and
    /// renumbered so `order == index + 1`. Dependencies are kept as given;
    /// unknown or forward references surface as unmet at execution time.
    pub fn from_outline(mut outline: Vec<PlannedStep>) -> Result<Self, TaskError> {
        if outline.is_empty() {
            return Err(TaskError::InvalidStep("plan has no steps".into()));
        }
        let mut seen = HashSet::new();
        for step in &outline {
            if step.id.trim().is_empty() {
                return Err(TaskError::InvalidStep("step with empty id".into()));
            }
            if step.description.trim().is_empty() {
                return Err(TaskError::InvalidStep(format!(
                    "step {} has an empty description",
                    step.id
                )));
            }
            if !seen.insert(step.id.clone()) {
                return Err(TaskError::InvalidStep(format!("duplicate step id {}", step.id)));
            }
        }

        outline.sort_by_key(|s| s.order);
        let steps = outline
            .into_iter()
            .zip(1u32..)
            .map(|(planned, order)| PlanStep::from_planned(planned, order))
            .collect();
        Ok(Self {
            steps,
            current_step_index: 0,
        })
    }

    pub fn is_multi_step(&self) -> bool {
        self.steps.len() > 1
    }

    /// Dependency ids of step `index` that do not name a completed step.
    pub fn unmet_dependencies(&self, index: usize) -> Vec<String> {
        let Some(step) = self.steps.get(index) else {
            return Vec::new();
        };
        step.dependencies
            .iter()
            .filter(|dep| {
                !self
                    .steps
                    .iter()
                    .any(|s| &s.id == *dep && s.status == StepStatus::Completed)
            })
            .cloned()
            .collect()
    }

    /// Markdown checklist of all steps, checked when completed.
    pub fn checklist(&self) -> String {
        self.steps
            .iter()
            .map(|s| {
                let mark = if s.status == StepStatus::Completed { "x" } else { " " };
                format!("- [{}] {}", mark, s.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Turns a task description into a `Plan`.
///
/// Generator errors propagate; the orchestrator's `FallbackGenerator`
/// already answers a failed planning call with the single-step outline.
/// An outline that fails validation yields the single-step plan.
pub struct Planner {
    generator: Arc<dyn CodeGenerator>,
}

impl Planner {
    pub fn new(generator: Arc<dyn CodeGenerator>) -> Self {
        Self { generator }
    }

    pub async fn generate_plan(&self, description: &str) -> Result<Plan, TaskError> {
        let outline = self.generator.generate_plan(description).await?;
        match Plan::from_outline(outline) {
            Ok(plan) => {
                tracing::debug!(steps = plan.steps.len(), "Generated plan");
                Ok(plan)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    task = %truncate_chars(description, 80),
                    "Invalid plan, falling back to single-step plan"
                );
                Ok(Plan::single_step(description))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::FallbackGenerator;
    use crate::testing::FakeGenerator;

    fn planned(id: &str, order: u32, deps: &[&str]) -> PlannedStep {
        PlannedStep {
            id: id.to_string(),
            description: format!("Step {}", id),
            order,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_single_step_plan_wraps_description() {
        let plan = Plan::single_step("Create a page");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].description, "Create a page");
        assert_eq!(plan.steps[0].order, 1);
        assert!(plan.steps[0].dependencies.is_empty());
        assert!(!plan.is_multi_step());
    }

    #[test]
    fn test_from_outline_sorts_and_renumbers() {
        let plan = Plan::from_outline(vec![
            planned("c", 30, &["b"]),
            planned("a", 10, &[]),
            planned("b", 20, &["a"]),
        ])
        .unwrap();
        let ids: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        let orders: Vec<u32> = plan.steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(plan.current_step_index, 0);
    }

    #[test]
    fn test_from_outline_rejects_invalid() {
        assert!(Plan::from_outline(vec![]).is_err());
        assert!(Plan::from_outline(vec![planned("a", 1, &[]), planned("a", 2, &[])]).is_err());
        let mut blank = planned("a", 1, &[]);
        blank.description = "  ".into();
        assert!(Plan::from_outline(vec![blank]).is_err());
    }

    #[test]
    fn test_unmet_dependencies() {
        let mut plan =
            Plan::from_outline(vec![planned("a", 1, &[]), planned("b", 2, &["a", "zzz"])]).unwrap();
        assert_eq!(plan.unmet_dependencies(1), vec!["a", "zzz"]);
        plan.steps[0].status = StepStatus::Completed;
        assert_eq!(plan.unmet_dependencies(1), vec!["zzz"]);
        assert!(plan.unmet_dependencies(0).is_empty());
    }

    #[test]
    fn test_checklist_reflects_status() {
        let mut plan = Plan::from_outline(vec![planned("a", 1, &[]), planned("b", 2, &[])]).unwrap();
        plan.steps[0].status = StepStatus::Completed;
        assert_eq!(plan.checklist(), "- [x] Step a\n- [ ] Step b");
    }

    #[test]
    fn test_step_status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&StepStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
        let plan = Plan::single_step("x");
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["currentStepIndex"], 0);
    }

    #[tokio::test]
    async fn test_generate_plan_uses_generator_outline() {
        let generator = Arc::new(
            FakeGenerator::new().with_plan(vec![planned("a", 1, &[]), planned("b", 2, &["a"])]),
        );
        let plan = Planner::new(generator).generate_plan("Build it").await.unwrap();
        assert!(plan.is_multi_step());
        assert_eq!(plan.steps[1].dependencies, vec!["a"]);
    }

    #[tokio::test]
    async fn test_generate_plan_propagates_generator_error() {
        let generator = Arc::new(FakeGenerator::new().failing_plan());
        let err = Planner::new(generator)
            .generate_plan("Build the whole thing")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Capability(_)));
    }

    #[tokio::test]
    async fn test_generate_plan_through_fallback_is_single_step() {
        let primary = Arc::new(FakeGenerator::new().failing_plan());
        let generator = Arc::new(FallbackGenerator::with_template(primary));
        let plan = Planner::new(generator)
            .generate_plan("Build the whole thing")
            .await
            .unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].description, "Build the whole thing");
        assert_eq!(plan.steps[0].order, 1);
    }

    #[tokio::test]
    async fn test_generate_plan_falls_back_on_invalid_outline() {
        let generator =
            Arc::new(FakeGenerator::new().with_plan(vec![planned("a", 1, &[]), planned("a", 2, &[])]));
        let plan = Planner::new(generator).generate_plan("Dup ids").await.unwrap();
        assert_eq!(plan, Plan::single_step("Dup ids"));
    }
}
