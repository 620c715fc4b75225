//! Task execution engine.
//!
//! ## Module Map
//!
//! ```text
//!  queue (pending → processing)
//!        │
//!        v
//!  worker.rs        (Worker: poll loop, grace-period shutdown)
//!        │ Orchestrator::process_task()
//!        v
//!  orchestrator.rs  (single-step / multi-step state machine)
//!        │                 │                    │
//!        │ generate_plan() │ execute_step()     │ branch / commit / PR
//!        v                 v                    v
//!  planner.rs        executor.rs          capability::VersionControl
//!  (Plan, PlanStep)  (workspace writes)
//!        │
//!        v
//!  status.rs        (StatusRegistry: in-memory run status + broadcast)
//! ```
//!
//! ## Typical Flow
//!
//! 1. `Worker` dequeues a task and hands it to `Orchestrator::process_task()`.
//! 2. The orchestrator records a `processing` entry in the `StatusRegistry`
//!    and asks the `Planner` for a plan (unless planning is disabled).
//! 3. A one-step plan runs the single-step path: generate, save, ensure the
//!    branch, commit, and optionally open a pull request.
//! 4. A longer plan runs step by step. Each step is gated on its
//!    dependencies, committed on its own, and the pull request is opened
//!    after the first step's commit with a checklist of the plan.
//! 5. The worker moves the queued task to `completed` or `failed`.

pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod status;
pub mod worker;

pub use executor::{StepExecutor, StepOutput};
pub use orchestrator::Orchestrator;
pub use planner::{Plan, PlanStep, Planner, StepResult, StepStatus};
pub use status::{RunState, RunStatus, StatusRegistry};
pub use worker::Worker;
