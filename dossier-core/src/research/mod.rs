//! Research runs: planning, exhaustion control, synthesis post-processing and
//! the orchestrator that ties them together.

pub mod knowledge;
pub mod metrics;
pub mod orchestrator;
pub mod planner;
pub mod session;
pub mod synthesis;

pub use knowledge::{KnowledgeBase, KnowledgeStore};
pub use metrics::{
    ExhaustionMetrics, ExhaustionTracker, diminishing_returns_score, gap_fill_warranted,
    missing_vertical_coverage, should_stop_early,
};
pub use orchestrator::Orchestrator;
pub use planner::{PlanOrigin, PlannedTask, build_plan};
pub use session::{
    Finding, LogEntry, LogLevel, NoOpObserver, RunBoard, RunObserver, RunPhase, Task, TaskRole,
    TaskStatus,
};
pub use synthesis::{SynthesisOutcome, apply_validation, finalize_draft};
