//! Observable run state.
//!
//! A [`RunBoard`] holds everything one run exposes to callers: its tasks,
//! narrative log, findings, exhaustion metrics and final report. The board is
//! owned by the orchestrator and only mutated through generation-checked
//! commits, so a superseded run can never write to it.

use super::metrics::ExhaustionMetrics;
use crate::dossier::FinalReport;
use crate::sources::NormalizedSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What a task does in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRole {
    Director,
    Researcher,
    Critic,
    Synthesizer,
}

/// Task lifecycle: idle → thinking → searching → analyzing → complete | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Thinking,
    Searching,
    Analyzing,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

/// Output of one search task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Id of the task that produced it.
    pub origin_task: String,
    pub task_name: String,
    pub query: String,
    pub content: String,
    pub confidence: f64,
    /// Sources normalized from the raw list the oracle returned.
    pub sources: Vec<NormalizedSource>,
}

/// An ephemeral unit of work ("agent").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub role: TaskRole,
    pub status: TaskStatus,
    pub description: String,
    pub reasoning: Vec<String>,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Task {
    pub fn new(name: impl Into<String>, role: TaskRole, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            role,
            status: TaskStatus::Idle,
            description: description.into(),
            reasoning: Vec::new(),
            findings: Vec::new(),
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_reasoning(mut self, line: impl Into<String>) -> Self {
        self.reasoning.push(line.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Action,
    Success,
    Warning,
    Error,
}

/// One narrative log line: phase, decision, action or outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub task_name: String,
    pub message: String,
    pub level: LogLevel,
}

/// Phase of the orchestration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Init,
    Classify,
    Discover,
    Reclassify,
    Plan,
    Round,
    Critique,
    ExhaustionCheck,
    EvidenceRecovery,
    Synthesis,
    Complete,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunPhase::Idle => "idle",
            RunPhase::Init => "init",
            RunPhase::Classify => "classify",
            RunPhase::Discover => "discover",
            RunPhase::Reclassify => "reclassify",
            RunPhase::Plan => "plan",
            RunPhase::Round => "round",
            RunPhase::Critique => "critique",
            RunPhase::ExhaustionCheck => "exhaustion_check",
            RunPhase::EvidenceRecovery => "evidence_recovery",
            RunPhase::Synthesis => "synthesis",
            RunPhase::Complete => "complete",
            RunPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Observable state of the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunBoard {
    pub generation: u64,
    pub topic: String,
    pub running: bool,
    pub phase: RunPhase,
    pub tasks: Vec<Task>,
    pub logs: Vec<LogEntry>,
    pub findings: Vec<Finding>,
    pub metrics: Vec<ExhaustionMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<FinalReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for RunBoard {
    fn default() -> Self {
        Self {
            generation: 0,
            topic: String::new(),
            running: false,
            phase: RunPhase::Idle,
            tasks: Vec::new(),
            logs: Vec::new(),
            findings: Vec::new(),
            metrics: Vec::new(),
            report: None,
            error: None,
        }
    }
}

impl RunBoard {
    /// Fresh board for a new run.
    pub fn begin(generation: u64, topic: impl Into<String>) -> Self {
        Self {
            generation,
            topic: topic.into(),
            running: true,
            phase: RunPhase::Init,
            ..Self::default()
        }
    }

    /// Empty board after a reset; nothing is marked failed.
    pub fn cleared(generation: u64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn log(
        &mut self,
        task_id: &str,
        task_name: &str,
        level: LogLevel,
        message: impl Into<String>,
    ) -> &LogEntry {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            message: message.into(),
            level,
        });
        &self.logs[self.logs.len() - 1]
    }

    /// Every finding's content, newline-joined, for critique and growth prompts.
    pub fn findings_text(&self) -> String {
        self.findings
            .iter()
            .map(|f| f.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Receives run events as they are committed.
///
/// Callbacks run while the board lock is held; implementations must not call
/// back into the orchestrator.
pub trait RunObserver: Send + Sync {
    fn on_phase_change(&self, generation: u64, phase: RunPhase);
    fn on_log(&self, entry: &LogEntry);
    fn on_task_update(&self, task: &Task);
    fn on_metrics(&self, metrics: &ExhaustionMetrics);
    fn on_report(&self, report: &FinalReport);
}

/// Observer that ignores everything.
pub struct NoOpObserver;

impl RunObserver for NoOpObserver {
    fn on_phase_change(&self, _generation: u64, _phase: RunPhase) {}
    fn on_log(&self, _entry: &LogEntry) {}
    fn on_task_update(&self, _task: &Task) {}
    fn on_metrics(&self, _metrics: &ExhaustionMetrics) {}
    fn on_report(&self, _report: &FinalReport) {}
}
