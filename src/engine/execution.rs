//! Execution records and scheduler outcomes.

use crate::phase::{PhaseRun, PhaseStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One run of a workflow.
///
/// Phases are deep copies of the workflow's definitions taken at `start`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub phases: Vec<PhaseRun>,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Index of the most recently scheduled phase.
    #[serde(default)]
    pub current_phase: Option<usize>,
}

impl Execution {
    pub fn project_id(&self) -> Option<&str> {
        self.context.get("projectId").and_then(Value::as_str)
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseRun> {
        self.phases.iter().find(|p| p.name() == name)
    }

    /// The phase currently executing, if any.
    pub fn running_phase(&self) -> Option<&PhaseRun> {
        self.phases
            .iter()
            .find(|p| p.status == PhaseStatus::Running)
    }

    /// Count of phases per status, for display.
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Completed)
            .count();
        (done, self.phases.len())
    }

    /// Reset any phase left `running` by a dead process. Returns true if one was reset.
    pub(crate) fn recover_interrupted(&mut self) -> bool {
        if self.status != ExecutionStatus::Running {
            return false;
        }
        let mut reset = false;
        for phase in self
            .phases
            .iter_mut()
            .filter(|p| p.status == PhaseStatus::Running)
        {
            phase.reset();
            reset = true;
        }
        reset
    }
}

/// Where a call to `advance` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Nothing to do: the execution is terminal or a phase is already running.
    Idle,
    /// Pending phases remain but none has all dependencies completed.
    Blocked {
        phase: String,
        waiting_on: Vec<String>,
    },
    /// Every phase completed.
    Completed,
    /// A phase failed and took the execution with it.
    Failed { phase: String, error: String },
}
