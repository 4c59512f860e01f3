//! Phase definitions and their runtime instances.
//!
//! This module provides:
//! - `PhaseDefinition`, the immutable template a workflow is built from
//! - `PhaseStatus`, the per-phase state machine
//! - `PhaseRun`, a definition copied into an execution plus its runtime state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single named unit of work within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDefinition {
    /// Unique name within the workflow; dependencies refer to it.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Key into the task registry selecting the body that runs this phase.
    pub task_type: String,
    /// Tie-break hint only. Declaration order and dependencies decide scheduling.
    #[serde(default)]
    pub order: u32,
    /// Names of phases that must complete before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Template reference (`category/name`) rendered by the `render_template` task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl PhaseDefinition {
    /// Create a new definition with no template.
    pub fn new(name: &str, task_type: &str, order: u32, dependencies: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            task_type: task_type.to_string(),
            order,
            dependencies,
            template: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.template = Some(template.to_string());
        self
    }
}

/// Status of a phase inside an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Waiting to be selected by the scheduler
    #[default]
    Pending,
    /// Task body is executing
    Running,
    /// Task body succeeded
    Completed,
    /// Task body failed
    Failed,
}

impl PhaseStatus {
    /// Check if the phase is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A phase definition copied into an execution, with its runtime state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRun {
    #[serde(flatten)]
    pub definition: PhaseDefinition,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Value returned by the task body on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl PhaseRun {
    /// Create a pending run from a definition.
    pub fn pending(definition: PhaseDefinition) -> Self {
        Self {
            definition,
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            output: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn mark_running(&mut self) {
        self.status = PhaseStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, output: Option<Value>) {
        self.status = PhaseStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.output = output;
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.status = PhaseStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.to_string());
    }

    /// Put an interrupted run back in the queue.
    pub fn reset(&mut self) {
        self.status = PhaseStatus::Pending;
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_status_terminal() {
        assert!(!PhaseStatus::Pending.is_terminal());
        assert!(!PhaseStatus::Running.is_terminal());
        assert!(PhaseStatus::Completed.is_terminal());
        assert!(PhaseStatus::Failed.is_terminal());
    }

    #[test]
    fn test_phase_run_lifecycle() {
        let mut run = PhaseRun::pending(PhaseDefinition::new("Build", "noop", 1, vec![]));
        assert_eq!(run.status, PhaseStatus::Pending);
        assert!(run.started_at.is_none());

        run.mark_running();
        assert_eq!(run.status, PhaseStatus::Running);
        assert!(run.started_at.is_some());

        run.mark_failed("compiler exploded");
        assert_eq!(run.status, PhaseStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("compiler exploded"));
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_phase_run_serializes_flat_camel_case() {
        let run = PhaseRun::pending(
            PhaseDefinition::new("Validation", "render_template", 5, vec!["Build".into()])
                .with_template("validation/default"),
        );
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["name"], "Validation");
        assert_eq!(value["taskType"], "render_template");
        assert_eq!(value["dependencies"][0], "Build");
        assert_eq!(value["status"], "pending");
        assert!(value["startedAt"].is_null());

        let back: PhaseRun = serde_json::from_value(value).unwrap();
        assert_eq!(back, run);
    }

    #[test]
    fn test_definition_defaults_when_fields_missing() {
        let def: PhaseDefinition =
            serde_json::from_str(r#"{"name": "A", "taskType": "noop"}"#).unwrap();
        assert!(def.dependencies.is_empty());
        assert_eq!(def.order, 0);
        assert!(def.template.is_none());
    }
}
