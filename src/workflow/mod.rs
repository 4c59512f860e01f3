//! Workflows and workflow templates.
//!
//! A workflow is a named, ordered list of phase definitions. It is validated
//! as a dependency graph when created, and copied by value into every
//! execution started from it, so editing a workflow never affects runs that
//! are already in flight.

mod graph;
mod registry;

pub use graph::{PhaseGraph, PhaseIndex};
pub use registry::WorkflowRegistry;

use crate::phase::PhaseDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, validated collection of phases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub phases: Vec<PhaseDefinition>,
    /// Template this workflow was instantiated from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reusable blueprint that workflows are instantiated from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub phases: Vec<PhaseDefinition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for creating a workflow or template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    /// Explicit id; a UUID is generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub phases: Vec<PhaseDefinition>,
}

impl WorkflowSpec {
    pub fn new(name: &str, phases: Vec<PhaseDefinition>) -> Self {
        Self {
            name: name.to_string(),
            phases,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_project(mut self, project_id: &str) -> Self {
        self.project_id = Some(project_id.to_string());
        self
    }
}

/// Partial update applied by `WorkflowRegistry::update_workflow`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub project_id: Option<String>,
    pub phases: Option<Vec<PhaseDefinition>>,
}

/// The phases of the built-in "Standard Development Workflow" template.
pub fn standard_development_phases() -> Vec<PhaseDefinition> {
    let step = |name: &str, description: &str, template: &str, order: u32, deps: &[&str]| {
        PhaseDefinition::new(
            name,
            "render_template",
            order,
            deps.iter().map(|d| d.to_string()).collect(),
        )
        .with_description(description)
        .with_template(template)
    };

    vec![
        step(
            "Structure Analysis",
            "Analyze the current project structure",
            "analysis/structure-current",
            1,
            &[],
        ),
        step(
            "Feature Suggestion",
            "Suggest features for the project",
            "analysis/structure-suggested",
            2,
            &["Structure Analysis"],
        ),
        step(
            "Step Generation",
            "Generate implementation steps",
            "implementation/steps",
            3,
            &["Feature Suggestion"],
        ),
        step(
            "Feature Implementation",
            "Implement features",
            "implementation/feature",
            4,
            &["Step Generation"],
        ),
        step(
            "Validation",
            "Validate implemented features",
            "validation/feature",
            5,
            &["Feature Implementation"],
        ),
    ]
}
