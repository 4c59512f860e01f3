//! Store-backed CRUD for workflows and workflow templates.

use super::{
    PhaseGraph, Workflow, WorkflowSpec, WorkflowTemplate, WorkflowUpdate,
    standard_development_phases,
};
use crate::errors::{ConfigError, EngineError};
use crate::store::StateStore;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const WORKFLOWS: &str = "workflows";
const TEMPLATES: &str = "workflow_templates";

#[derive(Default)]
struct Catalog {
    workflows: BTreeMap<String, Workflow>,
    templates: BTreeMap<String, WorkflowTemplate>,
}

/// Owns every workflow and template definition.
///
/// Each mutation is validated, applied in memory and written through to the
/// store before returning.
pub struct WorkflowRegistry {
    store: Arc<dyn StateStore>,
    catalog: Mutex<Catalog>,
}

impl WorkflowRegistry {
    /// Load workflows and templates from the store.
    pub fn load(store: Arc<dyn StateStore>) -> Result<Self, EngineError> {
        let workflows = store.load_or_default(WORKFLOWS)?;
        let templates = store.load_or_default(TEMPLATES)?;
        Ok(Self {
            store,
            catalog: Mutex::new(Catalog {
                workflows,
                templates,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn validate(spec_name: &str, phases: &[crate::phase::PhaseDefinition]) -> Result<(), ConfigError> {
        if spec_name.trim().is_empty() {
            return Err(ConfigError::InvalidWorkflow("name is required".into()));
        }
        PhaseGraph::build(phases).map(|_| ())
    }

    /// Validate and store a new workflow.
    ///
    /// Duplicate phase names, unknown dependencies and cycles are rejected here.
    pub fn create_workflow(&self, spec: WorkflowSpec) -> Result<Workflow, EngineError> {
        Self::validate(&spec.name, &spec.phases)?;
        self.insert_workflow(spec, None)
    }

    fn insert_workflow(
        &self,
        spec: WorkflowSpec,
        template_id: Option<String>,
    ) -> Result<Workflow, EngineError> {
        let now = Utc::now();
        let workflow = Workflow {
            id: spec.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: spec.name,
            description: spec.description,
            project_id: spec.project_id,
            phases: spec.phases,
            template_id,
            created_at: now,
            updated_at: now,
        };

        let mut catalog = self.lock();
        catalog
            .workflows
            .insert(workflow.id.clone(), workflow.clone());
        self.store.save_typed(WORKFLOWS, &catalog.workflows)?;
        drop(catalog);

        tracing::info!(workflow_id = %workflow.id, name = %workflow.name, "workflow created");
        Ok(workflow)
    }

    pub fn get_workflow(&self, id: &str) -> Option<Workflow> {
        self.lock().workflows.get(id).cloned()
    }

    pub fn list_workflows(&self) -> Vec<Workflow> {
        self.lock().workflows.values().cloned().collect()
    }

    /// Apply a partial update. Returns `Ok(None)` if the workflow does not exist.
    pub fn update_workflow(
        &self,
        id: &str,
        update: WorkflowUpdate,
    ) -> Result<Option<Workflow>, EngineError> {
        let mut catalog = self.lock();
        let Some(existing) = catalog.workflows.get(id) else {
            return Ok(None);
        };

        let mut updated = existing.clone();
        if let Some(name) = update.name {
            updated.name = name;
        }
        if let Some(description) = update.description {
            updated.description = description;
        }
        if let Some(project_id) = update.project_id {
            updated.project_id = Some(project_id);
        }
        if let Some(phases) = update.phases {
            updated.phases = phases;
        }
        Self::validate(&updated.name, &updated.phases)?;
        updated.updated_at = Utc::now();

        catalog.workflows.insert(id.to_string(), updated.clone());
        self.store.save_typed(WORKFLOWS, &catalog.workflows)?;
        Ok(Some(updated))
    }

    /// Remove a workflow. Returns whether it existed.
    pub fn delete_workflow(&self, id: &str) -> Result<bool, EngineError> {
        let mut catalog = self.lock();
        if catalog.workflows.remove(id).is_none() {
            return Ok(false);
        }
        self.store.save_typed(WORKFLOWS, &catalog.workflows)?;
        tracing::info!(workflow_id = %id, "workflow deleted");
        Ok(true)
    }

    /// Validate and store a new template.
    pub fn create_template(&self, spec: WorkflowSpec) -> Result<WorkflowTemplate, EngineError> {
        Self::validate(&spec.name, &spec.phases)?;

        let now = Utc::now();
        let template = WorkflowTemplate {
            id: spec.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: spec.name,
            description: spec.description,
            phases: spec.phases,
            created_at: now,
            updated_at: now,
        };

        let mut catalog = self.lock();
        catalog
            .templates
            .insert(template.id.clone(), template.clone());
        self.store.save_typed(TEMPLATES, &catalog.templates)?;
        Ok(template)
    }

    pub fn get_template(&self, id: &str) -> Option<WorkflowTemplate> {
        self.lock().templates.get(id).cloned()
    }

    pub fn list_templates(&self) -> Vec<WorkflowTemplate> {
        self.lock().templates.values().cloned().collect()
    }

    pub fn delete_template(&self, id: &str) -> Result<bool, EngineError> {
        let mut catalog = self.lock();
        if catalog.templates.remove(id).is_none() {
            return Ok(false);
        }
        self.store.save_typed(TEMPLATES, &catalog.templates)?;
        Ok(true)
    }

    /// Install the built-in templates if no templates exist yet.
    ///
    /// Returns the number of templates created.
    pub fn install_default_templates(&self) -> Result<usize, EngineError> {
        if !self.lock().templates.is_empty() {
            return Ok(0);
        }
        let mut spec = WorkflowSpec::new("Standard Development Workflow", standard_development_phases())
            .with_id("standard-development");
        spec.description = "Standard workflow for project development".to_string();
        self.create_template(spec)?;
        Ok(1)
    }

    /// Instantiate a workflow from a template, deep-copying its phases.
    ///
    /// Empty `name`/`description` in `overrides` fall back to the template's.
    pub fn create_from_template(
        &self,
        template_id: &str,
        overrides: WorkflowSpec,
    ) -> Result<Workflow, EngineError> {
        let template = self
            .get_template(template_id)
            .ok_or_else(|| ConfigError::WorkflowTemplateNotFound {
                id: template_id.to_string(),
            })?;

        let spec = WorkflowSpec {
            id: overrides.id,
            name: if overrides.name.is_empty() {
                template.name
            } else {
                overrides.name
            },
            description: if overrides.description.is_empty() {
                template.description
            } else {
                overrides.description
            },
            project_id: overrides.project_id,
            phases: template.phases,
        };
        Self::validate(&spec.name, &spec.phases)?;
        self.insert_workflow(spec, Some(template_id.to_string()))
    }
}
