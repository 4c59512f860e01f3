//! Task bodies: the unit of work a phase runs.
//!
//! A phase's `task_type` selects a body from the [`TaskRegistry`]. Bodies
//! report failure with `anyhow::Error`; the executor records the message on
//! the phase and never propagates it.

use crate::phase::PhaseDefinition;
use crate::templates::TemplateResolver;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Everything a task body can see about the phase it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub phase: PhaseDefinition,
    /// Snapshot of the execution context at the time the phase started.
    pub context: Map<String, Value>,
}

impl TaskContext {
    /// Context values as template variables. Strings are used as-is; other
    /// values are serialized as JSON.
    pub fn variables(&self) -> HashMap<String, String> {
        self.context
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect()
    }
}

#[async_trait]
pub trait TaskBody: Send + Sync {
    async fn run(&self, ctx: &TaskContext) -> Result<Option<Value>>;
}

/// Succeeds immediately with no output.
pub struct NoopTask;

#[async_trait]
impl TaskBody for NoopTask {
    async fn run(&self, ctx: &TaskContext) -> Result<Option<Value>> {
        tracing::debug!(phase = %ctx.phase.name, "noop task");
        Ok(None)
    }
}

/// Renders the phase's template with the execution context.
pub struct RenderTemplateTask {
    resolver: Arc<dyn TemplateResolver>,
}

impl RenderTemplateTask {
    pub fn new(resolver: Arc<dyn TemplateResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl TaskBody for RenderTemplateTask {
    async fn run(&self, ctx: &TaskContext) -> Result<Option<Value>> {
        let Some(template) = ctx.phase.template.as_deref() else {
            bail!("phase '{}' has no template reference", ctx.phase.name);
        };
        let mut variables = ctx.variables();
        variables
            .entry("phase".to_string())
            .or_insert_with(|| ctx.phase.name.clone());
        let rendered = self
            .resolver
            .render(template, &variables)
            .with_context(|| format!("Failed to render template {template}"))?;
        Ok(Some(json!({ "rendered": rendered })))
    }
}

/// Maps task type names to bodies.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    bodies: BTreeMap<String, Arc<dyn TaskBody>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `noop` and `render_template`.
    pub fn with_builtins(resolver: Arc<dyn TemplateResolver>) -> Self {
        let mut registry = Self::new();
        registry.register("noop", NoopTask);
        registry.register("render_template", RenderTemplateTask::new(resolver));
        registry
    }

    pub fn register(&mut self, task_type: &str, body: impl TaskBody + 'static) {
        self.bodies.insert(task_type.to_string(), Arc::new(body));
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskBody>> {
        self.bodies.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.bodies.contains_key(task_type)
    }

    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.bodies.keys().map(String::as_str)
    }
}
