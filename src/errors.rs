//! Typed error hierarchy for the Depla orchestrator.
//!
//! Four top-level enums cover the subsystems:
//! - `ConfigError`: rejected workflow/template/project configuration
//! - `EngineError`: phase graph executor and queue failures surfaced to callers
//! - `StoreError`: state store read/write failures
//! - `EventError`: subscriber failures during event delivery
//!
//! Task bodies and queue processors report failure with `anyhow::Error`. Those
//! failures are recorded on the phase run or queue item and never surface here.

use thiserror::Error;

/// Configuration rejected at creation time (workflow creation or `start`).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Workflow {id} not found")]
    WorkflowNotFound { id: String },

    #[error("Workflow template {id} not found")]
    WorkflowTemplateNotFound { id: String },

    #[error("Template {reference} not found")]
    TemplateNotFound { reference: String },

    #[error("Project {id} not found")]
    ProjectNotFound { id: String },

    #[error("Duplicate phase name: {name}")]
    DuplicatePhase { name: String },

    #[error("Unknown dependency '{dependency}' in phase '{phase}': no phase with that name exists")]
    UnknownDependency { phase: String, dependency: String },

    #[error("Cycle detected in phase dependencies. Involved phases: {phases:?}")]
    CyclicDependency { phases: Vec<String> },

    #[error("Phase '{phase}' uses unknown task type '{task_type}'")]
    UnknownTaskType { phase: String, task_type: String },

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),
}

/// Errors from the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize collection '{collection}': {source}")]
    Serialization {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Data directory {path} is locked by another process")]
    Locked { path: std::path::PathBuf },
}

/// Errors surfaced by the executor and queues to their callers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Execution {id} not found")]
    ExecutionNotFound { id: String },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// Errors from synchronous event delivery.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Subscriber #{subscriber} failed while handling {event}: {source}")]
    SubscriberFailed {
        event: String,
        subscriber: usize,
        #[source]
        source: anyhow::Error,
    },
}
