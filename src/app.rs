//! Wires the stores, registries, executor and integrations for one data dir.

use crate::config::Config;
use crate::engine::{PhaseGraphExecutor, TaskRegistry};
use crate::events::EventBus;
use crate::integrations::{GitHubClient, GitHubIntegration};
use crate::projects::StoredProjectRepository;
use crate::store::{JsonFileStore, StateStore};
use crate::templates::FileTemplateResolver;
use crate::workflow::WorkflowRegistry;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Everything a command needs, opened against one data directory.
pub struct App {
    pub events: Arc<EventBus>,
    pub workflows: Arc<WorkflowRegistry>,
    pub projects: Arc<StoredProjectRepository>,
    pub templates: Arc<FileTemplateResolver>,
    pub executor: PhaseGraphExecutor,
    pub github: GitHubIntegration,
}

impl App {
    /// Open the data directory, taking its lock for the lifetime of the app.
    pub fn open(config: &Config) -> Result<Self> {
        let store: Arc<dyn StateStore> = Arc::new(
            JsonFileStore::open(&config.data_dir).with_context(|| {
                format!("Failed to open data dir: {}", config.data_dir.display())
            })?,
        );

        let events = Arc::new(EventBus::new());
        events.subscribe_all(|event| {
            tracing::info!(event = %event.kind, payload = %event.payload, "event");
            Ok(())
        });

        let workflows = Arc::new(
            WorkflowRegistry::load(Arc::clone(&store)).context("Failed to load workflows")?,
        );
        let installed = workflows.install_default_templates()?;
        if installed > 0 {
            tracing::info!(count = installed, "installed default workflow templates");
        }

        let projects = Arc::new(
            StoredProjectRepository::load(Arc::clone(&store)).context("Failed to load projects")?,
        );
        let templates = Arc::new(FileTemplateResolver::new(&config.templates_dir));

        let executor = PhaseGraphExecutor::new(
            Arc::clone(&workflows),
            projects.clone(),
            TaskRegistry::with_builtins(templates.clone()),
            Arc::clone(&store),
            events.clone(),
        )
        .context("Failed to restore executions")?;

        let client = GitHubClient::new(config.github_token(), &config.toml.github.api_base);
        let github = GitHubIntegration::open(
            store,
            Arc::new(client),
            events.clone(),
            config.queue_options(),
        )
        .context("Failed to open GitHub queues")?;

        Ok(Self {
            events,
            workflows,
            projects,
            templates,
            executor,
            github,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliOverrides;
    use crate::engine::{AdvanceOutcome, ExecutionStatus};
    use crate::events::EventKind;
    use crate::projects::Project;
    use crate::templates::install_default_templates;
    use crate::workflow::WorkflowSpec;
    use serde_json::Map;
    use tempfile::tempdir;

    fn config_for(dir: &std::path::Path) -> Config {
        let cli = CliOverrides {
            data_dir: Some(dir.to_path_buf()),
            ..Default::default()
        };
        Config::resolve(&cli, None, &|_| None).unwrap()
    }

    #[tokio::test]
    async fn test_standard_workflow_runs_end_to_end() {
        let dir = tempdir().unwrap();
        let config = config_for(dir.path());
        install_default_templates(&config.templates_dir).unwrap();

        let app = App::open(&config).unwrap();
        assert_eq!(app.events.subscriber_count(EventKind::PhaseCompleted), 1);
        app.projects
            .upsert(Project::new("p1", "Demo").with_repo_url("https://github.com/o/r"))
            .unwrap();
        let workflow = app
            .workflows
            .create_from_template(
                "standard-development",
                WorkflowSpec {
                    project_id: Some("p1".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let (execution, outcome) = app.executor.run(&workflow.id, Map::new()).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Completed);
        assert_eq!(execution.status, ExecutionStatus::Completed);

        let first = execution.phase("Structure Analysis").unwrap();
        let rendered = first.output.as_ref().unwrap()["rendered"].as_str().unwrap();
        assert!(rendered.contains("Demo"));
        assert!(rendered.contains("https://github.com/o/r"));
    }

    #[test]
    fn test_data_dir_is_locked_while_open() {
        let dir = tempdir().unwrap();
        let config = config_for(dir.path());
        let _app = App::open(&config).unwrap();
        assert!(App::open(&config).is_err());
    }
}
