//! Data directory setup and project commands: `depla init`, `depla project`.

use anyhow::{Context, Result};
use depla::app::App;
use depla::config::{Config, DeplaToml};
use depla::projects::Project;
use depla::templates::install_default_templates;

use super::super::ProjectCommands;

pub fn cmd_init(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.data_dir.display()
        )
    })?;

    let config_path = config.config_file();
    if config_path.exists() {
        println!("Config exists:    {}", config_path.display());
    } else {
        DeplaToml::default().save(&config_path)?;
        println!("Created config:   {}", config_path.display());
    }

    let created = install_default_templates(&config.templates_dir).with_context(|| {
        format!(
            "Failed to write templates to {}",
            config.templates_dir.display()
        )
    })?;
    println!(
        "Templates:        {} ({} created)",
        config.templates_dir.display(),
        created
    );

    // Opening the app installs the built-in workflow templates.
    let app = App::open(config)?;
    println!(
        "Workflow templates: {}",
        app.workflows.list_templates().len()
    );
    println!();
    println!("Initialized depla in {}", config.data_dir.display());

    Ok(())
}

pub fn cmd_project(config: &Config, command: &ProjectCommands) -> Result<()> {
    let app = App::open(config)?;

    match command {
        ProjectCommands::Add { id, name, repo_url } => {
            let mut project = Project::new(id, name);
            if let Some(url) = repo_url {
                project = project.with_repo_url(url);
            }
            let project = app.projects.upsert(project)?;
            println!("Saved project {} ({})", project.id, project.name);
        }
        ProjectCommands::List => {
            let projects = app.projects.list();
            if projects.is_empty() {
                println!("No projects.");
                return Ok(());
            }
            for project in projects {
                match &project.repo_url {
                    Some(url) => println!("{:<20} {:<30} {}", project.id, project.name, url),
                    None => println!("{:<20} {}", project.id, project.name),
                }
            }
        }
    }

    Ok(())
}
