//! Workflow and template commands: `depla workflow`, `depla template`.

use anyhow::{Context, Result, bail};
use depla::app::App;
use depla::config::Config;
use depla::workflow::{PhaseGraph, Workflow, WorkflowSpec};

use super::super::{TemplateCommands, WorkflowCommands};

pub fn cmd_workflow(config: &Config, command: &WorkflowCommands) -> Result<()> {
    let app = App::open(config)?;

    match command {
        WorkflowCommands::Create { file } => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let spec: WorkflowSpec = serde_json::from_str(&content)
                .with_context(|| format!("Invalid workflow definition: {}", file.display()))?;
            let workflow = app.workflows.create_workflow(spec)?;
            println!("Created workflow {} ({})", workflow.id, workflow.name);
        }
        WorkflowCommands::List => {
            let workflows = app.workflows.list_workflows();
            if workflows.is_empty() {
                println!("No workflows.");
                return Ok(());
            }
            for workflow in workflows {
                println!(
                    "{:<38} {:<32} {} phase(s)",
                    workflow.id,
                    workflow.name,
                    workflow.phases.len()
                );
            }
        }
        WorkflowCommands::Show { id } => {
            let Some(workflow) = app.workflows.get_workflow(id) else {
                bail!("Workflow not found: {}", id);
            };
            print_workflow(&workflow)?;
        }
        WorkflowCommands::Delete { id } => {
            if app.workflows.delete_workflow(id)? {
                println!("Deleted workflow {}", id);
            } else {
                bail!("Workflow not found: {}", id);
            }
        }
        WorkflowCommands::FromTemplate {
            template,
            name,
            project,
        } => {
            let overrides = WorkflowSpec {
                name: name.clone().unwrap_or_default(),
                project_id: project.clone(),
                ..Default::default()
            };
            let workflow = app.workflows.create_from_template(template, overrides)?;
            println!(
                "Created workflow {} ({}) from template {}",
                workflow.id, workflow.name, template
            );
        }
    }

    Ok(())
}

fn print_workflow(workflow: &Workflow) -> Result<()> {
    println!();
    println!("{}", workflow.name);
    println!("{}", "=".repeat(workflow.name.len()));
    println!("id:      {}", workflow.id);
    if !workflow.description.is_empty() {
        println!("about:   {}", workflow.description);
    }
    if let Some(project) = &workflow.project_id {
        println!("project: {}", project);
    }
    if let Some(template) = &workflow.template_id {
        println!("template: {}", template);
    }
    println!();

    let graph = PhaseGraph::build(&workflow.phases)?;
    for (wave, names) in graph.compute_waves().iter().enumerate() {
        println!("Wave {}:", wave + 1);
        for name in names {
            let Some(phase) = graph.get_phase(name) else {
                continue;
            };
            let deps = if phase.dependencies.is_empty() {
                String::new()
            } else {
                let mut deps: Vec<_> = phase.dependencies.iter().cloned().collect();
                deps.sort();
                format!(" (after {})", deps.join(", "))
            };
            println!("  {} [{}]{}", phase.name, phase.task_type, deps);
        }
    }
    Ok(())
}

pub fn cmd_template(config: &Config, command: &TemplateCommands) -> Result<()> {
    let app = App::open(config)?;

    match command {
        TemplateCommands::List => {
            println!("Workflow templates:");
            for template in app.workflows.list_templates() {
                println!(
                    "  {:<28} {} ({} phases)",
                    template.id,
                    template.name,
                    template.phases.len()
                );
            }
            println!();

            let texts = app.templates.list();
            println!("Text templates in {}:", app.templates.dir().display());
            if texts.is_empty() {
                println!("  (none; run `depla init`)");
            }
            for reference in texts {
                let variables = app.templates.variables(&reference)?;
                if variables.is_empty() {
                    println!("  {}", reference);
                } else {
                    println!("  {:<34} {{{{ {} }}}}", reference, variables.join(" }} {{ "));
                }
            }
        }
    }

    Ok(())
}
