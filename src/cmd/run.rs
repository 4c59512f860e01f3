//! Execution commands: `depla run`, `depla executions`, `depla resume`.

use anyhow::{Result, bail};
use depla::app::App;
use depla::config::Config;
use depla::engine::{AdvanceOutcome, Execution};
use depla::phase::PhaseStatus;
use serde_json::{Map, Value};

/// Parse `key=value` pairs. Values that parse as JSON keep their type.
fn parse_context(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut context = Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid context '{}': expected KEY=VALUE", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid context '{}': empty key", pair);
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));
        context.insert(key.to_string(), value);
    }
    Ok(context)
}

fn describe(outcome: &AdvanceOutcome) -> String {
    match outcome {
        AdvanceOutcome::Idle => "idle".to_string(),
        AdvanceOutcome::Blocked { phase, waiting_on } => {
            format!("blocked: {} waits on {}", phase, waiting_on.join(", "))
        }
        AdvanceOutcome::Completed => "completed".to_string(),
        AdvanceOutcome::Failed { phase, error } => format!("failed in {}: {}", phase, error),
    }
}

fn print_summary(execution: &Execution) {
    let (done, total) = execution.progress();
    println!(
        "{:<38} {:<10} {}/{} {}",
        execution.id,
        execution.status.as_str(),
        done,
        total,
        execution.started_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn marker(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Completed => "✓",
        PhaseStatus::Failed => "✗",
        PhaseStatus::Running => "…",
        PhaseStatus::Pending => " ",
    }
}

fn print_detail(execution: &Execution) {
    println!();
    println!("Execution {}", execution.id);
    println!("  workflow: {}", execution.workflow_id);
    println!("  status:   {}", execution.status);
    if let Some(error) = &execution.error {
        println!("  error:    {}", error);
    }
    println!();
    for phase in &execution.phases {
        println!(
            "  [{}] {} ({})",
            marker(phase.status),
            phase.name(),
            phase.status.as_str()
        );
        if let Some(error) = &phase.error {
            println!("        {}", error);
        }
    }
}

pub async fn cmd_run(config: &Config, workflow_id: &str, pairs: &[String]) -> Result<()> {
    let context = parse_context(pairs)?;
    let app = App::open(config)?;

    let (execution, outcome) = app.executor.run(workflow_id, context).await?;
    print_detail(&execution);
    println!();
    println!("Execution {} {}", execution.id, describe(&outcome));

    if let AdvanceOutcome::Failed { phase, .. } = &outcome {
        bail!("Execution {} failed at phase {}", execution.id, phase);
    }
    Ok(())
}

pub fn cmd_executions(config: &Config, id: Option<&str>) -> Result<()> {
    let app = App::open(config)?;

    match id {
        Some(id) => {
            let Some(execution) = app.executor.get_execution(id) else {
                bail!("Execution not found: {}", id);
            };
            print_detail(&execution);
        }
        None => {
            let executions = app.executor.all_executions();
            if executions.is_empty() {
                println!("No executions.");
            }
            for execution in &executions {
                print_summary(execution);
            }
        }
    }
    Ok(())
}

pub async fn cmd_resume(config: &Config) -> Result<()> {
    let app = App::open(config)?;

    let results = app.executor.resume_all().await;
    if results.is_empty() {
        println!("Nothing to resume.");
        return Ok(());
    }

    let mut errors = 0;
    for (id, result) in results {
        match result {
            Ok(outcome) => println!("{} {}", id, describe(&outcome)),
            Err(e) => {
                println!("{} error: {}", id, e);
                errors += 1;
            }
        }
    }
    if errors > 0 {
        bail!("{} execution(s) could not be resumed", errors);
    }
    Ok(())
}
