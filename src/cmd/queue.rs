//! Queue and webhook commands: `depla queue`, `depla webhook`.

use anyhow::{Context, Result, bail};
use depla::app::App;
use depla::config::Config;
use depla::integrations::{PrRef, WebhookOutcome};
use depla::integrations::github::parse_owner_repo;
use depla::integrations::webhook::{ANALYSIS_QUEUE, MERGE_QUEUE};
use depla::queue::{DrainOutcome, EnqueueOutcome, QueuePayload, QueueStatus};
use std::path::Path;

use super::super::QueueCommands;

fn print_status<T: QueuePayload>(status: &QueueStatus<T>) {
    println!();
    println!("Queue {}", status.name);
    println!("{}", "=".repeat(status.name.len() + 6));
    if status.items.is_empty() {
        println!("  (empty)");
    }
    for (position, item) in status.items.iter().enumerate() {
        println!(
            "  {:>3}. {:<40} {:<10} attempts={}",
            position + 1,
            item.key(),
            item.status.as_str(),
            item.attempts
        );
    }

    if !status.history.is_empty() {
        println!();
        println!("Recent:");
        for item in status.history.iter().rev().take(10) {
            match &item.error {
                Some(error) => println!(
                    "  {:<40} {:<10} {}",
                    item.key(),
                    item.status.as_str(),
                    error
                ),
                None => println!("  {:<40} {}", item.key(), item.status.as_str()),
            }
        }
    }
}

fn print_outcomes(outcomes: &[DrainOutcome]) {
    let mut processed = 0;
    for outcome in outcomes {
        match outcome {
            DrainOutcome::Completed { key } => {
                println!("  ✓ {}", key);
                processed += 1;
            }
            DrainOutcome::Failed { key, error } => {
                println!("  ✗ {}: {}", key, error);
                processed += 1;
            }
            DrainOutcome::Busy => println!("  queue busy"),
            DrainOutcome::Empty => {}
        }
    }
    println!("Processed {} item(s).", processed);
}

pub async fn cmd_queue(config: &Config, command: &QueueCommands) -> Result<()> {
    let app = App::open(config)?;
    let github = &app.github;

    match command {
        QueueCommands::Status { name } => match name.as_str() {
            ANALYSIS_QUEUE => print_status(&github.analysis_queue().status()),
            MERGE_QUEUE => print_status(&github.merge_queue().status()),
            other => bail!(
                "Unknown queue '{}' (expected {} or {})",
                other,
                ANALYSIS_QUEUE,
                MERGE_QUEUE
            ),
        },
        QueueCommands::Enqueue {
            repo,
            pull_number,
            auto_merge,
        } => {
            let Some((owner, name)) = parse_owner_repo(repo) else {
                bail!("Invalid repository '{}': expected owner/repo or a GitHub URL", repo);
            };
            let mut item = PrRef::new(&owner, &name, *pull_number);
            if *auto_merge {
                item.auto_merge = Some(true);
            }
            let key = item.natural_key();
            match github.analysis_queue().enqueue(item)? {
                EnqueueOutcome::Appended { position } => {
                    println!("Queued {} at position {}", key, position + 1)
                }
                EnqueueOutcome::Merged { position } => {
                    println!("Updated {} at position {}", key, position + 1)
                }
            }
        }
        QueueCommands::Drain { name, all } => {
            let outcomes = match (name.as_deref(), *all) {
                (None, true) => github.process_queues().await,
                (None, false) => vec![
                    github.analysis_queue().drain().await,
                    github.merge_queue().drain().await,
                ],
                (Some(ANALYSIS_QUEUE), true) => github.analysis_queue().drain_all().await,
                (Some(ANALYSIS_QUEUE), false) => vec![github.analysis_queue().drain().await],
                (Some(MERGE_QUEUE), true) => github.merge_queue().drain_all().await,
                (Some(MERGE_QUEUE), false) => vec![github.merge_queue().drain().await],
                (Some(other), _) => bail!("Unknown queue '{}'", other),
            };
            print_outcomes(&outcomes);
        }
    }

    Ok(())
}

pub fn cmd_webhook(config: &Config, event: &str, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON payload: {}", file.display()))?;

    let app = App::open(config)?;
    match app.github.handle_webhook(event, &payload)? {
        WebhookOutcome::Ignored => println!("Ignored {} event", event),
        WebhookOutcome::PullRequestQueued { event, key } => {
            println!("{}: queued {} for analysis", event, key)
        }
        WebhookOutcome::BranchCreated { branch } => println!("Branch created: {}", branch),
    }
    Ok(())
}
