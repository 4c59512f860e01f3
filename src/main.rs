use anyhow::Result;
use clap::{Parser, Subcommand};
use depla::config::{CliOverrides, Config};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "depla")]
#[command(version, about = "Workflow phase executor and durable work queues")]
pub struct Cli {
    /// Data directory (default: ./data, or DEPLA_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. "debug", "depla=trace")
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory, default config and starter templates
    Init,
    /// Manage workflows
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
    /// Manage workflow templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Start an execution of a workflow and drive it until it stops
    Run {
        /// Workflow id
        workflow: String,
        /// Context values as key=value (repeatable)
        #[arg(short, long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },
    /// List executions, or show one in detail
    Executions {
        /// Execution id
        id: Option<String>,
    },
    /// Continue every running execution
    Resume,
    /// Inspect and drive the durable work queues
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Feed a GitHub webhook payload from a file
    Webhook {
        /// Event name, as in the X-GitHub-Event header
        event: String,
        /// JSON payload file
        file: PathBuf,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum WorkflowCommands {
    /// Create a workflow from a JSON definition file
    Create { file: PathBuf },
    List,
    Show { id: String },
    Delete { id: String },
    /// Create a workflow from a workflow template
    FromTemplate {
        template: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum TemplateCommands {
    /// List workflow templates and text templates
    List,
}

#[derive(Subcommand, Clone)]
pub enum ProjectCommands {
    Add {
        id: String,
        name: String,
        #[arg(long)]
        repo_url: Option<String>,
    },
    List,
}

#[derive(Subcommand, Clone)]
pub enum QueueCommands {
    /// Show queued items and recent history
    Status {
        /// pr-analysis or merge
        name: String,
    },
    /// Queue a pull request for analysis
    Enqueue {
        /// owner/repo or a GitHub URL
        repo: String,
        pull_number: u64,
        /// Merge after analysis even without the auto-merge keyword
        #[arg(long)]
        auto_merge: bool,
    },
    /// Process queued items
    Drain {
        /// Only this queue (default: analysis, then merge)
        name: Option<String>,
        /// Keep going until the queue is empty
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration files
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let overrides = CliOverrides {
        data_dir: cli.data_dir.clone(),
        log_level: match (&cli.log_level, cli.verbose) {
            (Some(level), _) => Some(level.clone()),
            (None, true) => Some("debug".to_string()),
            (None, false) => None,
        },
    };
    let config = Config::load(&overrides)?;
    let _log_guard = depla::logging::init(&config);

    match &cli.command {
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::Workflow { command } => cmd::cmd_workflow(&config, command)?,
        Commands::Template { command } => cmd::cmd_template(&config, command)?,
        Commands::Project { command } => cmd::cmd_project(&config, command)?,
        Commands::Run { workflow, context } => cmd::cmd_run(&config, workflow, context).await?,
        Commands::Executions { id } => cmd::cmd_executions(&config, id.as_deref())?,
        Commands::Resume => cmd::cmd_resume(&config).await?,
        Commands::Queue { command } => cmd::cmd_queue(&config, command).await?,
        Commands::Webhook { event, file } => cmd::cmd_webhook(&config, event, file)?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
