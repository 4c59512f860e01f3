//! Configuration for Depla.
//!
//! Settings are layered, later layers winning:
//! 1. built-in defaults
//! 2. user config (`<config dir>/depla/depla.toml`)
//! 3. `<data dir>/depla.toml`
//! 4. environment (`DEPLA_LOG_LEVEL`, `GITHUB_TOKEN`, `DEPLA_GITHUB_API`)
//! 5. command-line flags
//!
//! # Configuration File Format
//!
//! ```toml
//! [log]
//! level = "info"
//! to_file = true
//!
//! [queue]
//! failure_policy = "drop"
//! history_limit = 100
//!
//! [github]
//! api_base = "https://api.github.com"
//! # token = "ghp_..."   (prefer the GITHUB_TOKEN environment variable)
//!
//! [templates]
//! dir = "templates"
//! ```

use crate::integrations::github::{DEFAULT_API_BASE, is_valid_github_token};
use crate::queue::{FailurePolicy, QueueOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "depla.toml";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write a daily-rotated log file under `<data dir>/logs`
    #[serde(default = "default_log_to_file")]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_to_file() -> bool {
    true
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: default_log_to_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_history_limit() -> usize {
    100
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_api_base(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatesSection {
    /// Template root; relative paths resolve against the data dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// The complete depla.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeplaToml {
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub templates: TemplatesSection,
}

impl DeplaToml {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse depla.toml")
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize depla.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if tracing_subscriber::EnvFilter::try_new(&self.log.level).is_err() {
            warnings.push(format!("Invalid log level '{}'", self.log.level));
        }
        if self.queue.history_limit == 0 {
            warnings.push("queue.history_limit is 0: using 1 so the last finished item is kept".into());
        }
        if let Some(token) = &self.github.token
            && !is_valid_github_token(token)
        {
            warnings.push("github.token does not look like a GitHub token".into());
        }
        if !self.github.api_base.starts_with("http") {
            warnings.push(format!(
                "github.api_base '{}' is not an http(s) URL",
                self.github.api_base
            ));
        }

        warnings
    }
}

/// Read a TOML file into a table, or `None` if it does not exist.
fn read_table(path: &Path) -> Result<Option<toml::Table>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let table = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(Some(table))
}

/// Deep-merge `overlay` into `base`; overlay values win.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub data_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub templates_dir: PathBuf,
    /// Effective settings after every layer is applied
    pub toml: DeplaToml,
    /// Config files that contributed, lowest precedence first
    pub sources: Vec<PathBuf>,
}

impl Config {
    /// Resolve configuration from the real environment and user config dir.
    pub fn load(cli: &CliOverrides) -> Result<Self> {
        let user_file = dirs::config_dir().map(|d| d.join("depla").join(CONFIG_FILE));
        Self::resolve(cli, user_file.as_deref(), &|key| std::env::var(key).ok())
    }

    /// Resolve configuration with explicit inputs.
    pub fn resolve(
        cli: &CliOverrides,
        user_file: Option<&Path>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| env("DEPLA_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let mut merged = toml::Table::new();
        let mut sources = Vec::new();
        let data_file = data_dir.join(CONFIG_FILE);
        for path in user_file.into_iter().chain(std::iter::once(data_file.as_path())) {
            if let Some(table) = read_table(path)? {
                merge_tables(&mut merged, table);
                sources.push(path.to_path_buf());
            }
        }
        let layered = toml::to_string(&merged).context("Failed to merge config files")?;
        let mut toml = DeplaToml::parse(&layered)?;

        if let Some(level) = env("DEPLA_LOG_LEVEL") {
            toml.log.level = level;
        }
        if let Some(token) = env("GITHUB_TOKEN").filter(|t| !t.is_empty()) {
            toml.github.token = Some(token);
        }
        if let Some(api_base) = env("DEPLA_GITHUB_API") {
            toml.github.api_base = api_base;
        }
        if let Some(level) = &cli.log_level {
            toml.log.level = level.clone();
        }

        let templates_dir = match &toml.templates.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => data_dir.join(dir),
            None => data_dir.join("templates"),
        };

        Ok(Self {
            log_dir: data_dir.join("logs"),
            templates_dir,
            data_dir,
            toml,
            sources,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    /// Queue settings; `history_limit` is at least 1.
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            failure_policy: self.toml.queue.failure_policy,
            history_limit: self.toml.queue.history_limit.max(1),
        }
    }

    pub fn github_token(&self) -> Option<String> {
        self.toml.github.token.clone()
    }

    /// Effective settings as TOML, with the token masked.
    pub fn render(&self) -> Result<String> {
        let mut shown = self.toml.clone();
        if let Some(token) = shown.github.token.as_mut() {
            let prefix: String = token.chars().take(4).collect();
            *token = format!("{prefix}****");
        }
        toml::to_string_pretty(&shown).context("Failed to serialize configuration")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
