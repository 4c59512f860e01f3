//! Text templates with `{{ key }}` placeholders.
//!
//! Templates live on disk as `<dir>/<category>/<name>.template` and are
//! addressed by a `category/name` reference.

use crate::errors::ConfigError;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

// Compile regexes once using LazyLock
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").unwrap());

static LEFTOVER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{.*?\}\}").unwrap());

/// Resolves a template reference and renders it with variables.
pub trait TemplateResolver: Send + Sync {
    fn render(
        &self,
        template_ref: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String, ConfigError>;
}

/// Substitute `{{ key }}` placeholders and strip any that have no value.
pub fn render_str(source: &str, variables: &HashMap<String, String>) -> String {
    let substituted = PLACEHOLDER.replace_all(source, |caps: &regex::Captures<'_>| {
        match variables.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        }
    });
    LEFTOVER.replace_all(&substituted, "").into_owned()
}

/// Placeholder names in first-appearance order, without duplicates.
pub fn placeholder_names(source: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    PLACEHOLDER
        .captures_iter(source)
        .filter_map(|caps| {
            let name = caps[1].to_string();
            seen.insert(name.clone()).then_some(name)
        })
        .collect()
}

/// Reads templates from a directory tree.
#[derive(Debug, Clone)]
pub struct FileTemplateResolver {
    dir: PathBuf,
}

impl FileTemplateResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, template_ref: &str) -> Result<PathBuf, ConfigError> {
        let not_found = || ConfigError::TemplateNotFound {
            reference: template_ref.to_string(),
        };
        let (category, name) = template_ref.split_once('/').ok_or_else(not_found)?;
        let valid = |part: &str| {
            !part.is_empty() && part != "." && part != ".." && !part.contains(['/', '\\'])
        };
        if !valid(category) || !valid(name) {
            return Err(not_found());
        }
        Ok(self.dir.join(category).join(format!("{name}.template")))
    }

    /// Load the raw template text.
    pub fn load(&self, template_ref: &str) -> Result<String, ConfigError> {
        let path = self.path_for(template_ref)?;
        std::fs::read_to_string(&path).map_err(|_| ConfigError::TemplateNotFound {
            reference: template_ref.to_string(),
        })
    }

    /// Names of the placeholders a template expects.
    pub fn variables(&self, template_ref: &str) -> Result<Vec<String>, ConfigError> {
        Ok(placeholder_names(&self.load(template_ref)?))
    }

    /// All `category/name` references available, sorted.
    pub fn list(&self) -> Vec<String> {
        let Ok(categories) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut refs = Vec::new();
        for category in categories.flatten() {
            if !category.path().is_dir() {
                continue;
            }
            let Ok(entries) = std::fs::read_dir(category.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "template")
                    && let Some(stem) = path.file_stem()
                {
                    refs.push(format!(
                        "{}/{}",
                        category.file_name().to_string_lossy(),
                        stem.to_string_lossy()
                    ));
                }
            }
        }
        refs.sort();
        refs
    }
}

/// Starter templates referenced by the standard development workflow.
pub const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (
        "analysis/structure-current",
        "Analyze the current structure of {{ projectName }}.\n\nRepository: {{ repoUrl }}\n",
    ),
    (
        "analysis/structure-suggested",
        "Suggest features for {{ projectName }} based on its current structure.\n",
    ),
    (
        "implementation/steps",
        "Break the suggested features for {{ projectName }} into implementation steps.\n",
    ),
    (
        "implementation/feature",
        "Implement the next step for {{ projectName }} ({{ phase }}).\n",
    ),
    (
        "validation/feature",
        "Validate the implemented features of {{ projectName }}.\n",
    ),
];

/// Write [`DEFAULT_TEMPLATES`] under `dir`, leaving existing files alone.
/// Returns how many files were created.
pub fn install_default_templates(dir: &Path) -> std::io::Result<usize> {
    let mut created = 0;
    for (reference, body) in DEFAULT_TEMPLATES {
        let Some((category, name)) = reference.split_once('/') else {
            continue;
        };
        let path = dir.join(category).join(format!("{name}.template"));
        if path.exists() {
            continue;
        }
        std::fs::create_dir_all(dir.join(category))?;
        std::fs::write(&path, body)?;
        created += 1;
    }
    Ok(created)
}

impl TemplateResolver for FileTemplateResolver {
    fn render(
        &self,
        template_ref: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String, ConfigError> {
        let source = self.load(template_ref)?;
        tracing::debug!(template = %template_ref, "rendering template");
        Ok(render_str(&source, variables))
    }
}
