//! Project lookup for workflows that name a project.

use crate::errors::EngineError;
use crate::store::StateStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const PROJECTS: &str = "projects";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            repo_url: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_repo_url(mut self, url: &str) -> Self {
        self.repo_url = Some(url.to_string());
        self
    }
}

/// Read access the executor needs to seed execution context.
pub trait ProjectRepository: Send + Sync {
    fn get(&self, id: &str) -> Option<Project>;
}

/// Projects persisted in the `projects` collection.
pub struct StoredProjectRepository {
    store: Arc<dyn StateStore>,
    projects: Mutex<BTreeMap<String, Project>>,
}

impl StoredProjectRepository {
    pub fn load(store: Arc<dyn StateStore>) -> Result<Self, EngineError> {
        let projects = store.load_or_default(PROJECTS)?;
        Ok(Self {
            store,
            projects: Mutex::new(projects),
        })
    }

    /// Insert or replace a project by id.
    pub fn upsert(&self, mut project: Project) -> Result<Project, EngineError> {
        project.updated_at = Utc::now();
        let mut projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        projects.insert(project.id.clone(), project.clone());
        self.store.save_typed(PROJECTS, &*projects)?;
        Ok(project)
    }

    pub fn list(&self) -> Vec<Project> {
        let projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        projects.values().cloned().collect()
    }
}

impl ProjectRepository for StoredProjectRepository {
    fn get(&self, id: &str) -> Option<Project> {
        let projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        projects.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_upsert_get_and_reload() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let repo = StoredProjectRepository::load(Arc::clone(&store)).unwrap();
        assert!(repo.get("p1").is_none());

        repo.upsert(Project::new("p1", "Depla").with_repo_url("https://github.com/acme/depla"))
            .unwrap();
        repo.upsert(Project::new("p1", "Depla Renamed")).unwrap();

        let reloaded = StoredProjectRepository::load(store).unwrap();
        let project = reloaded.get("p1").unwrap();
        assert_eq!(project.name, "Depla Renamed");
        assert!(project.repo_url.is_none());
        assert_eq!(reloaded.list().len(), 1);
    }
}
