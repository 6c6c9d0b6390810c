//! Persisted local settings.
//!
//! A small JSON file maps string keys to JSON values. It has a single
//! writer (the control loop) and is rewritten in full on every change.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::project::ProjectSettings;

const STORE_FILE: &str = "settings.json";
pub const RECENT_PROJECTS_KEY: &str = "recentProjects";
pub const MAX_RECENT_PROJECTS: usize = 4;

#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl SettingsStore {
    /// Opens the store at `path`. A missing file is an empty store; an
    /// unreadable one is logged and replaced on the next write.
    pub fn open(path: PathBuf) -> Result<Self> {
        let values = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(values) => values,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "discarding unreadable settings store");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to read settings store {}", path.display())))
            }
        };
        Ok(Self { path, values })
    }

    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("swatplus-shell").join(STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.remove(key);
        self.values.insert(key.to_string(), value);
        self.persist()
    }

    /// Removes `key`; returns whether it was present.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        if self.values.remove(key).is_none() {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(&self.values)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// Recent projects, most recent first. A value that no longer parses
    /// is dropped from the store.
    pub fn recent_projects(&mut self) -> Vec<ProjectSettings> {
        let Some(value) = self.values.get(RECENT_PROJECTS_KEY) else {
            return Vec::new();
        };
        match serde_json::from_value(value.clone()) {
            Ok(projects) => projects,
            Err(err) => {
                tracing::warn!(error = %err, "dropping unreadable recent projects");
                if let Err(err) = self.delete(RECENT_PROJECTS_KEY) {
                    tracing::warn!(error = %err, "failed to drop recent projects");
                }
                Vec::new()
            }
        }
    }

    pub fn most_recent_project(&mut self) -> Option<ProjectSettings> {
        self.recent_projects().into_iter().next()
    }

    /// Moves `project` to the front, replacing any entry with the same
    /// database path, and keeps at most four entries.
    pub fn push_recent_project(&mut self, project: ProjectSettings) -> Result<Vec<ProjectSettings>> {
        let mut recent = self.recent_projects();
        recent.retain(|p| p.project_db != project.project_db);
        recent.insert(0, project);
        recent.truncate(MAX_RECENT_PROJECTS);
        self.set(RECENT_PROJECTS_KEY, serde_json::to_value(&recent)?)?;
        Ok(recent)
    }

    pub fn delete_recent_project(&mut self, project_db: Option<&str>) -> Result<Vec<ProjectSettings>> {
        let mut recent = self.recent_projects();
        recent.retain(|p| p.project_db.as_deref() != project_db);
        self.set(RECENT_PROJECTS_KEY, serde_json::to_value(&recent)?)?;
        Ok(recent)
    }
}

fn config_dir() -> Option<PathBuf> {
    if let Ok(path) = env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(path));
    }
    if cfg!(windows) {
        return env::var("APPDATA").ok().map(PathBuf::from);
    }
    env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".config"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project(db: &str) -> ProjectSettings {
        ProjectSettings {
            project_db: Some(db.to_string()),
            name: Some(db.trim_end_matches(".sqlite").to_string()),
            version: Some("3.0.0".to_string()),
            ..ProjectSettings::default()
        }
    }

    fn names(projects: &[ProjectSettings]) -> Vec<&str> {
        projects
            .iter()
            .map(|p| p.project_db.as_deref().unwrap())
            .collect()
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut store = SettingsStore::open(path.clone()).unwrap();
        store.set("theme", json!("dark")).unwrap();
        store.set("zoom", json!({ "level": 2 })).unwrap();
        assert!(store.delete("zoom").unwrap());
        assert!(!store.delete("zoom").unwrap());

        let reopened = SettingsStore::open(path).unwrap();
        assert_eq!(reopened.get("theme"), Some(&json!("dark")));
        assert_eq!(reopened.get("zoom"), None);
    }

    #[test]
    fn corrupt_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = SettingsStore::open(path).unwrap();
        assert!(store.get(RECENT_PROJECTS_KEY).is_none());
    }

    #[test]
    fn recent_projects_are_capped_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SettingsStore::open(dir.path().join("s.json")).unwrap();
        for db in ["a.sqlite", "b.sqlite", "c.sqlite", "d.sqlite", "e.sqlite"] {
            store.push_recent_project(project(db)).unwrap();
        }
        let recent = store.recent_projects();
        assert_eq!(recent.len(), MAX_RECENT_PROJECTS);
        assert_eq!(
            names(&recent),
            vec!["e.sqlite", "d.sqlite", "c.sqlite", "b.sqlite"]
        );

        let recent = store.push_recent_project(project("c.sqlite")).unwrap();
        assert_eq!(
            names(&recent),
            vec!["c.sqlite", "e.sqlite", "d.sqlite", "b.sqlite"]
        );
        assert_eq!(
            store.most_recent_project().unwrap().project_db.as_deref(),
            Some("c.sqlite")
        );
    }

    #[test]
    fn delete_recent_project_filters_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SettingsStore::open(dir.path().join("s.json")).unwrap();
        store.push_recent_project(project("a.sqlite")).unwrap();
        store.push_recent_project(project("b.sqlite")).unwrap();
        let recent = store.delete_recent_project(Some("a.sqlite")).unwrap();
        assert_eq!(names(&recent), vec!["b.sqlite"]);
    }

    #[test]
    fn unreadable_recent_projects_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SettingsStore::open(dir.path().join("s.json")).unwrap();
        store.set(RECENT_PROJECTS_KEY, json!("garbage")).unwrap();
        assert!(store.recent_projects().is_empty());
        assert!(store.get(RECENT_PROJECTS_KEY).is_none());
    }
}
