//! Session preference persistence.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tabula_core::Result;

/// Most recently opened projects kept in the recent list.
pub const MAX_RECENT_PROJECTS: usize = 10;

pub mod keys {
    pub const LAST_PROJECT: &str = "database.last_project";
    pub const LAST_USER: &str = "database.last_user";
    pub const LAST_HOST: &str = "database.last_host";
    pub const LAST_PORT: &str = "database.last_port";
    pub const LAST_SSL: &str = "database.last_ssl";
    pub const RECENT_PROJECTS: &str = "database.recent_projects";
}

/// String key/value store for settings that survive restarts.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn put(&mut self, key: &str, value: &str) -> Result<()>;

    /// Push a name to the front of a comma-separated MRU list, deduped
    /// and capped at [`MAX_RECENT_PROJECTS`].
    fn push_recent(&mut self, key: &str, name: &str) -> Result<()> {
        let mut entries: Vec<String> = self
            .get(key)
            .map(|raw| {
                raw.split(',')
                    .filter(|entry| !entry.is_empty() && *entry != name)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        entries.insert(0, name.to_string());
        entries.truncate(MAX_RECENT_PROJECTS);
        self.put(key, &entries.join(","))
    }
}

/// File-backed store; the whole map is rewritten on every put.
#[derive(Debug)]
pub struct JsonPreferences {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonPreferences {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|err| tabula_core::TabulaError::Serialization(err.to_string()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, values })
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.values)
            .map_err(|err| tabula_core::TabulaError::Serialization(err.to_string()))?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl PreferenceStore for JsonPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_round_trip_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let mut prefs = JsonPreferences::load(&path).unwrap();
        prefs.put(keys::LAST_PROJECT, "flight_demo").unwrap();
        prefs.put(keys::LAST_PORT, "5433").unwrap();

        let reloaded = JsonPreferences::load(&path).unwrap();
        assert_eq!(
            reloaded.get(keys::LAST_PROJECT).as_deref(),
            Some("flight_demo")
        );
        assert_eq!(reloaded.get(keys::LAST_PORT).as_deref(), Some("5433"));
    }

    #[test]
    fn test_recent_list_dedupes_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefs = JsonPreferences::load(dir.path().join("p.json")).unwrap();

        for i in 0..12 {
            prefs
                .push_recent(keys::RECENT_PROJECTS, &format!("proj_{i}"))
                .unwrap();
        }
        prefs.push_recent(keys::RECENT_PROJECTS, "proj_5").unwrap();

        let raw = prefs.get(keys::RECENT_PROJECTS).unwrap();
        let entries: Vec<&str> = raw.split(',').collect();
        assert_eq!(entries.len(), MAX_RECENT_PROJECTS);
        assert_eq!(entries[0], "proj_5");
        assert_eq!(entries.iter().filter(|e| **e == "proj_5").count(), 1);
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = JsonPreferences::load(dir.path().join("absent.json")).unwrap();
        assert!(prefs.get(keys::LAST_USER).is_none());
    }
}
