//! Persisted per-plugin settings.
//!
//! Each plugin's user settings live in `<config_root>/<name>.yaml`. Loaded
//! configs are cached; every write goes through the store so the cache is
//! refreshed or invalidated alongside the file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use kestrel_core::{ConfigValue, PluginConfig};

use crate::types::{PluginError, PluginResult};

/// File-backed, cached store of per-plugin settings.
#[derive(Debug)]
pub struct ConfigStore {
    root: PathBuf,
    cache: Mutex<HashMap<String, PluginConfig>>,
}

impl ConfigStore {
    /// Create a store rooted at `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the settings files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a plugin's settings file.
    pub fn config_path(&self, plugin: &str) -> PathBuf {
        self.root.join(format!("{plugin}.yaml"))
    }

    /// Load a plugin's settings, from cache when possible.
    ///
    /// A missing file is an empty config.
    pub fn load_config(&self, plugin: &str) -> PluginResult<PluginConfig> {
        if let Some(cached) = self.lock().get(plugin) {
            return Ok(cached.clone());
        }

        let path = self.config_path(plugin);
        let config = match fs::read_to_string(&path) {
            Ok(content) => PluginConfig::from_yaml(&content).map_err(|e| {
                PluginError::config(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PluginConfig::default(),
            Err(e) => return Err(e.into()),
        };

        self.lock().insert(plugin.to_string(), config.clone());
        Ok(config)
    }

    /// Write a plugin's settings and refresh the cache.
    pub fn save_config(&self, plugin: &str, config: &PluginConfig) -> PluginResult<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.config_path(plugin);
        fs::write(&path, config.to_yaml()?)?;
        self.lock().insert(plugin.to_string(), config.clone());
        tracing::debug!(plugin, path = %path.display(), keys = config.len(), "Saved plugin config");
        Ok(())
    }

    /// Read one value.
    pub fn get_value(&self, plugin: &str, key: &str) -> PluginResult<Option<ConfigValue>> {
        Ok(self.load_config(plugin)?.get(key).cloned())
    }

    /// Set one value and persist.
    pub fn set_value(&self, plugin: &str, key: &str, value: ConfigValue) -> PluginResult<()> {
        let mut config = self.load_config(plugin)?;
        config.set(key, value);
        self.save_config(plugin, &config)
    }

    /// Remove one key and persist. Returns whether the key existed.
    pub fn remove_value(&self, plugin: &str, key: &str) -> PluginResult<bool> {
        let mut config = self.load_config(plugin)?;
        let existed = config.remove(key).is_some();
        if existed {
            self.save_config(plugin, &config)?;
        }
        Ok(existed)
    }

    /// Empty a plugin's settings, keeping the file.
    pub fn reset_config(&self, plugin: &str) -> PluginResult<()> {
        self.save_config(plugin, &PluginConfig::default())
    }

    /// Delete a plugin's settings file and forget the cached copy.
    pub fn delete_config(&self, plugin: &str) -> PluginResult<()> {
        self.invalidate(plugin);
        match fs::remove_file(self.config_path(plugin)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the cached copy so the next load rereads the file.
    pub fn invalidate(&self, plugin: &str) {
        self.lock().remove(plugin);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PluginConfig>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path());
        assert!(store.load_config("echo").unwrap().is_empty());
        assert_eq!(store.get_value("echo", "x").unwrap(), None);
    }

    #[test]
    fn test_set_get_round_trip_keeps_types() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("config"));

        let values = [
            ("s", ConfigValue::String("text".into())),
            ("b", ConfigValue::Bool(true)),
            ("i", ConfigValue::Integer(42)),
            ("f", ConfigValue::Float(1.5)),
        ];
        for (key, value) in &values {
            store.set_value("echo", key, value.clone()).unwrap();
        }
        for (key, value) in &values {
            assert_eq!(store.get_value("echo", key).unwrap().as_ref(), Some(value));
        }

        // A fresh store reads the same map back from disk.
        let reloaded = ConfigStore::new(temp.path().join("config"));
        assert_eq!(
            reloaded.load_config("echo").unwrap(),
            store.load_config("echo").unwrap()
        );
    }

    #[test]
    fn test_remove_value_persists() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path());
        store.set_value("echo", "keep", ConfigValue::Integer(1)).unwrap();
        store.set_value("echo", "drop", ConfigValue::Integer(2)).unwrap();

        assert!(store.remove_value("echo", "drop").unwrap());
        assert!(!store.remove_value("echo", "drop").unwrap());
        assert!(!store.remove_value("echo", "never-set").unwrap());

        let reopened = ConfigStore::new(temp.path());
        assert_eq!(reopened.get_value("echo", "drop").unwrap(), None);
        assert_eq!(
            reopened.get_value("echo", "keep").unwrap(),
            Some(ConfigValue::Integer(1))
        );
    }

    #[test]
    fn test_reset_empties_keys() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path());
        store.set_value("echo", "k", ConfigValue::Integer(1)).unwrap();
        store.reset_config("echo").unwrap();

        assert!(store.load_config("echo").unwrap().is_empty());
        assert!(store.config_path("echo").exists());
    }

    #[test]
    fn test_delete_removes_file_and_cache() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path());
        store.set_value("echo", "k", ConfigValue::Bool(false)).unwrap();
        store.delete_config("echo").unwrap();

        assert!(!store.config_path("echo").exists());
        assert!(store.load_config("echo").unwrap().is_empty());
        store.delete_config("never-saved").unwrap();
    }

    #[test]
    fn test_invalidate_rereads_file() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path());
        store.set_value("echo", "k", ConfigValue::Integer(1)).unwrap();

        fs::write(store.config_path("echo"), "k:\n  type: int\n  value: 9\n").unwrap();
        assert_eq!(store.get_value("echo", "k").unwrap(), Some(ConfigValue::Integer(1)));

        store.invalidate("echo");
        assert_eq!(store.get_value("echo", "k").unwrap(), Some(ConfigValue::Integer(9)));
    }

    #[test]
    fn test_corrupt_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path());
        fs::write(store.config_path("echo"), "k: [1, 2").unwrap();
        assert!(matches!(
            store.load_config("echo"),
            Err(PluginError::Config { .. })
        ));
    }
}
