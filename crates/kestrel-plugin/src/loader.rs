//! Reading plugin directories from disk.
//!
//! A plugin directory contains `manifest.yaml`, the entry script named by the
//! manifest's `main` field and optionally a `config.yaml` with default
//! settings. Loading only parses and validates; nothing is executed here.

use std::fs;
use std::path::{Path, PathBuf};

use kestrel_core::{LoadError, Manifest, Plugin, PluginConfig};

use crate::permission::is_within;

/// Manifest file name inside a plugin directory.
pub const MANIFEST_FILE: &str = "manifest.yaml";

/// Optional defaults file inside a plugin directory.
pub const DEFAULTS_FILE: &str = "config.yaml";

/// Load a single plugin directory.
///
/// A manifest without `main` runs `main.lua`, since Lua is the primary
/// engine. A plugin written for another engine, such as Rhai, must name its
/// entry script explicitly (`main: main.rhai`); there is no guessing by
/// which files happen to exist.
pub fn load_plugin(dir: impl AsRef<Path>) -> Result<Plugin, LoadError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(LoadError::load_failed("directory does not exist"));
    }

    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(LoadError::invalid_manifest(format!(
            "{MANIFEST_FILE} not found in {}",
            dir.display()
        )));
    }
    let content = fs::read_to_string(&manifest_path)
        .map_err(|e| LoadError::invalid_manifest(format!("cannot read {MANIFEST_FILE}: {e}")))?;
    let manifest = Manifest::from_yaml(&content)?;

    let entry = resolve_main(dir, &manifest.main)?;
    let script = read_script(&entry)?;

    let defaults = read_defaults(dir)?;

    tracing::debug!(
        plugin = %manifest.name,
        entry = %entry.display(),
        "Loaded plugin directory"
    );

    Ok(Plugin::new(dir, manifest, script).with_default_config(defaults))
}

/// List immediate subdirectories of `root` that contain a manifest.
///
/// The root itself is never included. A missing root yields an empty list.
pub fn scan_plugin_directories(root: impl AsRef<Path>) -> Vec<PathBuf> {
    let root = root.as_ref();
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && path.join(MANIFEST_FILE).is_file())
        .collect();
    dirs.sort();
    dirs
}

fn resolve_main(dir: &Path, main: &str) -> Result<PathBuf, LoadError> {
    let relative = Path::new(main.trim());
    if relative.is_absolute() {
        return Err(LoadError::invalid_manifest(format!(
            "main '{main}' must be relative to the plugin directory"
        )));
    }

    let entry = dir.join(relative);
    if !is_within(&entry, dir) {
        return Err(LoadError::invalid_manifest(format!(
            "main '{main}' points outside the plugin directory"
        )));
    }
    if !entry.is_file() {
        return Err(LoadError::MissingMainFile { path: entry });
    }
    Ok(entry)
}

fn read_script(entry: &Path) -> Result<String, LoadError> {
    let bytes = fs::read(entry)
        .map_err(|e| LoadError::load_failed(format!("cannot read {}: {e}", entry.display())))?;
    let script = String::from_utf8(bytes)
        .map_err(|_| LoadError::invalid_script("script is not valid UTF-8"))?;
    if script.trim().is_empty() {
        return Err(LoadError::invalid_script("script is empty"));
    }
    Ok(script)
}

fn read_defaults(dir: &Path) -> Result<PluginConfig, LoadError> {
    let path = dir.join(DEFAULTS_FILE);
    if !path.is_file() {
        return Ok(PluginConfig::default());
    }
    let content = fs::read_to_string(&path)
        .map_err(|e| LoadError::load_failed(format!("cannot read {DEFAULTS_FILE}: {e}")))?;
    PluginConfig::from_yaml(&content)
        .map_err(|e| LoadError::load_failed(format!("invalid {DEFAULTS_FILE}: {e}")))
}

#[cfg(test)]
mod tests {
    use kestrel_core::ConfigValue;
    use tempfile::TempDir;

    use super::*;

    const MANIFEST: &str = "name: echo\nversion: 1.0.0\ndisplayName: Echo\ndescription: Echo input\ncommand: /echo\n";

    fn write_plugin(root: &Path, dir: &str, manifest: Option<&str>, script: Option<&str>) -> PathBuf {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        if let Some(manifest) = manifest {
            fs::write(path.join(MANIFEST_FILE), manifest).unwrap();
        }
        if let Some(script) = script {
            fs::write(path.join("main.lua"), script).unwrap();
        }
        path
    }

    #[test]
    fn test_load_valid_plugin() {
        let temp = TempDir::new().unwrap();
        let dir = write_plugin(temp.path(), "echo", Some(MANIFEST), Some("log('hi')"));

        let plugin = load_plugin(&dir).unwrap();
        assert_eq!(plugin.name(), "echo");
        assert_eq!(plugin.command(), "/echo");
        assert_eq!(plugin.script, "log('hi')");
        assert_eq!(plugin.url, dir);
        assert!(plugin.default_config.is_empty());
    }

    #[test]
    fn test_missing_directory() {
        let temp = TempDir::new().unwrap();
        let err = load_plugin(temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, LoadError::LoadFailed { .. }));
        assert!(err.to_string().contains("directory does not exist"));
    }

    #[test]
    fn test_missing_manifest_is_invalid_manifest() {
        let temp = TempDir::new().unwrap();
        // No manifest but a main file present: still a manifest error.
        let dir = write_plugin(temp.path(), "bare", None, Some("x = 1"));
        assert!(matches!(
            load_plugin(&dir),
            Err(LoadError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn test_missing_main_file() {
        let temp = TempDir::new().unwrap();
        let dir = write_plugin(temp.path(), "echo", Some(MANIFEST), None);
        match load_plugin(&dir) {
            Err(LoadError::MissingMainFile { path }) => assert!(path.ends_with("main.lua")),
            other => panic!("expected missing main file, got {other:?}"),
        }
    }

    #[test]
    fn test_main_defaults_to_lua_entry() {
        let temp = TempDir::new().unwrap();
        let dir = write_plugin(temp.path(), "echo", Some(MANIFEST), None);
        fs::write(dir.join("main.rhai"), "fn run() {}").unwrap();
        match load_plugin(&dir) {
            Err(LoadError::MissingMainFile { path }) => assert!(path.ends_with("main.lua")),
            other => panic!("expected missing main file, got {other:?}"),
        }

        fs::write(dir.join(MANIFEST_FILE), format!("{MANIFEST}main: main.rhai\n")).unwrap();
        let plugin = load_plugin(&dir).unwrap();
        assert!(plugin.entry_path().ends_with("main.rhai"));
    }

    #[test]
    fn test_blank_script_is_invalid() {
        let temp = TempDir::new().unwrap();
        let dir = write_plugin(temp.path(), "echo", Some(MANIFEST), Some("  \n\t\n"));
        let err = load_plugin(&dir).unwrap_err();
        assert!(matches!(err, LoadError::InvalidScript { .. }));
        assert!(err.to_string().contains("script is empty"));
    }

    #[test]
    fn test_main_outside_directory_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("evil.lua"), "x = 1").unwrap();
        let manifest = format!("{MANIFEST}main: ../evil.lua\n");
        let dir = write_plugin(temp.path(), "echo", Some(&manifest), None);
        assert!(matches!(
            load_plugin(&dir),
            Err(LoadError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn test_defaults_file_loaded() {
        let temp = TempDir::new().unwrap();
        let dir = write_plugin(temp.path(), "echo", Some(MANIFEST), Some("x = 1"));
        fs::write(dir.join(DEFAULTS_FILE), "limit:\n  type: int\n  value: 5\n").unwrap();

        let plugin = load_plugin(&dir).unwrap();
        assert_eq!(plugin.default_config.get("limit"), Some(&ConfigValue::Integer(5)));
        assert_eq!(plugin.effective_config.get("limit"), Some(&ConfigValue::Integer(5)));
    }

    #[test]
    fn test_scan_plugin_directories() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(MANIFEST_FILE), MANIFEST).unwrap();
        write_plugin(temp.path(), "b", Some(MANIFEST), Some("x"));
        write_plugin(temp.path(), "a", Some(MANIFEST), None);
        write_plugin(temp.path(), "empty", None, None);
        fs::write(temp.path().join("stray.txt"), "").unwrap();

        let dirs = scan_plugin_directories(temp.path());
        assert_eq!(dirs, vec![temp.path().join("a"), temp.path().join("b")]);
    }

    #[test]
    fn test_scan_missing_root() {
        let temp = TempDir::new().unwrap();
        assert!(scan_plugin_directories(temp.path().join("missing")).is_empty());
    }
}
