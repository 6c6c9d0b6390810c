//! Configuration management for the shell.
//!
//! Two sources feed the shell: the `appsettings.json` shipped next to the
//! application (version strings, executable locations, interpreter toggle)
//! and an optional `swatplus-shell.toml` with supervisor tuning.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application settings shipped with the editor in `static/appsettings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Editor version, compared against project versions.
    pub version: Option<String>,
    /// Revision of the bundled simulation executable.
    pub swatplus: String,
    /// Run API scripts through an interpreter instead of compiled binaries.
    #[serde(default)]
    pub python: bool,
    /// Interpreter executable, used verbatim as the program to spawn.
    #[serde(default = "default_python_path")]
    pub python_path: String,
    /// Override for the SWAT+ Toolbox executable.
    pub toolbox_path: Option<String>,
    /// Location of the IAHRIS executable.
    pub iahris_path: Option<String>,
    /// Keys the shell does not interpret; handed to the UI untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_python_path() -> String {
    "python".to_string()
}

/// Optional shell configuration corresponding to `swatplus-shell.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellConfig {
    /// First port to try when binding the API.
    pub base_port: Option<u16>,
    /// Upper bound for the graceful shutdown request (milliseconds).
    pub shutdown_timeout_ms: Option<u64>,
    /// Directory holding the `static/` resources.
    pub app_root: Option<PathBuf>,
    /// Location of the persisted settings store.
    pub store_path: Option<PathBuf>,
    /// Interpreter override, takes precedence over appsettings.
    pub python_path: Option<String>,
    /// Arguments placed between the interpreter and the script (e.g. `["-3"]`).
    pub python_args: Option<Vec<String>>,
    /// Log filter directive (e.g. "debug" or "swatplus_shell=trace").
    pub log_level: Option<String>,
}

/// Loads and parses `appsettings.json` from the application root.
pub fn load_app_settings(app_root: &Path) -> Result<AppSettings> {
    let path = app_settings_path(app_root);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read app settings {}", path.display()))?;
    let settings: AppSettings = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse app settings {}", path.display()))?;
    Ok(settings)
}

pub fn app_settings_path(app_root: &Path) -> PathBuf {
    app_root.join("static").join("appsettings.json")
}

/// Loads and parses the shell configuration from a file path.
pub fn load_config(path: &Path) -> Result<ShellConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: ShellConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_optional_fields() {
        let raw = r#"
base_port = 6000
shutdown_timeout_ms = 1500
app_root = "/opt/swatplus"
store_path = "/tmp/store.json"
python_path = "C:\\Program Files\\Python\\python.exe"
python_args = ["-3", "-X", "utf8"]
log_level = "debug"
"#;
        let config: ShellConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.base_port, Some(6000));
        assert_eq!(config.shutdown_timeout_ms, Some(1500));
        assert_eq!(config.app_root, Some(PathBuf::from("/opt/swatplus")));
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/store.json")));
        assert_eq!(
            config.python_path.as_deref(),
            Some(r"C:\Program Files\Python\python.exe")
        );
        assert_eq!(
            config.python_args,
            Some(vec!["-3".to_string(), "-X".to_string(), "utf8".to_string()])
        );
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn empty_config_is_all_defaults() {
        let config: ShellConfig = toml::from_str("").unwrap();
        assert!(config.base_port.is_none());
        assert!(config.app_root.is_none());
    }

    #[test]
    fn app_settings_keep_unknown_keys() {
        let raw = r#"{
            "version": "3.0.0",
            "swatplus": "61.0",
            "python": true,
            "pythonPath": "C:/Python/python.exe",
            "datasetsVersion": "3.0"
        }"#;
        let settings: AppSettings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.version.as_deref(), Some("3.0.0"));
        assert_eq!(settings.swatplus, "61.0");
        assert!(settings.python);
        assert_eq!(settings.python_path, "C:/Python/python.exe");
        assert!(settings.toolbox_path.is_none());
        assert_eq!(
            settings.extra.get("datasetsVersion"),
            Some(&serde_json::Value::String("3.0".into()))
        );

        let back = serde_json::to_value(&settings).unwrap();
        assert_eq!(back["pythonPath"], "C:/Python/python.exe");
        assert_eq!(back["datasetsVersion"], "3.0");
    }

    #[test]
    fn app_settings_default_interpreter() {
        let settings: AppSettings = serde_json::from_str(r#"{"swatplus": "60.5.7"}"#).unwrap();
        assert!(!settings.python);
        assert_eq!(settings.python_path, "python");
    }

    #[test]
    fn load_app_settings_reads_static_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("static")).unwrap();
        std::fs::write(
            dir.path().join("static").join("appsettings.json"),
            r#"{"version": "3.0.0", "swatplus": "61.0"}"#,
        )
        .unwrap();
        let settings = load_app_settings(dir.path()).unwrap();
        assert_eq!(settings.swatplus, "61.0");
    }

    #[test]
    fn load_app_settings_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_app_settings(dir.path()).unwrap_err();
        assert!(err.to_string().contains("failed to read app settings"));
    }
}
