//! Runtime configuration
//!
//! Settings are a flat dotted-key table merged from three layers, later
//! layers winning:
//!
//! 1. `${SLUG_HOME}/lib/slug.toml`
//! 2. `<root>/slug.toml`
//! 3. `SLUG__foo__bar` environment variables, then CLI `--set` pairs
//!
//! Nested TOML tables flatten to dotted keys. CLI keys without a dot are
//! prefixed by the main module FQN.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Resolve the Slug home directory: `$SLUG_HOME`, falling back to
/// `~/.slug`.
pub fn slug_home() -> PathBuf {
    match std::env::var_os("SLUG_HOME") {
        Some(home) => PathBuf::from(home),
        None => home::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".slug"),
    }
}

/// The library root searched after the project root: `${SLUG_HOME}/lib`.
pub fn lib_dir() -> PathBuf {
    slug_home().join("lib")
}

/// Flattened configuration with typed accessors.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project root; module resolution starts here.
    pub root_path: PathBuf,
    /// FQN of the main module; prefixes bare CLI keys.
    pub main_fqn: String,
    values: HashMap<String, toml::Value>,
}

impl Settings {
    pub fn new(root_path: impl Into<PathBuf>, main_fqn: impl Into<String>) -> Settings {
        Settings {
            root_path: root_path.into(),
            main_fqn: main_fqn.into(),
            values: HashMap::new(),
        }
    }

    /// Merge the standard config files: library config first, project config
    /// second.
    pub fn load(
        root_path: impl Into<PathBuf>,
        main_fqn: impl Into<String>,
    ) -> Result<Settings, ConfigError> {
        let mut settings = Settings::new(root_path, main_fqn);
        settings.merge_file(&lib_dir().join("slug.toml"))?;
        let project = settings.root_path.join("slug.toml");
        settings.merge_file(&project)?;
        Ok(settings)
    }

    /// Merge one TOML file; a missing file is not an error.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        let table: toml::Table = text.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), "merging config file");
        flatten_table("", &table, &mut self.values);
        Ok(())
    }

    /// Apply `SLUG__foo__bar=value` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(rest) = key.strip_prefix("SLUG__") {
                let dotted = rest.split("__").collect::<Vec<_>>().join(".").to_lowercase();
                debug!(key = %dotted, "environment override");
                self.values.insert(dotted, toml::Value::String(value));
            }
        }
    }

    /// Apply CLI `--set key=value` overrides. Bare keys (no dot) are scoped
    /// to the main module FQN.
    pub fn apply_cli_overrides(&mut self, pairs: &[(String, String)]) {
        for (key, value) in pairs {
            let key = if key.contains('.') {
                key.clone()
            } else {
                format!("{}.{}", self.main_fqn, key)
            };
            debug!(key = %key, "cli override");
            self.values.insert(key, toml::Value::String(value.clone()));
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: toml::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            toml::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            toml::Value::Boolean(b) => Some(*b),
            toml::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            toml::Value::Integer(i) => Some(*i),
            toml::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(toml::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(toml::Value::String(s)) => {
                s.split(',').map(|p| p.trim().to_string()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Sandbox mode restricts module imports to an allow list.
    pub fn sandbox_enabled(&self) -> bool {
        self.get_bool("sandbox.enabled").unwrap_or(false)
    }

    pub fn sandbox_allowed(&self) -> Vec<String> {
        self.get_str_list("sandbox.allow")
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut HashMap<String, toml::Value>) {
    for (key, value) in table {
        let dotted = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(nested) => flatten_table(&dotted, nested, out),
            other => {
                out.insert(dotted, other.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn settings_from(text: &str) -> Settings {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("slug.toml");
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(text.as_bytes()).expect("write");
        let mut settings = Settings::new(dir.path(), "main");
        settings.merge_file(&path).expect("merge");
        settings
    }

    #[test]
    fn test_nested_tables_flatten_to_dotted_keys() {
        let settings = settings_from("[db]\nhost = \"localhost\"\n[db.pool]\nsize = 4\n");
        assert_eq!(settings.get_str("db.host"), Some("localhost".to_string()));
        assert_eq!(settings.get_int("db.pool.size"), Some(4));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let mut settings = Settings::new(".", "main");
        settings
            .merge_file(Path::new("/nonexistent/slug.toml"))
            .expect("missing file tolerated");
    }

    #[test]
    fn test_cli_override_prefixes_bare_keys() {
        let mut settings = Settings::new(".", "app.main");
        settings.apply_cli_overrides(&[
            ("verbose".to_string(), "true".to_string()),
            ("db.host".to_string(), "remote".to_string()),
        ]);
        assert_eq!(settings.get_bool("app.main.verbose"), Some(true));
        assert_eq!(settings.get_str("db.host"), Some("remote".to_string()));
    }

    #[test]
    #[serial]
    fn test_env_override_maps_double_underscores() {
        unsafe {
            std::env::set_var("SLUG__DB__HOST", "envhost");
        }
        let mut settings = Settings::new(".", "main");
        settings.apply_env_overrides();
        unsafe {
            std::env::remove_var("SLUG__DB__HOST");
        }
        assert_eq!(settings.get_str("db.host"), Some("envhost".to_string()));
    }

    #[test]
    fn test_overrides_win_over_file_values() {
        let mut settings = settings_from("[db]\nhost = \"fromfile\"\n");
        settings.apply_cli_overrides(&[("db.host".to_string(), "fromcli".to_string())]);
        assert_eq!(settings.get_str("db.host"), Some("fromcli".to_string()));
    }

    #[test]
    fn test_sandbox_settings() {
        let settings =
            settings_from("[sandbox]\nenabled = true\nallow = [\"std.list\", \"std.map\"]\n");
        assert!(settings.sandbox_enabled());
        assert_eq!(
            settings.sandbox_allowed(),
            vec!["std.list".to_string(), "std.map".to_string()]
        );
    }

    #[test]
    #[serial]
    fn test_slug_home_env() {
        unsafe {
            std::env::set_var("SLUG_HOME", "/opt/slug");
        }
        assert_eq!(slug_home(), PathBuf::from("/opt/slug"));
        assert_eq!(lib_dir(), PathBuf::from("/opt/slug/lib"));
        unsafe {
            std::env::remove_var("SLUG_HOME");
        }
    }
}
