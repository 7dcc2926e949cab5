use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::CONFIG_FILENAME;
use crate::pool::SelectionStrategy;

/// Per-model overrides for the rewrite pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelOverride {
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
}

/// Plugin configuration, read once at construction. File values come from
/// `~/.opencode/codex-switch-config.json`; the feature-flag environment
/// variables override the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginConfig {
    pub codex_mode: bool,
    pub strategy: SelectionStrategy,
    pub debug: bool,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
    pub include: Vec<String>,
    pub models: HashMap<String, ModelOverride>,
    /// Env-only flag (`ENABLE_PLUGIN_REQUEST_LOGGING=1`), never persisted.
    #[serde(skip)]
    pub request_logging: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            codex_mode: true,
            strategy: SelectionStrategy::Hybrid,
            debug: false,
            reasoning_effort: None,
            verbosity: None,
            include: Vec::new(),
            models: HashMap::new(),
            request_logging: false,
        }
    }
}

fn parse_env_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

impl PluginConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".opencode").join(CONFIG_FILENAME))
    }

    /// Loads from the conventional path, falling back to defaults on any
    /// read or parse problem, then applies environment overrides.
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .map(|path| Self::from_file(&path))
            .unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    pub fn from_file(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring unparseable plugin config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("CODEX_MODE") {
            match parse_env_flag(&value) {
                Some(on) => self.codex_mode = on,
                None => warn!("ignoring invalid CODEX_MODE value: {}", value),
            }
        }
        if let Ok(value) = std::env::var("DEBUG_CODEX_SWITCH") {
            if parse_env_flag(&value) == Some(true) {
                self.debug = true;
            }
        }
        if let Ok(value) = std::env::var("ENABLE_PLUGIN_REQUEST_LOGGING") {
            if parse_env_flag(&value) == Some(true) {
                self.request_logging = true;
            }
        }
    }

    pub fn model_override(&self, canonical_model: &str) -> Option<&ModelOverride> {
        self.models.get(canonical_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScopedEnv;

    #[test]
    fn defaults_match_documented_values() {
        let config = PluginConfig::default();
        assert!(config.codex_mode);
        assert_eq!(config.strategy, SelectionStrategy::Hybrid);
        assert!(!config.debug);
        assert!(!config.request_logging);
    }

    #[test]
    fn file_values_parse_camel_case() {
        let dir = std::env::temp_dir().join(format!("codex-switch-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(
            &path,
            r#"{ "codexMode": false, "strategy": "round-robin", "debug": true }"#,
        )
        .unwrap();

        let config = PluginConfig::from_file(&path);
        assert!(!config.codex_mode);
        assert_eq!(config.strategy, SelectionStrategy::RoundRobin);
        assert!(config.debug);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("codex-switch-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{ nope").unwrap();

        let config = PluginConfig::from_file(&path);
        assert!(config.codex_mode);
        assert_eq!(config.strategy, SelectionStrategy::Hybrid);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn env_overrides_beat_file_values() {
        let _env = ScopedEnv::lock()
            .set("CODEX_MODE", "0")
            .set("DEBUG_CODEX_SWITCH", "1")
            .set("ENABLE_PLUGIN_REQUEST_LOGGING", "1");

        let mut config = PluginConfig::default();
        config.apply_env_overrides();
        assert!(!config.codex_mode);
        assert!(config.debug);
        assert!(config.request_logging);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let _env = ScopedEnv::lock()
            .set("CODEX_MODE", "maybe")
            .unset("DEBUG_CODEX_SWITCH")
            .unset("ENABLE_PLUGIN_REQUEST_LOGGING");

        let mut config = PluginConfig::default();
        config.apply_env_overrides();
        assert!(config.codex_mode);
    }
}
