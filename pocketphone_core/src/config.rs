use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::unread::UnreadRecomputePolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneConfig {
    // Generation API (OpenAI-compatible)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub llm_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub llm_max_tokens: u32,

    // Persistence
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // Input handling
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub unread_recompute: UnreadRecomputePolicy,

    // How long to wait for the generation API to become available
    #[serde(default = "default_config_wait_attempts")]
    pub config_wait_attempts: u32,
    #[serde(default = "default_config_wait_interval_ms")]
    pub config_wait_interval_ms: u64,
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_database_path() -> String {
    "pocketphone_state.db".to_string()
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_config_wait_attempts() -> u32 {
    50
}

fn default_config_wait_interval_ms() -> u64 {
    100
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            llm_temperature: default_temperature(),
            llm_max_tokens: default_max_tokens(),
            database_path: default_database_path(),
            debounce_ms: default_debounce_ms(),
            unread_recompute: UnreadRecomputePolicy::default(),
            config_wait_attempts: default_config_wait_attempts(),
            config_wait_interval_ms: default_config_wait_interval_ms(),
        }
    }
}

impl PhoneConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("pocketphone_config.toml")
    }

    /// Load from pocketphone_config.toml next to the executable, or fall
    /// back to defaults + env vars.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match Self::from_toml(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No usable config file found, using defaults + env vars");
        Self::from_env()
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid pocketphone config")
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| env::var(key).ok());
        config
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("POCKETPHONE_LLM_API_URL") {
            self.llm_api_url = url;
        }

        if let Some(model) = lookup("POCKETPHONE_LLM_MODEL") {
            self.llm_model = model;
        }

        if let Some(key) = lookup("POCKETPHONE_LLM_API_KEY") {
            if !key.trim().is_empty() {
                self.llm_api_key = Some(key);
            }
        }

        if let Some(path) = lookup("POCKETPHONE_DATABASE_PATH") {
            if !path.trim().is_empty() {
                self.database_path = path;
            }
        }

        if let Some(ms) = lookup("POCKETPHONE_DEBOUNCE_MS") {
            match ms.trim().parse() {
                Ok(ms) => self.debounce_ms = ms,
                Err(_) => tracing::warn!("Ignoring invalid POCKETPHONE_DEBOUNCE_MS={:?}", ms),
            }
        }

        if let Some(raw) = lookup("POCKETPHONE_UNREAD_RECOMPUTE") {
            match UnreadRecomputePolicy::parse(&raw) {
                Some(policy) => self.unread_recompute = policy,
                None => tracing::warn!("Ignoring invalid POCKETPHONE_UNREAD_RECOMPUTE={:?}", raw),
            }
        }
    }

    pub fn debounce_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.debounce_ms as i64)
    }

    pub fn config_wait_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config_wait_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = PhoneConfig::from_toml("").unwrap();
        assert_eq!(config, PhoneConfig::default());
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.unread_recompute, UnreadRecomputePolicy::OverwriteWhenNonzero);
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = PhoneConfig::from_toml(
            r#"
            llm_model = "qwen2.5"
            debounce_ms = 150
            unread_recompute = "overwrite_always"
            "#,
        )
        .unwrap();

        assert_eq!(config.llm_model, "qwen2.5");
        assert_eq!(config.debounce_window(), chrono::Duration::milliseconds(150));
        assert_eq!(config.unread_recompute, UnreadRecomputePolicy::OverwriteAlways);
        assert_eq!(config.config_wait_attempts, 50);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(PhoneConfig::from_toml("debounce_ms = \"soon\"").is_err());
    }

    #[test]
    fn env_overlay_skips_invalid_values() {
        let vars: HashMap<&str, &str> = [
            ("POCKETPHONE_LLM_API_KEY", "sk-test"),
            ("POCKETPHONE_DEBOUNCE_MS", "not-a-number"),
            ("POCKETPHONE_UNREAD_RECOMPUTE", "always"),
        ]
        .into_iter()
        .collect();

        let mut config = PhoneConfig::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.unread_recompute, UnreadRecomputePolicy::OverwriteAlways);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut config = PhoneConfig::default();
        config.llm_api_key = Some("secret".to_string());
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(PhoneConfig::from_toml(&text).unwrap(), config);
    }
}
