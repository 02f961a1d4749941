use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Process-wide settings, loaded from a TOML file and overridden by
/// `AIOPS_*` environment variables. Mirrors the teacher's file-plus-env
/// `ConfigStore` shape, collapsed to a single static struct since this
/// service has no per-session config to merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_scheduler_tick_seconds")]
    pub scheduler_tick_seconds: u64,
    #[serde(default = "default_retention_days")]
    pub log_retention_days: u64,
    #[serde(default = "default_audit_backlog_capacity")]
    pub audit_backlog_capacity: usize,
    /// Name of an environment variable holding the master key used to
    /// encrypt `ServerCredential.secret_material_encrypted`. Never the key
    /// material itself.
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
    /// Base URL of an OpenAI-compatible chat-completions endpoint. Alert
    /// analysis is disabled when unset.
    #[serde(default)]
    pub llm_base_url: Option<String>,
    /// Name of the environment variable holding the LLM API key.
    #[serde(default = "default_llm_api_key_env")]
    pub llm_api_key_env: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_timeout_seconds")]
    pub llm_timeout_seconds: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_database_url() -> String {
    "sqlite://aiops.db".to_string()
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_scheduler_tick_seconds() -> u64 {
    30
}

fn default_retention_days() -> u64 {
    14
}

fn default_audit_backlog_capacity() -> usize {
    4096
}

fn default_master_key_env() -> String {
    "AIOPS_MASTER_KEY".to_string()
}

fn default_llm_api_key_env() -> String {
    "AIOPS_LLM_API_KEY".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_seconds() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_url: default_database_url(),
            worker_pool_size: default_worker_pool_size(),
            scheduler_tick_seconds: default_scheduler_tick_seconds(),
            log_retention_days: default_retention_days(),
            audit_backlog_capacity: default_audit_backlog_capacity(),
            master_key_env: default_master_key_env(),
            llm_base_url: None,
            llm_api_key_env: default_llm_api_key_env(),
            llm_model: default_llm_model(),
            llm_timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

impl Settings {
    /// Loads `path` if present, falling back to defaults, then applies
    /// `AIOPS_*` environment overrides on top.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut settings = if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            Settings::default()
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AIOPS_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("AIOPS_DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("AIOPS_WORKER_POOL_SIZE") {
            if let Ok(parsed) = v.parse() {
                self.worker_pool_size = parsed;
            } else {
                tracing::warn!("ignoring invalid AIOPS_WORKER_POOL_SIZE={v}");
            }
        }
        if let Ok(v) = std::env::var("AIOPS_SCHEDULER_TICK_SECONDS") {
            if let Ok(parsed) = v.parse() {
                self.scheduler_tick_seconds = parsed;
            } else {
                tracing::warn!("ignoring invalid AIOPS_SCHEDULER_TICK_SECONDS={v}");
            }
        }
        if let Ok(v) = std::env::var("AIOPS_LLM_BASE_URL") {
            self.llm_base_url = Some(v);
        }
        if let Ok(v) = std::env::var("AIOPS_LLM_MODEL") {
            self.llm_model = v;
        }
    }

    pub fn resolve_master_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.master_key_env)
            .with_context(|| format!("master key env var {} is not set", self.master_key_env))
    }
}

pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AIOPS_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".aiops")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_falls_back_to_defaults_when_file_missing() {
        let settings = Settings::load("/nonexistent/path/config.toml").await.unwrap();
        assert_eq!(settings.bind_addr, default_bind_addr());
    }

    #[tokio::test]
    async fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "bind_addr = \"0.0.0.0:9090\"\n")
            .await
            .unwrap();
        let settings = Settings::load(&path).await.unwrap();
        assert_eq!(settings.bind_addr, "0.0.0.0:9090");
        assert_eq!(settings.worker_pool_size, default_worker_pool_size());
    }

    #[test]
    fn env_override_wins_over_file_value() {
        std::env::set_var("AIOPS_BIND_ADDR", "10.0.0.1:80");
        let mut settings = Settings::default();
        settings.apply_env_overrides();
        assert_eq!(settings.bind_addr, "10.0.0.1:80");
        std::env::remove_var("AIOPS_BIND_ADDR");
    }
}
