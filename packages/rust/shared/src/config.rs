//! Application configuration for exposecast.
//!
//! User config lives at `~/.exposecast/exposecast.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets never live in the file: only the names of the env vars holding them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ExposecastError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "exposecast.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".exposecast";

// ---------------------------------------------------------------------------
// Config structs (matching exposecast.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP surface settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// LLM text service settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// CRM gateway settings.
    #[serde(default)]
    pub crm: CrmConfig,

    /// Pipeline runner limits.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Task state retention.
    #[serde(default)]
    pub tasks: TasksConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the HTTP surface binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Maximum accepted upload size in megabytes.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".into()
}
fn default_max_upload_mb() -> usize {
    25
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    /// Base URL of an OpenAI-compatible chat completions API.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model used for every pipeline prompt.
    #[serde(default = "default_model")]
    pub model: String,

    /// Whole-request timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Connection establishment timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Retries on rate-limit and server errors before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            base_url: default_llm_base_url(),
            model: default_model(),
            timeout_secs: default_llm_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_llm_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    3
}

/// `[crm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    /// Name of the env var holding the private-app access token.
    #[serde(default = "default_crm_token_env")]
    pub access_token_env: String,

    /// CRM API root.
    #[serde(default = "default_crm_base_url")]
    pub base_url: String,

    /// Record ids per batch detail request (the API caps this at 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between consecutive pages/batches, in milliseconds.
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,

    /// Retries on HTTP 429 before the request fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            access_token_env: default_crm_token_env(),
            base_url: default_crm_base_url(),
            batch_size: default_batch_size(),
            page_delay_ms: default_page_delay(),
            max_retries: default_max_retries(),
        }
    }
}

impl CrmConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

fn default_crm_token_env() -> String {
    "HUBSPOT_API_KEY".into()
}
fn default_crm_base_url() -> String {
    "https://api.hubapi.com".into()
}
fn default_batch_size() -> usize {
    100
}
fn default_page_delay() -> u64 {
    100
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipelines allowed to execute at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Admitted tasks allowed to wait for a free slot.
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,

    /// Upper bound on one pipeline run, queue wait excluded.
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,

    /// Maximum number of curated entities.
    #[serde(default = "default_curation_limit")]
    pub curation_limit: usize,

    /// Total model calls allowed per curation (first call + repairs).
    #[serde(default = "default_curation_attempts")]
    pub curation_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queued: default_max_queued(),
            deadline_secs: default_deadline(),
            curation_limit: default_curation_limit(),
            curation_attempts: default_curation_attempts(),
        }
    }
}

impl PipelineConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

fn default_max_concurrent() -> usize {
    4
}
fn default_max_queued() -> usize {
    32
}
fn default_deadline() -> u64 {
    600
}
fn default_curation_limit() -> usize {
    25
}
fn default_curation_attempts() -> u32 {
    3
}

/// `[tasks]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// How long a finished task stays queryable.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// How often expired tasks are swept.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl TasksConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_retention() -> u64 {
    3600
}
fn default_sweep_interval() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (section, base_url) in [("llm", &self.llm.base_url), ("crm", &self.crm.base_url)] {
            Url::parse(base_url).map_err(|e| {
                ExposecastError::config(format!("[{section}] base_url '{base_url}' is invalid: {e}"))
            })?;
        }

        if self.crm.batch_size == 0 || self.crm.batch_size > 100 {
            return Err(ExposecastError::config(format!(
                "[crm] batch_size must be within 1..=100, got {}",
                self.crm.batch_size
            )));
        }
        if self.pipeline.max_concurrent == 0 {
            return Err(ExposecastError::config("[pipeline] max_concurrent must be at least 1"));
        }
        if self.pipeline.curation_attempts == 0 || self.pipeline.curation_limit == 0 {
            return Err(ExposecastError::config(
                "[pipeline] curation_attempts and curation_limit must be at least 1",
            ));
        }
        if self.pipeline.deadline_secs == 0 {
            return Err(ExposecastError::config("[pipeline] deadline_secs must be at least 1"));
        }
        if self.tasks.sweep_interval_secs == 0 {
            return Err(ExposecastError::config("[tasks] sweep_interval_secs must be at least 1"));
        }
        if self.server.max_upload_mb == 0 {
            return Err(ExposecastError::config("[server] max_upload_mb must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.exposecast/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ExposecastError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.exposecast/exposecast.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ExposecastError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ExposecastError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ExposecastError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ExposecastError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ExposecastError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the named env var, failing when it is unset or empty.
pub fn resolve_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(ExposecastError::config(format!(
            "secret not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("HUBSPOT_API_KEY"));
        assert!(toml_str.contains("max_concurrent"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crm.batch_size, 100);
        assert_eq!(parsed.pipeline.curation_limit, 25);
        assert_eq!(parsed.llm.model, "gpt-4o");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[pipeline]
max_concurrent = 2

[crm]
page_delay_ms = 0
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.max_concurrent, 2);
        assert_eq!(config.pipeline.max_queued, 32);
        assert_eq!(config.crm.page_delay(), Duration::ZERO);
        assert_eq!(config.tasks.retention(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.crm.batch_size = 500;
        assert!(config.validate().unwrap_err().to_string().contains("batch_size"));

        let mut config = AppConfig::default();
        config.llm.base_url = "not a url".into();
        assert!(config.validate().unwrap_err().to_string().contains("[llm]"));

        let mut config = AppConfig::default();
        config.pipeline.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_deadline_is_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.deadline_secs = 0;
        assert!(config.validate().unwrap_err().to_string().contains("deadline_secs"));
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let mut config = AppConfig::default();
        config.tasks.sweep_interval_secs = 0;
        assert!(config.validate().unwrap_err().to_string().contains("sweep_interval_secs"));
    }

    #[test]
    fn missing_secret_is_a_config_error() {
        // Use a unique env var name to avoid interfering with other tests
        let result = resolve_secret("EXPOSECAST_TEST_NONEXISTENT_KEY_12345");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("EXPOSECAST_TEST_NONEXISTENT_KEY_12345"));
    }
}
