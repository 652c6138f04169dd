use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub orchestrator: Orchestrator,
    pub secrets: Secrets,
    pub dispatch: Dispatch,
    pub executor: Executor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

/// Where the orchestration platform is reached and which workload it manages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orchestrator {
    pub endpoint: String,
    pub service: String,
    pub cluster: String,
    #[serde(default = "default_orchestrator_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secrets {
    pub endpoint: String,
    pub secret_name: String,
    #[serde(default = "default_secrets_timeout_ms")]
    pub timeout_ms: u64,
}

/// Follow-up delivery target for the bot channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    #[serde(default = "default_webhook_base_url")]
    pub webhook_base_url: String,
    #[serde(default = "default_dispatch_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Executor {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_orchestrator_timeout_ms() -> u64 {
    5_000
}

fn default_secrets_timeout_ms() -> u64 {
    3_000
}

fn default_webhook_base_url() -> String {
    "https://discord.com/api/v8/webhooks".to_string()
}

fn default_dispatch_timeout_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    64
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.orchestrator.endpoint.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "orchestrator.endpoint must not be empty".to_string(),
        ));
    }
    if cfg.orchestrator.service.trim().is_empty() || cfg.orchestrator.cluster.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "orchestrator.service and orchestrator.cluster must not be empty".to_string(),
        ));
    }
    if cfg.orchestrator.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "orchestrator.timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.secrets.endpoint.trim().is_empty() || cfg.secrets.secret_name.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "secrets.endpoint and secrets.secret_name must not be empty".to_string(),
        ));
    }
    if cfg.secrets.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "secrets.timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.dispatch.webhook_base_url.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "dispatch.webhook_base_url must not be empty".to_string(),
        ));
    }
    if cfg.dispatch.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "dispatch.timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.executor.queue_capacity == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "executor.queue_capacity must be >= 1".to_string(),
        ));
    }
    Ok(())
}
