mod models;
mod server;

pub use models::*;
pub use server::*;

use std::fmt;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub tts: TtsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "d_pool_size")]
    pub pool_size: usize,
    /// 0 disables the per-request timeout.
    #[serde(default)]
    pub per_request_timeout_s: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_size: d_pool_size(),
            per_request_timeout_s: 0,
        }
    }
}

fn d_pool_size() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryConfig {
    #[serde(default)]
    pub strategies: MemoryStrategiesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryStrategiesConfig {
    #[serde(default)]
    pub thread_window: Option<ThreadWindowConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadWindowConfig {
    #[serde(default = "d_max_context_tokens")]
    pub max_context_tokens: u32,
}

impl Default for ThreadWindowConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: d_max_context_tokens(),
        }
    }
}

fn d_max_context_tokens() -> u32 {
    1024
}

/// Where agent presets live on disk, and whether router dispatch is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "d_agents_dir")]
    pub dir: std::path::PathBuf,
    #[serde(default = "d_true")]
    pub router_enabled: bool,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            dir: d_agents_dir(),
            router_enabled: true,
        }
    }
}

fn d_agents_dir() -> std::path::PathBuf {
    "agents".into()
}

fn d_true() -> bool {
    true
}

/// Upstream TTS service connection. `None` disables TTS entirely —
/// `JoinTTS` then fails with a connect error at first use.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TtsConfig {
    #[serde(default)]
    pub url: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.runtime.pool_size == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "runtime.pool_size".into(),
                message: "pool_size must be >= 1".into(),
            });
        }

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        let active: Vec<&ModelConfig> = self.models.iter().filter(|m| m.active).collect();
        if active.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "models".into(),
                message: "exactly one model must have \"active\": true (found none)".into(),
            });
        } else if active.len() > 1 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "models".into(),
                message: format!(
                    "exactly one model must have \"active\": true (found {})",
                    active.len()
                ),
            });
        }

        for (i, model) in self.models.iter().enumerate() {
            if model.name.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("models[{i}].name"),
                    message: "model name must not be empty".into(),
                });
            }
            if model.active && model.path.as_os_str().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("models[{i}].path"),
                    message: "active model must have a non-empty path".into(),
                });
            }
        }

        if self.agents.router_enabled {
            // Presence of the "router" preset file is checked at load time
            // (load_agent_presets), not here — config validation only knows
            // about the directory, not its contents.
            if self.agents.dir.as_os_str().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "agents.dir".into(),
                    message: "agents.dir must not be empty when router_enabled".into(),
                });
            }
        }

        if let Some(url) = &self.tts.url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") && !url.starts_with("http")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "tts.url".into(),
                    message: format!("unexpected scheme in tts.url \"{url}\""),
                });
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            models: vec![ModelConfig {
                name: "qwen".into(),
                path: "/models/qwen.gguf".into(),
                system_prompt: String::new(),
                active: true,
                params: ModelParams::default(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn default_config_fails_validation_no_active_model() {
        let cfg = Config::default();
        let errors = cfg.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "models" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn valid_config_has_no_errors() {
        let cfg = valid_config();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn two_active_models_is_an_error() {
        let mut cfg = valid_config();
        cfg.models.push(ModelConfig {
            name: "other".into(),
            path: "/models/other.gguf".into(),
            system_prompt: String::new(),
            active: true,
            params: ModelParams::default(),
        });
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "models"));
    }

    #[test]
    fn zero_pool_size_is_an_error() {
        let mut cfg = valid_config();
        cfg.runtime.pool_size = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "runtime.pool_size"));
    }

    #[test]
    fn config_error_display_format() {
        let e = ConfigError {
            severity: ConfigSeverity::Warning,
            field: "tts.url".into(),
            message: "weird scheme".into(),
        };
        assert_eq!(e.to_string(), "[WARN] tts.url: weird scheme");
    }
}
