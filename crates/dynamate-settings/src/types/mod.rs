//! Settings type definitions.
//!
//! Every struct is `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs to name the values it changes.

mod agent;
mod paths;
mod tools;

pub use agent::*;
pub use paths::*;
pub use tools::*;

use serde::{Deserialize, Serialize};

/// Root settings value. Loaded once in `main` and passed down explicitly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DynamateSettings {
    pub version: String,
    pub model: ModelSettings,
    pub retry: RetrySettings,
    pub context: ContextSettings,
    pub agent: AgentSettings,
    pub paths: PathSettings,
    pub tools: ToolSettings,
    pub logging: LoggingSettings,
}

impl Default for DynamateSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            model: ModelSettings::default(),
            retry: RetrySettings::default(),
            context: ContextSettings::default(),
            agent: AgentSettings::default(),
            paths: PathSettings::default(),
            tools: ToolSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Which model to talk to and how.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    /// Model name; an `openrouter/` routing prefix is accepted and stripped.
    pub name: String,
    pub temperature: f64,
    /// Some models reject the system role; their system turns are sent as user turns.
    pub supports_system_messages: bool,
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "openrouter/openai/gpt-4.1-2025-04-14".to_string(),
            temperature: 0.1,
            supports_system_messages: true,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            request_timeout_secs: 600,
            connect_timeout_secs: 30,
        }
    }
}

/// Retry configuration for model calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter factor (0.0–1.0) applied to retry delays.
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter_factor: 0.2,
        }
    }
}

/// Conversation budget and summarization.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// Estimated token count above which history is summarized.
    pub max_context_tokens: u32,
    /// Output bound for the summarization call.
    pub summary_output_tokens: u32,
    pub summary_temperature: f64,
    /// Conversations at or below this length are never compacted.
    pub min_messages_for_compaction: usize,
    /// Head and tail length kept when a tool output is truncated.
    pub max_characters_to_log: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_context_tokens: 32_000,
            summary_output_tokens: 6000,
            summary_temperature: 0.1,
            min_messages_for_compaction: 3,
            max_characters_to_log: 5000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Stdout level filter; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit stdout logs as JSON lines.
    pub json: bool,
    /// Minimum level written to the log file.
    pub file_level: String,
    /// File name inside `paths.agentLogs`. Empty disables the file log.
    pub file_name: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_level: "debug".to_string(),
            file_name: "dynamate.log".to_string(),
        }
    }
}
