use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::warn;

use chorus_core::ProviderConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChorusConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7700
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("Invalid [server] address {}:{}", self.bind, self.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Messages kept per conversation scope before the oldest pair is evicted.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_max_messages() -> usize {
    20
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on one whole fan-out batch, across all providers.
    #[serde(default = "default_global_deadline_secs")]
    pub global_deadline_secs: u64,
}

fn default_global_deadline_secs() -> u64 {
    75
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            global_deadline_secs: default_global_deadline_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_index_path")]
    pub index_path: String,
}

fn default_db_path() -> String {
    "~/.chorus/archive.db".to_string()
}

fn default_index_path() -> String {
    "~/.chorus/index".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            index_path: default_index_path(),
        }
    }
}

/// Mask a secret string for safe display.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
/// Uses char-boundary-safe slicing to avoid panics on multi-byte UTF-8.
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chorus")
}

impl ChorusConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        // A group- or world-readable config can leak API keys.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    warn!(
                        "Config file {:?} is readable by other users ({:o}). \
                         It may contain API keys. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    );
                }
            }
        }

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `chorus init` first.",
                path.display()
            )
        })?;

        // Expand environment variables before parsing
        let expanded = expand_env_vars(&content);

        let config: Self = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        // Check for hardcoded API keys
        for provider in &config.providers {
            if provider.api_key.starts_with("sk-") {
                warn!(
                    "Provider '{}' has its API key hardcoded in the config file. For security, use environment variables: api_key = \"${{OPENAI_API_KEY}}\"",
                    provider.name
                );
            }
        }

        Ok(config)
    }

    /// The effective configuration with every credential masked, for display.
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        for provider in &mut masked.providers {
            provider.api_key = mask_secret(&provider.api_key);
        }
        masked
    }
}

/// Env var names eligible for `${VAR}` expansion in config files, by
/// prefix. Anything else is left unexpanded.
const ALLOWED_ENV_PREFIXES: &[&str] = &[
    "OPENAI_",
    "ANTHROPIC_",
    "AZURE_",
    "GROQ_",
    "MISTRAL_",
    "TOGETHER_",
    "OPENROUTER_",
    "OLLAMA_",
    "CHORUS_",
];

fn env_var_allowed(name: &str) -> bool {
    name == "HOME" || name == "USER" || ALLOWED_ENV_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        if let Some(start) = result[pos..].find("${") {
            let abs_start = pos + start;
            if let Some(end) = result[abs_start..].find('}') {
                let var_name = result[abs_start + 2..abs_start + end].to_string();

                // Only expand variables matching the allowlist
                let value = if env_var_allowed(&var_name) {
                    std::env::var(&var_name).unwrap_or_default()
                } else {
                    warn!(
                        "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                        var_name
                    );
                    // Leave the ${VAR} literal in place
                    pos = abs_start + end + 1;
                    continue;
                };

                let value_len = value.len();
                result = format!(
                    "{}{}{}",
                    &result[..abs_start],
                    value,
                    &result[abs_start + end + 1..]
                );
                pos = abs_start + value_len; // Skip past the expanded value
            } else {
                break;
            }
        } else {
            break;
        }
    }
    result
}
