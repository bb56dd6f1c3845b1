//! Data-driven provider registry
//!
//! One configuration entry per backend, loaded at startup and immutable
//! afterwards. Adding a provider is a config entry, never a code change.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::ProviderClient;
use crate::error::ChorusError;
use crate::memory::SessionMemory;
use crate::providers::OpenAiBackend;
use crate::types::ProviderId;

fn default_temperature() -> f32 {
    0.7
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_use_memory() -> bool {
    true
}

/// Configuration for one backend, fixed at process start.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Some backends reject two consecutive messages with the same role.
    #[serde(default)]
    pub strict_role_alternation: bool,
    #[serde(default = "default_use_memory")]
    pub use_memory: bool,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("strict_role_alternation", &self.strict_role_alternation)
            .field("use_memory", &self.use_memory)
            .finish()
    }
}

impl ProviderConfig {
    pub fn id(&self) -> ProviderId {
        ProviderId::new(&self.name)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Immutable name → configuration table.
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderId, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(configs: Vec<ProviderConfig>) -> Result<Self, ChorusError> {
        let mut providers = BTreeMap::new();
        for mut config in configs {
            let id = config.id();
            if id.as_str().is_empty() {
                return Err(ChorusError::Validation(
                    "provider name must not be empty".to_string(),
                ));
            }
            Url::parse(&config.base_url).map_err(|e| {
                ChorusError::Validation(format!("provider '{id}' has an invalid base_url: {e}"))
            })?;
            config.base_url = config.base_url.trim_end_matches('/').to_string();
            if providers.insert(id.clone(), config).is_some() {
                return Err(ChorusError::Validation(format!("duplicate provider '{id}'")));
            }
        }
        Ok(Self { providers })
    }

    /// Look up one provider's configuration.
    pub fn resolve(&self, id: &ProviderId) -> Result<&ProviderConfig, ChorusError> {
        self.providers
            .get(id)
            .ok_or_else(|| ChorusError::UnknownProvider(id.to_string()))
    }

    /// Configured identities in sorted order.
    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProviderId, &ProviderConfig)> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// One client per configured provider, wired to the HTTP backend.
    pub fn build_clients(&self, memory: Arc<SessionMemory>) -> Vec<Arc<ProviderClient>> {
        self.providers
            .values()
            .map(|config| {
                let backend = Arc::new(OpenAiBackend::new(
                    config.api_key.clone(),
                    config.base_url.clone(),
                ));
                Arc::new(ProviderClient::new(
                    config.clone(),
                    backend,
                    Arc::clone(&memory),
                ))
            })
            .collect()
    }
}
