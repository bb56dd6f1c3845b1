//! Scripted backends and harnesses shared by the unit tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::client::ProviderClient;
use crate::error::ProviderError;
use crate::memory::SessionMemory;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::providers::{ChatBackend, ChatReply, ChatRequest};
use crate::registry::ProviderConfig;
use crate::store::MemoryStore;
use crate::types::TokenUsage;

/// What a scripted backend does when called.
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    ReplyAfter(Duration, String),
    Fail(ProviderError),
    Hang,
}

/// In-process stand-in for a wire backend; captures every request it sees.
pub struct ScriptedBackend {
    script: Script,
    reachable: bool,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            reachable: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable(script: Script) -> Self {
        Self {
            script,
            reachable: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn last_request(&self) -> ChatRequest {
        self.requests
            .lock()
            .await
            .last()
            .cloned()
            .expect("no request captured")
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply, ProviderError> {
        self.requests.lock().await.push(request.clone());
        match &self.script {
            Script::Reply(text) => Ok(reply(text)),
            Script::ReplyAfter(delay, text) => {
                tokio::time::sleep(*delay).await;
                Ok(reply(text))
            }
            Script::Fail(err) => Err(err.clone()),
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        if self.reachable {
            Ok(())
        } else {
            Err(ProviderError::Network("unreachable".to_string()))
        }
    }
}

fn reply(text: &str) -> ChatReply {
    ChatReply {
        text: text.to_string(),
        // Scripted backends report no model, like some local servers.
        model: String::new(),
        usage: Some(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    }
}

/// Provider config for tests: 5s budget, memory on, alternation off.
pub fn test_config(name: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        base_url: "http://localhost:0".to_string(),
        api_key: String::new(),
        model: "test-model".to_string(),
        temperature: 0.2,
        system_prompt: "You are a test assistant.".to_string(),
        max_tokens: 256,
        timeout_secs: 5,
        strict_role_alternation: false,
        use_memory: true,
    }
}

/// One client over a scripted backend, with memory and backend exposed.
pub struct ClientHarness {
    pub client: Arc<ProviderClient>,
    pub memory: Arc<SessionMemory>,
    pub backend: Arc<ScriptedBackend>,
}

impl ClientHarness {
    pub fn new(name: &str, script: Script) -> Self {
        Self::with_config(name, script, |_| {})
    }

    pub fn with_config(
        name: &str,
        script: Script,
        tweak: impl FnOnce(&mut ProviderConfig),
    ) -> Self {
        let mut config = test_config(name);
        tweak(&mut config);
        let memory = Arc::new(SessionMemory::new(20));
        let backend = Arc::new(ScriptedBackend::new(script));
        let client = Arc::new(ProviderClient::new(
            config,
            Arc::clone(&backend) as Arc<dyn ChatBackend>,
            Arc::clone(&memory),
        ));
        Self {
            client,
            memory,
            backend,
        }
    }
}

/// Orchestrator over scripted providers, with its memory and store exposed.
pub struct FanoutHarness {
    pub orchestrator: Orchestrator,
    pub memory: Arc<SessionMemory>,
    pub store: Arc<MemoryStore>,
}

impl FanoutHarness {
    pub fn new(providers: Vec<(&str, Script)>) -> Self {
        Self::with(providers, OrchestratorConfig::default(), |_| {})
    }

    /// `tweak` runs per provider config; dispatch on `config.name` to give
    /// providers different budgets.
    pub fn with(
        providers: Vec<(&str, Script)>,
        config: OrchestratorConfig,
        tweak: impl Fn(&mut ProviderConfig),
    ) -> Self {
        let memory = Arc::new(SessionMemory::new(20));
        let store = Arc::new(MemoryStore::default());
        let clients = providers
            .into_iter()
            .map(|(name, script)| {
                let mut provider_config = test_config(name);
                tweak(&mut provider_config);
                let backend = Arc::new(ScriptedBackend::new(script));
                Arc::new(ProviderClient::new(
                    provider_config,
                    backend as Arc<dyn ChatBackend>,
                    Arc::clone(&memory),
                ))
            })
            .collect();
        let orchestrator = Orchestrator::new(
            clients,
            Arc::clone(&store) as Arc<dyn crate::store::ExchangeStore>,
            config,
        );
        Self {
            orchestrator,
            memory,
            store,
        }
    }
}
