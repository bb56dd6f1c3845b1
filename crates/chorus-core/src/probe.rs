//! On-demand reachability checks, off the request path

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use crate::client::ProviderClient;
use crate::error::ChorusError;
use crate::types::ProviderId;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderStatus {
    Available,
    Unavailable,
}

/// One provider's reachability snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: ProviderId,
    pub model: String,
    pub status: ProviderStatus,
}

/// Pings each configured backend. Never touches memory scopes or the
/// store; any failure, including a slow one, maps to UNAVAILABLE.
pub struct StatusProbe {
    clients: BTreeMap<ProviderId, Arc<ProviderClient>>,
}

impl StatusProbe {
    pub fn new(clients: Vec<Arc<ProviderClient>>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|client| (client.id(), client))
                .collect(),
        }
    }

    pub async fn check(&self, id: &ProviderId) -> Result<ProviderHealth, ChorusError> {
        let client = self
            .clients
            .get(id)
            .ok_or_else(|| ChorusError::UnknownProvider(id.to_string()))?;
        Ok(probe(client).await)
    }

    /// Probe every provider concurrently; results come back in
    /// provider-identity order.
    pub async fn check_all(&self) -> Vec<ProviderHealth> {
        let mut handles = Vec::with_capacity(self.clients.len());
        for client in self.clients.values() {
            let client = Arc::clone(client);
            let id = client.id();
            let model = client.model().to_string();
            handles.push((id, model, tokio::spawn(async move { probe(&client).await })));
        }

        let mut report = Vec::with_capacity(handles.len());
        for (id, model, handle) in handles {
            let health = handle.await.unwrap_or(ProviderHealth {
                provider: id,
                model,
                status: ProviderStatus::Unavailable,
            });
            report.push(health);
        }
        report
    }
}

async fn probe(client: &ProviderClient) -> ProviderHealth {
    let status = match timeout(PROBE_TIMEOUT, client.ping()).await {
        Ok(Ok(())) => ProviderStatus::Available,
        Ok(Err(err)) => {
            debug!("Probe for '{}' failed: {}", client.id(), err);
            ProviderStatus::Unavailable
        }
        Err(_) => {
            debug!("Probe for '{}' timed out", client.id());
            ProviderStatus::Unavailable
        }
    };
    ProviderHealth {
        provider: client.id(),
        model: client.model().to_string(),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::memory::SessionMemory;
    use crate::providers::{ChatBackend, ChatReply, ChatRequest};
    use crate::testing::{Script, ScriptedBackend, test_config};
    use async_trait::async_trait;

    fn probe_over(backends: Vec<(&str, bool)>) -> (StatusProbe, Arc<SessionMemory>) {
        let memory = Arc::new(SessionMemory::new(8));
        let clients = backends
            .into_iter()
            .map(|(name, reachable)| {
                let script = Script::Reply("pong".to_string());
                let backend = if reachable {
                    ScriptedBackend::new(script)
                } else {
                    ScriptedBackend::unreachable(script)
                };
                Arc::new(ProviderClient::new(
                    test_config(name),
                    Arc::new(backend) as Arc<dyn ChatBackend>,
                    Arc::clone(&memory),
                ))
            })
            .collect();
        (StatusProbe::new(clients), memory)
    }

    #[tokio::test]
    async fn test_check_reports_reachability() {
        let (probe, _memory) = probe_over(vec![("up", true), ("down", false)]);
        let up = probe.check(&ProviderId::new("up")).await.unwrap();
        assert_eq!(up.status, ProviderStatus::Available);
        assert_eq!(up.model, "test-model");

        let down = probe.check(&ProviderId::new("down")).await.unwrap();
        assert_eq!(down.status, ProviderStatus::Unavailable);
    }

    #[tokio::test]
    async fn test_check_unknown_provider() {
        let (probe, _memory) = probe_over(vec![("up", true)]);
        let err = probe.check(&ProviderId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, ChorusError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn test_check_all_orders_by_identity_and_leaves_no_state() {
        let (probe, memory) = probe_over(vec![("zeta", true), ("alpha", false)]);
        let report = probe.check_all().await;
        let rows: Vec<(&str, ProviderStatus)> = report
            .iter()
            .map(|h| (h.provider.as_str(), h.status))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("alpha", ProviderStatus::Unavailable),
                ("zeta", ProviderStatus::Available),
            ]
        );
        assert_eq!(memory.scope_count(), 0);
    }

    struct HungPing;

    #[async_trait]
    impl ChatBackend for HungPing {
        async fn complete(&self, _request: &ChatRequest) -> Result<ChatReply, ProviderError> {
            Err(ProviderError::Network("unused".to_string()))
        }

        async fn ping(&self) -> Result<(), ProviderError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_ping_maps_to_unavailable() {
        let memory = Arc::new(SessionMemory::new(8));
        let client = Arc::new(ProviderClient::new(
            test_config("stuck"),
            Arc::new(HungPing) as Arc<dyn ChatBackend>,
            memory,
        ));
        let probe = StatusProbe::new(vec![client]);
        let health = probe.check(&ProviderId::new("stuck")).await.unwrap();
        assert_eq!(health.status, ProviderStatus::Unavailable);
    }

    #[test]
    fn test_status_serde_labels() {
        assert_eq!(
            serde_json::to_string(&ProviderStatus::Available).unwrap(),
            "\"AVAILABLE\""
        );
        assert_eq!(
            serde_json::to_string(&ProviderStatus::Unavailable).unwrap(),
            "\"UNAVAILABLE\""
        );
    }
}
