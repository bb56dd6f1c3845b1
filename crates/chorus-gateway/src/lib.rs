//! chorus-gateway — REST control plane for chorus
//!
//! Exposes the orchestrator's ask paths over HTTP alongside read-only
//! routes for the exchange archive and provider health.

pub mod protocol;
pub mod server;

pub use protocol::{ApiError, ErrorBody, HealthReply, HistoryReply, SearchReply, StatusReply};
pub use server::{GatewayServer, GatewayState};
