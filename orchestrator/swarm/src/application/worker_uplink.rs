// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Worker Uplink Routing Adapter
//
// Worker-side implementation of the routing port. A worker only knows the
// members placed on it, so every command raised here (a member messaging a
// teammate, an approval decided on this node, a stop) is wrapped in an
// envelope and forwarded to the host, which owns the full placement.
//
// Forwarding failures become `FORWARD_FAILED` rejections instead of errors.

use aegis_team_core::domain::envelope::{EnvelopeBuilder, EnvelopeInput, EnvelopeKind, RunVersion, WireEnvelope};
use aegis_team_core::infrastructure::bridge::HostNodeBridgeClient;
use aegis_team_core::infrastructure::command_client::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::routing::{
    ControlStopRequest, DispatchResult, InterAgentMessageRequest, RoutedPayload, TeamRoutingPort, ToolApprovalDecision,
    UserMessageRequest,
};

pub const FORWARD_FAILED: &str = "FORWARD_FAILED";

/// Delivers an envelope to the host node.
#[async_trait]
pub trait HostForwarder: Send + Sync {
    async fn forward_to_host(&self, envelope: WireEnvelope) -> Result<(), TransportError>;
}

/// Forwards through the retrying bridge client.
pub struct BridgeHostForwarder {
    host_node_id: String,
    bridge: HostNodeBridgeClient,
}

impl BridgeHostForwarder {
    pub fn new(host_node_id: impl Into<String>, bridge: HostNodeBridgeClient) -> Self {
        Self {
            host_node_id: host_node_id.into(),
            bridge,
        }
    }
}

#[async_trait]
impl HostForwarder for BridgeHostForwarder {
    async fn forward_to_host(&self, envelope: WireEnvelope) -> Result<(), TransportError> {
        self.bridge.send_command(&self.host_node_id, &envelope).await.map(|_| ())
    }
}

pub struct WorkerUplinkRoutingAdapter {
    team_run_id: String,
    run_version: RunVersion,
    team_definition_id: String,
    builder: EnvelopeBuilder,
    forwarder: Arc<dyn HostForwarder>,
}

impl WorkerUplinkRoutingAdapter {
    pub fn new(
        team_run_id: impl Into<String>,
        run_version: RunVersion,
        team_definition_id: impl Into<String>,
        forwarder: Arc<dyn HostForwarder>,
    ) -> Self {
        Self {
            team_run_id: team_run_id.into(),
            run_version,
            team_definition_id: team_definition_id.into(),
            builder: EnvelopeBuilder::new(),
            forwarder,
        }
    }

    pub fn with_builder(mut self, builder: EnvelopeBuilder) -> Self {
        self.builder = builder;
        self
    }

    async fn forward<T: Serialize + Send>(&self, kind: EnvelopeKind, payload: T) -> DispatchResult {
        let routed = RoutedPayload {
            team_definition_id: self.team_definition_id.clone(),
            payload,
        };
        let envelope = match self
            .builder
            .build_envelope(EnvelopeInput::new(self.team_run_id.clone(), kind, routed), self.run_version)
            .map_err(|e| e.to_string())
            .and_then(|envelope| envelope.to_wire().map_err(|e| e.to_string()))
        {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(team_run_id = %self.team_run_id, kind = %kind, error = %e, "Failed to build uplink envelope");
                return DispatchResult::rejected(FORWARD_FAILED);
            }
        };

        let envelope_id = envelope.envelope_id.clone();
        match self.forwarder.forward_to_host(envelope).await {
            Ok(()) => {
                debug!(team_run_id = %self.team_run_id, envelope_id = %envelope_id, kind = %kind, "Forwarded to host");
                DispatchResult::accepted()
            }
            Err(e) => {
                warn!(
                    team_run_id = %self.team_run_id,
                    envelope_id = %envelope_id,
                    kind = %kind,
                    error = %e,
                    "Uplink forward failed"
                );
                DispatchResult::rejected(FORWARD_FAILED)
            }
        }
    }
}

#[async_trait]
impl TeamRoutingPort for WorkerUplinkRoutingAdapter {
    async fn dispatch_user_message(&self, request: UserMessageRequest) -> DispatchResult {
        self.forward(EnvelopeKind::UserMessage, request).await
    }

    async fn dispatch_inter_agent_message_request(&self, request: InterAgentMessageRequest) -> DispatchResult {
        self.forward(EnvelopeKind::InterAgentMessageRequest, request).await
    }

    async fn dispatch_tool_approval(&self, decision: ToolApprovalDecision) -> DispatchResult {
        self.forward(EnvelopeKind::ToolApproval, decision).await
    }

    async fn dispatch_control_stop(&self, request: ControlStopRequest) -> DispatchResult {
        self.forward(EnvelopeKind::ControlStop, request).await
    }
}
