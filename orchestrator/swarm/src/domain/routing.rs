// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Team Routing Port
//!
//! Per-run delivery contract for the four team commands. The host and the
//! workers each provide an implementation; callers never know whether the
//! target member runs locally or on another node.
//!
//! Mid-run failures come back as a rejected [`DispatchResult`] instead of an
//! error, so one failed delivery never takes down the caller's event loop.

use aegis_team_core::domain::envelope::{EnvelopeKind, WireEnvelope};
use aegis_team_core::infrastructure::bridge::CommandError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessageRequest {
    pub member_name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterAgentMessageRequest {
    pub sender_member_name: String,
    pub recipient_member_name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolApprovalDecision {
    pub member_name: String,
    pub tool_invocation_id: String,
    pub invocation_version: u64,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlStopRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Command envelope payload: the request plus the team definition it
/// belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedPayload<T> {
    pub team_definition_id: String,
    pub payload: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl DispatchResult {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            error_code: None,
        }
    }

    pub fn rejected(error_code: impl Into<String>) -> Self {
        Self {
            accepted: false,
            error_code: Some(error_code.into()),
        }
    }
}

#[async_trait]
pub trait TeamRoutingPort: Send + Sync {
    async fn dispatch_user_message(&self, request: UserMessageRequest) -> DispatchResult;

    async fn dispatch_inter_agent_message_request(&self, request: InterAgentMessageRequest) -> DispatchResult;

    async fn dispatch_tool_approval(&self, decision: ToolApprovalDecision) -> DispatchResult;

    async fn dispatch_control_stop(&self, request: ControlStopRequest) -> DispatchResult;
}

fn decode<T: DeserializeOwned>(envelope: &WireEnvelope) -> Result<RoutedPayload<T>, CommandError> {
    envelope.decode_payload().map_err(|e| CommandError::InvalidPayload {
        kind: envelope.kind,
        reason: e.to_string(),
    })
}

/// Decode a command envelope by kind and hand it to a routing port.
pub async fn dispatch_wire_envelope(
    port: &dyn TeamRoutingPort,
    envelope: &WireEnvelope,
) -> Result<DispatchResult, CommandError> {
    let result = match envelope.kind {
        EnvelopeKind::UserMessage => port.dispatch_user_message(decode(envelope)?.payload).await,
        EnvelopeKind::InterAgentMessageRequest => {
            port.dispatch_inter_agent_message_request(decode(envelope)?.payload).await
        }
        EnvelopeKind::ToolApproval => port.dispatch_tool_approval(decode(envelope)?.payload).await,
        EnvelopeKind::ControlStop => port.dispatch_control_stop(decode(envelope)?.payload).await,
        EnvelopeKind::RunBootstrap => return Err(CommandError::UnsupportedKind(envelope.kind)),
    };
    Ok(result)
}
