// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Team event types.
//!
//! Local runtimes and remote workers both produce [`TeamEventInput`]s. The
//! aggregator turns them into [`AggregatedTeamEvent`]s carrying the per-run
//! sequence clients use for display and replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::envelope::RunVersion;

/// Event type a member emits when a tool call waits for approval.
pub const TOOL_APPROVAL_REQUESTED: &str = "TOOL_APPROVAL_REQUESTED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEventInput {
    pub team_run_id: String,
    pub run_version: RunVersion,
    pub source_node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// Event as posted by a worker to the host event endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTeamEvent {
    /// Worker-assigned id, stable across re-deliveries.
    pub source_event_id: String,
    #[serde(flatten)]
    pub event: TeamEventInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedTeamEvent {
    pub team_run_id: String,
    pub run_version: RunVersion,
    pub sequence: u64,
    pub source_node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub origin: EventOrigin,
    pub event_type: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl AggregatedTeamEvent {
    pub fn from_input(input: TeamEventInput, sequence: u64, origin: EventOrigin, received_at: DateTime<Utc>) -> Self {
        Self {
            team_run_id: input.team_run_id,
            run_version: input.run_version,
            sequence,
            source_node_id: input.source_node_id,
            member_name: input.member_name,
            agent_id: input.agent_id,
            origin,
            event_type: input.event_type,
            payload: input.payload,
            received_at,
        }
    }
}

/// Payload of a [`TOOL_APPROVAL_REQUESTED`] event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolApprovalRequestedPayload {
    pub tool_invocation_id: String,
    pub invocation_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_event_flattens_input() {
        let wire = json!({
            "sourceEventId": "evt-1",
            "teamRunId": "run-1",
            "runVersion": "3",
            "sourceNodeId": "worker-1",
            "memberName": "researcher",
            "eventType": "ASSISTANT_CHUNK",
            "payload": {"text": "hello"}
        });

        let event: RemoteTeamEvent = serde_json::from_value(wire).unwrap();
        assert_eq!(event.source_event_id, "evt-1");
        assert_eq!(event.event.run_version, RunVersion::new(3));
        assert_eq!(event.event.member_name.as_deref(), Some("researcher"));
        assert!(event.event.agent_id.is_none());
    }
}
