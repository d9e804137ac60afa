// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Port to the node-local agent execution engine.
//!
//! Prompt construction, tool calls and model streaming live behind this
//! trait. The coordination layer only starts, feeds and stops the members
//! placed on this node.

use async_trait::async_trait;

use crate::domain::binding::MemberRuntimeConfig;
use crate::domain::routing::{InterAgentMessageRequest, ToolApprovalDecision, UserMessageRequest};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("Member '{0}' is not running on this node")]
    MemberNotFound(String),

    #[error("Team runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Team runtime failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait TeamMemberRuntime: Send + Sync {
    /// Start the given members for a run; returns the runtime team id.
    async fn start_team(&self, team_run_id: &str, members: &[MemberRuntimeConfig]) -> Result<String, RuntimeError>;

    async fn deliver_user_message(&self, team_run_id: &str, request: &UserMessageRequest) -> Result<(), RuntimeError>;

    async fn deliver_inter_agent_message(
        &self,
        team_run_id: &str,
        request: &InterAgentMessageRequest,
    ) -> Result<(), RuntimeError>;

    async fn apply_tool_approval(&self, team_run_id: &str, decision: &ToolApprovalDecision) -> Result<(), RuntimeError>;

    /// Advisory: in-flight work may still complete.
    async fn stop_team(&self, team_run_id: &str, reason: Option<&str>) -> Result<(), RuntimeError>;
}
