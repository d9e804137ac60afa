// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Host Distributed Routing Adapter
//!
//! Host-side implementation of [`TeamRoutingPort`] for one run version.
//!
//! | Command | Routed by | Local target | Remote target |
//! |---------|-----------|--------------|---------------|
//! | user message | `member_name` | runtime | `USER_MESSAGE` envelope |
//! | inter-agent message | `recipient_member_name` | runtime | `INTER_AGENT_MESSAGE_REQUEST` envelope |
//! | tool approval | `member_name`, after version check | runtime | `TOOL_APPROVAL` envelope |
//! | control stop | every node in the placement | runtime | `CONTROL_STOP` envelope per worker |
//!
//! Remote envelopes carry the adapter's run version, so once a newer adapter
//! replaces this one, anything it still sends is fenced by the workers.

use aegis_team_core::domain::envelope::{EnvelopeBuilder, EnvelopeInput, EnvelopeKind, RunVersion};
use aegis_team_core::domain::team_run::Placement;
use aegis_team_core::domain::tool_approval::ToolApprovalConcurrencyPolicy;
use aegis_team_core::infrastructure::bridge::HostNodeBridgeClient;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::routing::{
    ControlStopRequest, DispatchResult, InterAgentMessageRequest, RoutedPayload, TeamRoutingPort, ToolApprovalDecision,
    UserMessageRequest,
};
use crate::domain::runtime::{RuntimeError, TeamMemberRuntime};

pub const UNKNOWN_MEMBER: &str = "UNKNOWN_MEMBER";
pub const DELIVERY_FAILED: &str = "DELIVERY_FAILED";
pub const RUNTIME_REJECTED: &str = "RUNTIME_REJECTED";

/// Identity of the run an adapter serves.
#[derive(Debug, Clone)]
pub struct HostRunContext {
    pub team_run_id: String,
    pub team_definition_id: String,
    pub run_version: RunVersion,
    pub local_node_id: String,
    pub placement: Placement,
}

pub struct HostDistributedRoutingAdapter {
    context: HostRunContext,
    runtime: Arc<dyn TeamMemberRuntime>,
    bridge: HostNodeBridgeClient,
    tool_approvals: Arc<ToolApprovalConcurrencyPolicy>,
    builder: EnvelopeBuilder,
}

enum Target<'a> {
    Local,
    Remote(&'a str),
}

impl HostDistributedRoutingAdapter {
    pub fn new(
        context: HostRunContext,
        runtime: Arc<dyn TeamMemberRuntime>,
        bridge: HostNodeBridgeClient,
        tool_approvals: Arc<ToolApprovalConcurrencyPolicy>,
    ) -> Self {
        Self {
            context,
            runtime,
            bridge,
            tool_approvals,
            builder: EnvelopeBuilder::new(),
        }
    }

    pub fn with_builder(mut self, builder: EnvelopeBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn run_version(&self) -> RunVersion {
        self.context.run_version
    }

    fn target(&self, member_name: &str) -> Option<Target<'_>> {
        let node_id = self.context.placement.node_for(member_name)?;
        if node_id == self.context.local_node_id {
            Some(Target::Local)
        } else {
            Some(Target::Remote(node_id))
        }
    }

    async fn send_remote<T: Serialize + Send + Sync>(&self, node_id: &str, kind: EnvelopeKind, payload: T) -> DispatchResult {
        let routed = RoutedPayload {
            team_definition_id: self.context.team_definition_id.clone(),
            payload,
        };
        let envelope = match self.builder.build_envelope(
            EnvelopeInput::new(self.context.team_run_id.clone(), kind, routed),
            self.context.run_version,
        ) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(team_run_id = %self.context.team_run_id, error = %e, "Failed to build command envelope");
                return DispatchResult::rejected(DELIVERY_FAILED);
            }
        };

        match self.bridge.send_envelope(node_id, &envelope).await {
            Ok(outcome) => {
                debug!(
                    team_run_id = %self.context.team_run_id,
                    node_id = %node_id,
                    kind = %kind,
                    attempts = outcome.attempts,
                    deduped = outcome.deduped,
                    "Command delivered to worker"
                );
                DispatchResult::accepted()
            }
            Err(e) => {
                warn!(
                    team_run_id = %self.context.team_run_id,
                    node_id = %node_id,
                    kind = %kind,
                    error = %e,
                    "Command delivery to worker failed"
                );
                DispatchResult::rejected(DELIVERY_FAILED)
            }
        }
    }

    fn runtime_result(&self, result: Result<(), RuntimeError>) -> DispatchResult {
        match result {
            Ok(()) => DispatchResult::accepted(),
            Err(RuntimeError::MemberNotFound(member)) => {
                warn!(team_run_id = %self.context.team_run_id, member = %member, "Local runtime does not know member");
                DispatchResult::rejected(UNKNOWN_MEMBER)
            }
            Err(e) => {
                warn!(team_run_id = %self.context.team_run_id, error = %e, "Local runtime rejected command");
                DispatchResult::rejected(RUNTIME_REJECTED)
            }
        }
    }
}

#[async_trait]
impl TeamRoutingPort for HostDistributedRoutingAdapter {
    async fn dispatch_user_message(&self, request: UserMessageRequest) -> DispatchResult {
        match self.target(&request.member_name) {
            None => DispatchResult::rejected(UNKNOWN_MEMBER),
            Some(Target::Local) => {
                let result = self
                    .runtime
                    .deliver_user_message(&self.context.team_run_id, &request)
                    .await;
                self.runtime_result(result)
            }
            Some(Target::Remote(node_id)) => self.send_remote(node_id, EnvelopeKind::UserMessage, request).await,
        }
    }

    async fn dispatch_inter_agent_message_request(&self, request: InterAgentMessageRequest) -> DispatchResult {
        match self.target(&request.recipient_member_name) {
            None => DispatchResult::rejected(UNKNOWN_MEMBER),
            Some(Target::Local) => {
                let result = self
                    .runtime
                    .deliver_inter_agent_message(&self.context.team_run_id, &request)
                    .await;
                self.runtime_result(result)
            }
            Some(Target::Remote(node_id)) => {
                self.send_remote(node_id, EnvelopeKind::InterAgentMessageRequest, request)
                    .await
            }
        }
    }

    async fn dispatch_tool_approval(&self, decision: ToolApprovalDecision) -> DispatchResult {
        let team_run_id = &self.context.team_run_id;
        if let Err(e) = self.tool_approvals.validate_invocation_version(
            team_run_id,
            &decision.tool_invocation_id,
            decision.invocation_version,
        ) {
            debug!(team_run_id = %team_run_id, error = %e, "Tool approval rejected");
            return DispatchResult::rejected(e.code());
        }

        let tool_invocation_id = decision.tool_invocation_id.clone();
        let result = match self.target(&decision.member_name) {
            None => DispatchResult::rejected(UNKNOWN_MEMBER),
            Some(Target::Local) => {
                let result = self.runtime.apply_tool_approval(team_run_id, &decision).await;
                self.runtime_result(result)
            }
            Some(Target::Remote(node_id)) => self.send_remote(node_id, EnvelopeKind::ToolApproval, decision).await,
        };

        // A delivered decision settles the invocation; later duplicates are missing
        if result.accepted {
            self.tool_approvals.complete_invocation(team_run_id, &tool_invocation_id);
        }
        result
    }

    async fn dispatch_control_stop(&self, request: ControlStopRequest) -> DispatchResult {
        let team_run_id = &self.context.team_run_id;
        let workers: Vec<String> = self
            .context
            .placement
            .nodes()
            .into_iter()
            .filter(|node_id| *node_id != self.context.local_node_id)
            .collect();

        let sends = workers
            .iter()
            .map(|node_id| self.send_remote(node_id, EnvelopeKind::ControlStop, request.clone()));
        let mut failed = join_all(sends).await.iter().any(|result| !result.accepted);

        if let Err(e) = self.runtime.stop_team(team_run_id, request.reason.as_deref()).await {
            warn!(team_run_id = %team_run_id, error = %e, "Local runtime failed to stop team");
            failed = true;
        }
        self.tool_approvals.clear_run(team_run_id);

        if failed {
            DispatchResult::rejected(DELIVERY_FAILED)
        } else {
            DispatchResult::accepted()
        }
    }
}
