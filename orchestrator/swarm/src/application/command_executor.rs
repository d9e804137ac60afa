// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Command Executors
//!
//! [`CommandHandler`] implementations plugged into the node bridge server.
//!
//! | Executor | Node role | Fenced against |
//! |----------|-----------|----------------|
//! | [`WorkerCommandExecutor`] | worker | local [`RunScopedTeamBindingRegistry`] |
//! | [`HostCommandExecutor`] | host | [`TeamRunRepository`](aegis_team_core::domain::repository::TeamRunRepository) |
//!
//! A worker executes commands against its own runtime only; it never routes
//! a command it received from the host back out again, and it only accepts
//! commands signed by the host that bootstrapped the run. The host executor
//! takes commands uplinked by workers holding members of the run and hands
//! them to the run's routing adapter, which owns the full placement. An
//! uplinked `CONTROL_STOP` goes through [`TeamRunStopper`] instead, so the
//! run record is stopped along with every runtime.

use aegis_team_core::domain::envelope::{EnvelopeKind, WireEnvelope};
use aegis_team_core::domain::fencing::{FencingError, RunVersionFencingPolicy, RunVersionResolver};
use aegis_team_core::domain::repository::{RepositoryRunVersionResolver, TeamRunRepository};
use aegis_team_core::infrastructure::bridge::{CommandError, CommandHandler, HostNodeBridgeClient};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::binding_registry::RunScopedTeamBindingRegistry;
use crate::application::routing_registry::TeamRoutingPortAdapterRegistry;
use crate::application::worker_uplink::{BridgeHostForwarder, WorkerUplinkRoutingAdapter};
use crate::domain::binding::{RunBootstrapPayload, RunScopedTeamBinding};
use crate::domain::routing::{
    dispatch_wire_envelope, ControlStopRequest, InterAgentMessageRequest, RoutedPayload, ToolApprovalDecision,
    UserMessageRequest,
};
use crate::domain::runtime::{RuntimeError, TeamMemberRuntime};

fn decode<T: DeserializeOwned>(envelope: &WireEnvelope) -> Result<T, CommandError> {
    envelope.decode_payload().map_err(|e| CommandError::InvalidPayload {
        kind: envelope.kind,
        reason: e.to_string(),
    })
}

fn unauthorized(sender_node_id: &str, reason: impl Into<String>) -> CommandError {
    CommandError::UnauthorizedSender {
        sender_node_id: sender_node_id.to_string(),
        reason: reason.into(),
    }
}

fn runtime_error(err: RuntimeError) -> CommandError {
    match err {
        RuntimeError::MemberNotFound(_) => CommandError::Rejected {
            code: "UNKNOWN_MEMBER".to_string(),
        },
        other => CommandError::Execution(other.to_string()),
    }
}

pub struct WorkerCommandExecutor {
    node_id: String,
    bindings: Arc<RunScopedTeamBindingRegistry>,
    routing: Arc<TeamRoutingPortAdapterRegistry>,
    runtime: Arc<dyn TeamMemberRuntime>,
    bridge: HostNodeBridgeClient,
    fencing: RunVersionFencingPolicy,
    bootstrap_lock: Mutex<()>,
}

impl WorkerCommandExecutor {
    pub fn new(
        node_id: impl Into<String>,
        bindings: Arc<RunScopedTeamBindingRegistry>,
        routing: Arc<TeamRoutingPortAdapterRegistry>,
        runtime: Arc<dyn TeamMemberRuntime>,
        bridge: HostNodeBridgeClient,
    ) -> Self {
        let fencing = RunVersionFencingPolicy::new(bindings.clone() as Arc<dyn RunVersionResolver>);
        Self {
            node_id: node_id.into(),
            bindings,
            routing,
            runtime,
            bridge,
            fencing,
            bootstrap_lock: Mutex::new(()),
        }
    }

    async fn bootstrap(&self, sender_node_id: &str, envelope: &WireEnvelope) -> Result<(), CommandError> {
        let payload: RunBootstrapPayload = decode(envelope)?;
        let team_run_id = envelope.team_run_id.as_str();
        if payload.host_node_id != sender_node_id {
            return Err(unauthorized(
                sender_node_id,
                format!("bootstrap names '{}' as host", payload.host_node_id),
            ));
        }

        // Serializes replacement of a binding so two bootstraps never start twice
        let _guard = self.bootstrap_lock.lock().await;

        if let Some(existing) = self.bindings.resolve_run(team_run_id) {
            if existing.host_node_id != sender_node_id {
                return Err(unauthorized(
                    sender_node_id,
                    format!("run is owned by '{}'", existing.host_node_id),
                ));
            }
            if existing.run_version > envelope.run_version {
                return Err(FencingError::StaleRunVersion {
                    team_run_id: team_run_id.to_string(),
                    received: envelope.run_version,
                    current: existing.run_version,
                }
                .into());
            }
            if existing.run_version == envelope.run_version {
                debug!(team_run_id = %team_run_id, run_version = %envelope.run_version, "Run already bootstrapped");
                return Ok(());
            }

            info!(
                team_run_id = %team_run_id,
                previous = %existing.run_version,
                run_version = %envelope.run_version,
                "Replacing binding for restarted run"
            );
            if let Err(e) = self.runtime.stop_team(team_run_id, Some("run restarted")).await {
                warn!(team_run_id = %team_run_id, error = %e, "Failed to stop previous runtime team");
            }
        }

        let runtime_team_id = self
            .runtime
            .start_team(team_run_id, &payload.members)
            .await
            .map_err(runtime_error)?;

        self.bindings.bind_run(RunScopedTeamBinding {
            team_run_id: team_run_id.to_string(),
            run_version: envelope.run_version,
            team_definition_id: payload.team_definition_id.clone(),
            host_node_id: payload.host_node_id.clone(),
            runtime_team_id,
            member_configs: payload.members.clone(),
        });

        let forwarder = Arc::new(BridgeHostForwarder::new(payload.host_node_id.clone(), self.bridge.clone()));
        let uplink = WorkerUplinkRoutingAdapter::new(
            team_run_id,
            envelope.run_version,
            payload.team_definition_id.clone(),
            forwarder,
        );
        self.routing.register(team_run_id, envelope.run_version, Arc::new(uplink));

        info!(
            node_id = %self.node_id,
            team_run_id = %team_run_id,
            run_version = %envelope.run_version,
            host_node_id = %payload.host_node_id,
            members = payload.members.len(),
            "Worker bootstrapped team run"
        );
        Ok(())
    }

    fn bound_run(
        &self,
        sender_node_id: &str,
        envelope: &WireEnvelope,
        team_definition_id: &str,
    ) -> Result<RunScopedTeamBinding, CommandError> {
        let binding = self
            .bindings
            .resolve_run(&envelope.team_run_id)
            .ok_or_else(|| CommandError::UnknownRun(envelope.team_run_id.clone()))?;
        if binding.host_node_id != sender_node_id {
            return Err(unauthorized(
                sender_node_id,
                format!("run is owned by '{}'", binding.host_node_id),
            ));
        }
        if binding.team_definition_id != team_definition_id {
            return Err(CommandError::InvalidPayload {
                kind: envelope.kind,
                reason: format!(
                    "team definition '{}' does not match bound definition '{}'",
                    team_definition_id, binding.team_definition_id
                ),
            });
        }
        Ok(binding)
    }

    fn require_member(binding: &RunScopedTeamBinding, member_name: &str) -> Result<(), CommandError> {
        if binding.hosts_member(member_name) {
            Ok(())
        } else {
            Err(runtime_error(RuntimeError::MemberNotFound(member_name.to_string())))
        }
    }

    async fn stop(&self, envelope: &WireEnvelope, request: ControlStopRequest) -> Result<(), CommandError> {
        let team_run_id = envelope.team_run_id.as_str();
        let _guard = self.bootstrap_lock.lock().await;
        // A bootstrap may have replaced the binding while this stop waited
        self.fencing
            .assert_current_run_version(team_run_id, envelope.run_version)
            .await?;

        let result = self
            .runtime
            .stop_team(team_run_id, request.reason.as_deref())
            .await
            .map_err(runtime_error);

        self.bindings.unbind_run(team_run_id);
        self.routing.unregister(team_run_id);
        info!(node_id = %self.node_id, team_run_id = %team_run_id, "Worker stopped team run");
        result
    }
}

#[async_trait]
impl CommandHandler for WorkerCommandExecutor {
    async fn execute(&self, sender_node_id: &str, envelope: &WireEnvelope) -> Result<(), CommandError> {
        if envelope.kind == EnvelopeKind::RunBootstrap {
            return self.bootstrap(sender_node_id, envelope).await;
        }

        self.fencing
            .assert_current_run_version(&envelope.team_run_id, envelope.run_version)
            .await?;

        let team_run_id = envelope.team_run_id.as_str();
        match envelope.kind {
            EnvelopeKind::UserMessage => {
                let routed: RoutedPayload<UserMessageRequest> = decode(envelope)?;
                let binding = self.bound_run(sender_node_id, envelope, &routed.team_definition_id)?;
                Self::require_member(&binding, &routed.payload.member_name)?;
                self.runtime
                    .deliver_user_message(team_run_id, &routed.payload)
                    .await
                    .map_err(runtime_error)
            }
            EnvelopeKind::InterAgentMessageRequest => {
                let routed: RoutedPayload<InterAgentMessageRequest> = decode(envelope)?;
                let binding = self.bound_run(sender_node_id, envelope, &routed.team_definition_id)?;
                Self::require_member(&binding, &routed.payload.recipient_member_name)?;
                self.runtime
                    .deliver_inter_agent_message(team_run_id, &routed.payload)
                    .await
                    .map_err(runtime_error)
            }
            EnvelopeKind::ToolApproval => {
                let routed: RoutedPayload<ToolApprovalDecision> = decode(envelope)?;
                let binding = self.bound_run(sender_node_id, envelope, &routed.team_definition_id)?;
                Self::require_member(&binding, &routed.payload.member_name)?;
                self.runtime
                    .apply_tool_approval(team_run_id, &routed.payload)
                    .await
                    .map_err(runtime_error)
            }
            EnvelopeKind::ControlStop => {
                let routed: RoutedPayload<ControlStopRequest> = decode(envelope)?;
                self.bound_run(sender_node_id, envelope, &routed.team_definition_id)?;
                self.stop(envelope, routed.payload).await
            }
            EnvelopeKind::RunBootstrap => Err(CommandError::UnsupportedKind(envelope.kind)),
        }
    }
}

/// Stops a whole team run on behalf of a member that asked for it.
#[async_trait]
pub trait TeamRunStopper: Send + Sync {
    async fn stop_team_run(&self, team_run_id: &str, reason: Option<String>) -> Result<(), CommandError>;
}

/// Executes commands that workers uplinked to the host.
pub struct HostCommandExecutor {
    repository: Arc<dyn TeamRunRepository>,
    fencing: RunVersionFencingPolicy,
    routing: Arc<TeamRoutingPortAdapterRegistry>,
    stopper: Arc<dyn TeamRunStopper>,
}

impl HostCommandExecutor {
    pub fn new(
        repository: Arc<dyn TeamRunRepository>,
        routing: Arc<TeamRoutingPortAdapterRegistry>,
        stopper: Arc<dyn TeamRunStopper>,
    ) -> Self {
        let resolver = Arc::new(RepositoryRunVersionResolver::new(repository.clone()));
        Self {
            repository,
            fencing: RunVersionFencingPolicy::new(resolver),
            routing,
            stopper,
        }
    }
}

#[async_trait]
impl CommandHandler for HostCommandExecutor {
    async fn execute(&self, sender_node_id: &str, envelope: &WireEnvelope) -> Result<(), CommandError> {
        if envelope.kind == EnvelopeKind::RunBootstrap {
            return Err(CommandError::UnsupportedKind(envelope.kind));
        }

        self.fencing
            .assert_current_run_version(&envelope.team_run_id, envelope.run_version)
            .await?;

        let record = self
            .repository
            .find_by_id(&envelope.team_run_id)
            .await
            .map_err(|e| CommandError::Execution(e.to_string()))?
            .ok_or_else(|| CommandError::UnknownRun(envelope.team_run_id.clone()))?;
        if !record.placement_by_member.nodes().contains(sender_node_id) {
            return Err(unauthorized(sender_node_id, "node holds no member of this run"));
        }

        if envelope.kind == EnvelopeKind::ControlStop {
            let routed: RoutedPayload<ControlStopRequest> = decode(envelope)?;
            if routed.team_definition_id != record.team_definition_id {
                return Err(CommandError::InvalidPayload {
                    kind: envelope.kind,
                    reason: format!(
                        "team definition '{}' does not match run definition '{}'",
                        routed.team_definition_id, record.team_definition_id
                    ),
                });
            }
            info!(
                team_run_id = %envelope.team_run_id,
                sender_node_id = %sender_node_id,
                "Worker requested team run stop"
            );
            return self
                .stopper
                .stop_team_run(&envelope.team_run_id, routed.payload.reason)
                .await;
        }

        let adapter = self
            .routing
            .try_resolve(&envelope.team_run_id)
            .ok_or_else(|| CommandError::UnknownRun(envelope.team_run_id.clone()))?;

        let result = dispatch_wire_envelope(adapter.as_ref(), envelope).await?;
        if result.accepted {
            Ok(())
        } else {
            Err(CommandError::Rejected {
                code: result.error_code.unwrap_or_else(|| "COMMAND_REJECTED".to_string()),
            })
        }
    }
}
