// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Team Run Orchestrator
//!
//! Host-side facade the API layer calls to run a distributed agent team.
//!
//! Start sequence for a team definition without an active run:
//!
//! 1. place members on nodes ([`PlacementPlanner`])
//! 2. verify member dependencies on their nodes ([`DependencyHydrationService`])
//! 3. persist the run at its initial run version ([`TeamRunRepository::create_run`])
//! 4. bootstrap every worker holding members, start the host's own members,
//!    bind the run and register its [`HostDistributedRoutingAdapter`]
//! 5. mark the run `running`
//!
//! Starts are serialized per team definition, so concurrent requests for the
//! same definition converge on a single run. Any failure after step 3 sends
//! `CONTROL_STOP` to every worker already bootstrapped and marks the run
//! `failed` before the error is returned.
//!
//! Events of members on this node must be published through
//! [`TeamRunOrchestrator::aggregator`], which registers tool approval
//! requests with the run's approval policy.

use aegis_team_core::application::dependency_hydration::{DependencyHydrationService, HydrationError};
use aegis_team_core::application::event_aggregator::TeamEventAggregator;
use aegis_team_core::domain::envelope::{EnvelopeBuilder, EnvelopeError, EnvelopeInput, EnvelopeKind};
use aegis_team_core::domain::placement::{PlacementError, PlacementPlanner};
use aegis_team_core::domain::repository::{RepositoryError, TeamRunRepository};
use aegis_team_core::domain::team_run::{NewTeamRun, TeamMemberSpec, TeamRunRecord, TeamRunStatus};
use aegis_team_core::domain::tool_approval::ToolApprovalConcurrencyPolicy;
use aegis_team_core::infrastructure::bridge::{CommandError, HostNodeBridgeClient};
use aegis_team_core::infrastructure::command_client::TransportError;
use aegis_team_core::infrastructure::node_directory::NodeDirectoryService;
use async_trait::async_trait;
use futures::future::join_all;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::binding_registry::RunScopedTeamBindingRegistry;
use crate::application::command_executor::TeamRunStopper;
use crate::application::host_routing::{HostDistributedRoutingAdapter, HostRunContext};
use crate::application::routing_registry::{RoutingRegistryError, TeamRoutingPortAdapterRegistry};
use crate::domain::binding::{MemberRuntimeConfig, RunBootstrapPayload, RunScopedTeamBinding};
use crate::domain::routing::{ControlStopRequest, RoutedPayload, TeamRoutingPort};
use crate::domain::runtime::{RuntimeError, TeamMemberRuntime};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid team run request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Hydration(#[from] HydrationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Routing(#[from] RoutingRegistryError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("Failed to bootstrap node '{node_id}': {source}")]
    Bootstrap {
        node_id: String,
        #[source]
        source: TransportError,
    },

    #[error("Team run not found: {0}")]
    NotFound(String),

    #[error("Team run '{0}' is still active")]
    RunStillActive(String),

    #[error("Team run '{0}' is not active")]
    RunNotActive(String),
}

#[derive(Debug, Clone)]
pub struct StartTeamRunRequest {
    pub team_definition_id: String,
    pub coordinator_member_name: String,
    pub members: Vec<TeamMemberSpec>,
    /// Preferred node for members without a home node. Defaults to this node.
    pub default_node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartedTeamRun {
    pub record: TeamRunRecord,
    /// `false` when an already-active run was returned.
    pub created: bool,
}

/// Shared collaborators of a host node.
#[derive(Clone)]
pub struct OrchestratorDependencies {
    pub local_node_id: String,
    pub repository: Arc<dyn TeamRunRepository>,
    pub directory: Arc<NodeDirectoryService>,
    pub hydration: Arc<DependencyHydrationService>,
    pub runtime: Arc<dyn TeamMemberRuntime>,
    pub bridge: HostNodeBridgeClient,
    pub bindings: Arc<RunScopedTeamBindingRegistry>,
    pub routing: Arc<TeamRoutingPortAdapterRegistry>,
    pub tool_approvals: Arc<ToolApprovalConcurrencyPolicy>,
    pub aggregator: TeamEventAggregator,
}

pub struct TeamRunOrchestrator {
    deps: OrchestratorDependencies,
    planner: PlacementPlanner,
    builder: EnvelopeBuilder,
    start_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TeamRunOrchestrator {
    pub fn new(mut deps: OrchestratorDependencies) -> Self {
        deps.aggregator = deps.aggregator.with_tool_approvals(deps.tool_approvals.clone());
        Self {
            deps,
            planner: PlacementPlanner::new(),
            builder: EnvelopeBuilder::new(),
            start_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_builder(mut self, builder: EnvelopeBuilder) -> Self {
        self.builder = builder;
        self
    }

    fn start_lock(&self, team_definition_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.start_locks
            .lock()
            .entry(team_definition_id.to_string())
            .or_default()
            .clone()
    }

    /// Start a run for the definition unless one is already active.
    pub async fn start_run_if_missing(&self, request: StartTeamRunRequest) -> Result<StartedTeamRun, OrchestratorError> {
        validate_request(&request)?;

        let lock = self.start_lock(&request.team_definition_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self
            .deps
            .repository
            .find_active_by_definition(&request.team_definition_id)
            .await?
        {
            return self.resume_existing(existing, &request.members).await;
        }

        let default_node_id = request
            .default_node_id
            .clone()
            .unwrap_or_else(|| self.deps.local_node_id.clone());
        let placement = self.planner.plan(
            &request.members,
            &self.deps.directory.snapshots(),
            Some(default_node_id.as_str()),
        )?;
        self.deps.hydration.hydrate(&placement, &request.members).await?;

        let created = self
            .deps
            .repository
            .create_run(NewTeamRun {
                team_run_id: Uuid::new_v4().to_string(),
                team_definition_id: request.team_definition_id.clone(),
                coordinator_member_name: request.coordinator_member_name.clone(),
                host_node_id: self.deps.local_node_id.clone(),
                placement_by_member: placement,
            })
            .await;

        let record = match created {
            Ok(record) => record,
            // Another host process won the race for this definition
            Err(RepositoryError::ActiveRunExists { team_run_id, .. }) => {
                let existing = self
                    .deps
                    .repository
                    .find_by_id(&team_run_id)
                    .await?
                    .ok_or_else(|| OrchestratorError::NotFound(team_run_id.clone()))?;
                return self.resume_existing(existing, &request.members).await;
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            team_run_id = %record.team_run_id,
            team_definition_id = %record.team_definition_id,
            members = record.placement_by_member.len(),
            nodes = record.placement_by_member.nodes().len(),
            "Created team run"
        );

        let record = self.activate(record, &request.members).await?;
        counter!("aegis_team_runs_started_total").increment(1);
        Ok(StartedTeamRun { record, created: true })
    }

    async fn resume_existing(
        &self,
        existing: TeamRunRecord,
        members: &[TeamMemberSpec],
    ) -> Result<StartedTeamRun, OrchestratorError> {
        if self.deps.routing.try_resolve(&existing.team_run_id).is_some() {
            return Ok(StartedTeamRun {
                record: existing,
                created: false,
            });
        }

        // Active in the repository but unbound here, e.g. after a host restart
        info!(team_run_id = %existing.team_run_id, run_version = %existing.run_version, "Rebinding active team run");
        let record = self.activate(existing, members).await?;
        Ok(StartedTeamRun { record, created: false })
    }

    /// Bind and mark running; on failure stop what was started and mark the
    /// run failed.
    async fn activate(&self, record: TeamRunRecord, members: &[TeamMemberSpec]) -> Result<TeamRunRecord, OrchestratorError> {
        let mut bootstrapped = Vec::new();
        if let Err(e) = self.bind(&record, members, &mut bootstrapped).await {
            error!(team_run_id = %record.team_run_id, error = %e, "Failed to bind team run");
            self.stop_workers(&record, &bootstrapped, "team run failed to start").await;
            self.release(&record.team_run_id);
            if let Err(status_err) = self
                .deps
                .repository
                .update_status(&record.team_run_id, TeamRunStatus::Failed)
                .await
            {
                warn!(team_run_id = %record.team_run_id, error = %status_err, "Failed to mark team run failed");
            }
            return Err(e);
        }

        if record.status == TeamRunStatus::Running {
            return Ok(record);
        }
        Ok(self
            .deps
            .repository
            .update_status(&record.team_run_id, TeamRunStatus::Running)
            .await?)
    }

    /// Nodes are pushed to `bootstrapped` as each bootstrap succeeds.
    async fn bind(
        &self,
        record: &TeamRunRecord,
        members: &[TeamMemberSpec],
        bootstrapped: &mut Vec<String>,
    ) -> Result<(), OrchestratorError> {
        let configs = member_configs(record, members)?;
        let local_node_id = self.deps.local_node_id.as_str();

        for node_id in record.placement_by_member.nodes() {
            if node_id == local_node_id {
                continue;
            }
            self.bootstrap_worker(record, &node_id, configs_on(record, &configs, &node_id))
                .await?;
            bootstrapped.push(node_id);
        }

        let local_configs = configs_on(record, &configs, local_node_id);
        let runtime_team_id = self
            .deps
            .runtime
            .start_team(&record.team_run_id, &local_configs)
            .await?;

        self.deps.bindings.bind_run(RunScopedTeamBinding {
            team_run_id: record.team_run_id.clone(),
            run_version: record.run_version,
            team_definition_id: record.team_definition_id.clone(),
            host_node_id: local_node_id.to_string(),
            runtime_team_id,
            member_configs: local_configs,
        });

        let adapter = HostDistributedRoutingAdapter::new(
            HostRunContext {
                team_run_id: record.team_run_id.clone(),
                team_definition_id: record.team_definition_id.clone(),
                run_version: record.run_version,
                local_node_id: local_node_id.to_string(),
                placement: record.placement_by_member.clone(),
            },
            self.deps.runtime.clone(),
            self.deps.bridge.clone(),
            self.deps.tool_approvals.clone(),
        )
        .with_builder(self.builder.clone());
        self.deps
            .routing
            .register(record.team_run_id.clone(), record.run_version, Arc::new(adapter));

        info!(
            team_run_id = %record.team_run_id,
            run_version = %record.run_version,
            "Team run bound"
        );
        Ok(())
    }

    async fn bootstrap_worker(
        &self,
        record: &TeamRunRecord,
        node_id: &str,
        members: Vec<MemberRuntimeConfig>,
    ) -> Result<(), OrchestratorError> {
        let member_count = members.len();
        let envelope = self.builder.build_envelope(
            EnvelopeInput::new(
                record.team_run_id.clone(),
                EnvelopeKind::RunBootstrap,
                RunBootstrapPayload {
                    team_definition_id: record.team_definition_id.clone(),
                    host_node_id: self.deps.local_node_id.clone(),
                    coordinator_member_name: record.coordinator_member_name.clone(),
                    members,
                },
            ),
            record.run_version,
        )?;

        self.deps
            .bridge
            .send_envelope(node_id, &envelope)
            .await
            .map_err(|source| OrchestratorError::Bootstrap {
                node_id: node_id.to_string(),
                source,
            })?;

        info!(
            team_run_id = %record.team_run_id,
            node_id = %node_id,
            run_version = %record.run_version,
            members = member_count,
            "Worker bootstrapped"
        );
        Ok(())
    }

    async fn stop_workers(&self, record: &TeamRunRecord, node_ids: &[String], reason: &str) {
        let stops = node_ids.iter().map(|node_id| async move {
            let envelope = match self.builder.build_envelope(
                EnvelopeInput::new(
                    record.team_run_id.clone(),
                    EnvelopeKind::ControlStop,
                    RoutedPayload {
                        team_definition_id: record.team_definition_id.clone(),
                        payload: ControlStopRequest {
                            reason: Some(reason.to_string()),
                        },
                    },
                ),
                record.run_version,
            ) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(team_run_id = %record.team_run_id, error = %e, "Failed to build stop envelope");
                    return;
                }
            };

            if let Err(e) = self.deps.bridge.send_envelope(node_id, &envelope).await {
                warn!(
                    team_run_id = %record.team_run_id,
                    node_id = %node_id,
                    error = %e,
                    "Failed to stop bootstrapped worker"
                );
            }
        });
        join_all(stops).await;
    }

    /// Move an active run to a new run version. Traffic still carrying the
    /// old version is fenced everywhere once the new version is bound.
    pub async fn restart_run(
        &self,
        team_run_id: &str,
        members: &[TeamMemberSpec],
    ) -> Result<TeamRunRecord, OrchestratorError> {
        let record = self.find(team_run_id).await?;
        if !record.status.is_active() {
            return Err(OrchestratorError::RunNotActive(team_run_id.to_string()));
        }

        let lock = self.start_lock(&record.team_definition_id);
        let _guard = lock.lock().await;

        let run_version = self.deps.repository.allocate_run_version(team_run_id).await?;
        self.deps.tool_approvals.clear_run(team_run_id);
        if let Err(e) = self.deps.runtime.stop_team(team_run_id, Some("run restarted")).await {
            warn!(team_run_id = %team_run_id, error = %e, "Failed to stop local members before restart");
        }

        info!(team_run_id = %team_run_id, previous = %record.run_version, run_version = %run_version, "Restarting team run");
        counter!("aegis_team_runs_restarted_total").increment(1);

        let record = TeamRunRecord { run_version, ..record };
        self.activate(record, members).await
    }

    pub async fn stop_run(&self, team_run_id: &str, reason: Option<String>) -> Result<TeamRunRecord, OrchestratorError> {
        let record = self.find(team_run_id).await?;

        match self.deps.routing.try_resolve(team_run_id) {
            Some(adapter) => {
                let result = adapter.dispatch_control_stop(ControlStopRequest { reason }).await;
                if !result.accepted {
                    warn!(
                        team_run_id = %team_run_id,
                        error_code = ?result.error_code,
                        "Control stop did not reach every node"
                    );
                }
            }
            None => {
                if let Err(e) = self.deps.runtime.stop_team(team_run_id, reason.as_deref()).await {
                    warn!(team_run_id = %team_run_id, error = %e, "Failed to stop unbound team run");
                }
            }
        }

        self.release(team_run_id);
        let record = if record.status.is_active() {
            self.deps
                .repository
                .update_status(team_run_id, TeamRunStatus::Stopped)
                .await?
        } else {
            record
        };

        info!(team_run_id = %team_run_id, status = %record.status, "Team run stopped");
        Ok(record)
    }

    /// Remove a run that is no longer active.
    pub async fn delete_run(&self, team_run_id: &str) -> Result<bool, OrchestratorError> {
        let Some(record) = self.deps.repository.find_by_id(team_run_id).await? else {
            return Ok(false);
        };
        if record.status.is_active() {
            return Err(OrchestratorError::RunStillActive(team_run_id.to_string()));
        }

        let deleted = self.deps.repository.delete(team_run_id).await?;
        self.release(team_run_id);
        self.deps.aggregator.reset_run(team_run_id);
        info!(team_run_id = %team_run_id, "Team run deleted");
        Ok(deleted)
    }

    pub fn routing_port(&self, team_run_id: &str) -> Result<Arc<dyn TeamRoutingPort>, OrchestratorError> {
        Ok(self.deps.routing.resolve(team_run_id)?)
    }

    /// Event aggregator for this node's runs, wired to the tool approval
    /// policy.
    pub fn aggregator(&self) -> &TeamEventAggregator {
        &self.deps.aggregator
    }

    async fn find(&self, team_run_id: &str) -> Result<TeamRunRecord, OrchestratorError> {
        self.deps
            .repository
            .find_by_id(team_run_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(team_run_id.to_string()))
    }

    fn release(&self, team_run_id: &str) {
        self.deps.routing.unregister(team_run_id);
        self.deps.bindings.unbind_run(team_run_id);
        self.deps.tool_approvals.clear_run(team_run_id);
    }
}

#[async_trait]
impl TeamRunStopper for TeamRunOrchestrator {
    async fn stop_team_run(&self, team_run_id: &str, reason: Option<String>) -> Result<(), CommandError> {
        match self.stop_run(team_run_id, reason).await {
            Ok(_) => Ok(()),
            Err(OrchestratorError::NotFound(id)) => Err(CommandError::UnknownRun(id)),
            Err(e) => Err(CommandError::Execution(e.to_string())),
        }
    }
}

fn validate_request(request: &StartTeamRunRequest) -> Result<(), OrchestratorError> {
    if request.team_definition_id.trim().is_empty() {
        return Err(OrchestratorError::InvalidRequest("team definition id must not be empty".into()));
    }
    if request.members.is_empty() {
        return Err(OrchestratorError::InvalidRequest("a team needs at least one member".into()));
    }
    if !request
        .members
        .iter()
        .any(|m| m.member_name == request.coordinator_member_name)
    {
        return Err(OrchestratorError::InvalidRequest(format!(
            "coordinator '{}' is not a team member",
            request.coordinator_member_name
        )));
    }
    Ok(())
}

fn member_configs(
    record: &TeamRunRecord,
    members: &[TeamMemberSpec],
) -> Result<HashMap<String, MemberRuntimeConfig>, OrchestratorError> {
    let configs: HashMap<String, MemberRuntimeConfig> = members
        .iter()
        .map(|m| (m.member_name.clone(), MemberRuntimeConfig::from(m)))
        .collect();

    for (member_name, _) in record.placement_by_member.iter() {
        if !configs.contains_key(member_name) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "placed member '{member_name}' has no definition"
            )));
        }
    }
    Ok(configs)
}

fn configs_on(
    record: &TeamRunRecord,
    configs: &HashMap<String, MemberRuntimeConfig>,
    node_id: &str,
) -> Vec<MemberRuntimeConfig> {
    record
        .placement_by_member
        .members_on(node_id)
        .iter()
        .filter_map(|name| configs.get(name).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(members: Vec<TeamMemberSpec>, coordinator: &str) -> StartTeamRunRequest {
        StartTeamRunRequest {
            team_definition_id: "team-a".into(),
            coordinator_member_name: coordinator.into(),
            members,
            default_node_id: None,
        }
    }

    #[test]
    fn test_request_validation() {
        let members = vec![TeamMemberSpec::new("lead", "agent-lead", "gpt-4o")];
        assert!(validate_request(&request(members.clone(), "lead")).is_ok());
        assert!(matches!(
            validate_request(&request(members, "ghost")),
            Err(OrchestratorError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_request(&request(vec![], "lead")),
            Err(OrchestratorError::InvalidRequest(_))
        ));
    }
}
