// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end team run lifecycle over an in-process bridge.
//!
//! Nodes share a [`LoopbackNetwork`] that hands envelopes straight to the
//! target node's [`WorkerNodeBridgeServer`], tagged with the sending node the
//! way the signed HTTP endpoint would. Every node runs a recording
//! [`TeamMemberRuntime`], so the tests can assert which node actually
//! executed each command.

use aegis_team_core::application::dependency_hydration::{DependencyHydrationService, StaticDependencyCatalog};
use aegis_team_core::application::event_aggregator::TeamEventAggregator;
use aegis_team_core::application::retry::CommandRetryPolicy;
use aegis_team_core::domain::envelope::{EnvelopeBuilder, EnvelopeInput, EnvelopeKind, RunVersion, WireEnvelope};
use aegis_team_core::domain::events::{TeamEventInput, TOOL_APPROVAL_REQUESTED};
use aegis_team_core::domain::fencing::FencingError;
use aegis_team_core::domain::node::NodeDirectoryEntry;
use aegis_team_core::domain::repository::TeamRunRepository;
use aegis_team_core::domain::team_run::{DependencyKind, TeamMemberSpec, TeamRunRecord, TeamRunStatus};
use aegis_team_core::domain::tool_approval::ToolApprovalConcurrencyPolicy;
use aegis_team_core::infrastructure::bridge::{
    CommandError, CommandHandler, HostNodeBridgeClient, WorkerNodeBridgeServer,
};
use aegis_team_core::infrastructure::command_client::{CommandTransport, TransportError};
use aegis_team_core::infrastructure::node_directory::NodeDirectoryService;
use aegis_team_core::infrastructure::repositories::InMemoryTeamRunRepository;
use aegis_team_swarm::application::{
    HostCommandExecutor, OrchestratorDependencies, OrchestratorError, RunScopedTeamBindingRegistry,
    StartTeamRunRequest, TeamRoutingPortAdapterRegistry, TeamRunOrchestrator, WorkerCommandExecutor,
};
use aegis_team_swarm::domain::{
    ControlStopRequest, DispatchResult, InterAgentMessageRequest, MemberRuntimeConfig, RoutedPayload,
    RunBootstrapPayload, RuntimeError, TeamMemberRuntime, ToolApprovalDecision, UserMessageRequest,
};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const HOST: &str = "host";
const WORKER: &str = "worker-1";
const WORKER_2: &str = "worker-2";

#[derive(Default)]
struct RecordingRuntime {
    calls: Mutex<Vec<String>>,
}

impl RecordingRuntime {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl TeamMemberRuntime for RecordingRuntime {
    async fn start_team(&self, team_run_id: &str, members: &[MemberRuntimeConfig]) -> Result<String, RuntimeError> {
        let mut names: Vec<&str> = members.iter().map(|m| m.member_name.as_str()).collect();
        names.sort_unstable();
        self.calls.lock().push(format!("start:{}", names.join(",")));
        Ok(format!("rt-{team_run_id}"))
    }

    async fn deliver_user_message(&self, _team_run_id: &str, request: &UserMessageRequest) -> Result<(), RuntimeError> {
        self.calls
            .lock()
            .push(format!("user:{}:{}", request.member_name, request.content));
        Ok(())
    }

    async fn deliver_inter_agent_message(
        &self,
        _team_run_id: &str,
        request: &InterAgentMessageRequest,
    ) -> Result<(), RuntimeError> {
        self.calls.lock().push(format!(
            "inter:{}->{}",
            request.sender_member_name, request.recipient_member_name
        ));
        Ok(())
    }

    async fn apply_tool_approval(&self, _team_run_id: &str, decision: &ToolApprovalDecision) -> Result<(), RuntimeError> {
        self.calls
            .lock()
            .push(format!("approval:{}:{}", decision.tool_invocation_id, decision.approved));
        Ok(())
    }

    async fn stop_team(&self, _team_run_id: &str, _reason: Option<&str>) -> Result<(), RuntimeError> {
        self.calls.lock().push("stop".to_string());
        Ok(())
    }
}

/// In-process bridge servers keyed by node id.
#[derive(Default)]
struct LoopbackNetwork {
    servers: RwLock<HashMap<String, Arc<WorkerNodeBridgeServer>>>,
    sent: Mutex<Vec<(String, EnvelopeKind)>>,
}

impl LoopbackNetwork {
    fn attach(&self, node_id: &str, handler: Arc<dyn CommandHandler>) {
        self.servers
            .write()
            .insert(node_id.to_string(), Arc::new(WorkerNodeBridgeServer::new(handler, 128)));
    }

    fn transport(self: &Arc<Self>, from_node_id: &str) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            network: self.clone(),
            from_node_id: from_node_id.to_string(),
        })
    }

    fn bridge(self: &Arc<Self>, from_node_id: &str) -> HostNodeBridgeClient {
        HostNodeBridgeClient::new(
            self.transport(from_node_id),
            CommandRetryPolicy::new(1, Duration::ZERO, 1.0, 0.0),
        )
    }

    fn sent_count(&self, node_id: &str, kind: EnvelopeKind) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(node, k)| node == node_id && *k == kind)
            .count()
    }
}

/// One node's outgoing link; the receiving server sees `from_node_id` as the
/// authenticated sender.
struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
    from_node_id: String,
}

#[async_trait]
impl CommandTransport for LoopbackTransport {
    async fn send_command(&self, target_node_id: &str, envelope: &WireEnvelope) -> Result<(), TransportError> {
        self.network
            .sent
            .lock()
            .push((target_node_id.to_string(), envelope.kind));
        let server = self
            .network
            .servers
            .read()
            .get(target_node_id)
            .cloned()
            .ok_or_else(|| TransportError::Network(format!("{target_node_id} unreachable")))?;

        server
            .handle_command(&self.from_node_id, envelope)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Status {
                status: match e {
                    CommandError::UnauthorizedSender { .. } => 403,
                    ref e if e.is_consistency_error() => 409,
                    _ => 500,
                },
                body: e.code().to_string(),
            })
    }
}

struct WorkerNode {
    runtime: Arc<RecordingRuntime>,
    bindings: Arc<RunScopedTeamBindingRegistry>,
    routing: Arc<TeamRoutingPortAdapterRegistry>,
}

struct Cluster {
    orchestrator: Arc<TeamRunOrchestrator>,
    repository: Arc<InMemoryTeamRunRepository>,
    network: Arc<LoopbackNetwork>,
    host_runtime: Arc<RecordingRuntime>,
    host_routing: Arc<TeamRoutingPortAdapterRegistry>,
    workers: HashMap<&'static str, WorkerNode>,
}

impl Cluster {
    fn worker(&self, node_id: &str) -> &WorkerNode {
        &self.workers[node_id]
    }
}

fn cluster_with(catalog: StaticDependencyCatalog, reachable_workers: &[&'static str]) -> Cluster {
    let network = Arc::new(LoopbackNetwork::default());
    let directory = Arc::new(NodeDirectoryService::new(vec![
        NodeDirectoryEntry::new(HOST, "http://host.internal:8088"),
        NodeDirectoryEntry::new(WORKER, "http://worker-1.internal:8088"),
        NodeDirectoryEntry::new(WORKER_2, "http://worker-2.internal:8088"),
    ]));
    let repository = Arc::new(InMemoryTeamRunRepository::new());
    let host_runtime = Arc::new(RecordingRuntime::default());
    let host_routing = Arc::new(TeamRoutingPortAdapterRegistry::new());

    let orchestrator = Arc::new(TeamRunOrchestrator::new(OrchestratorDependencies {
        local_node_id: HOST.to_string(),
        repository: repository.clone(),
        directory,
        hydration: Arc::new(DependencyHydrationService::new(Arc::new(catalog))),
        runtime: host_runtime.clone(),
        bridge: network.bridge(HOST),
        bindings: Arc::new(RunScopedTeamBindingRegistry::new()),
        routing: host_routing.clone(),
        tool_approvals: Arc::new(ToolApprovalConcurrencyPolicy::new()),
        aggregator: TeamEventAggregator::with_default_capacity(),
    }));
    network.attach(
        HOST,
        Arc::new(HostCommandExecutor::new(
            repository.clone(),
            host_routing.clone(),
            orchestrator.clone(),
        )),
    );

    let mut workers = HashMap::new();
    for &node_id in reachable_workers {
        let worker = WorkerNode {
            runtime: Arc::new(RecordingRuntime::default()),
            bindings: Arc::new(RunScopedTeamBindingRegistry::new()),
            routing: Arc::new(TeamRoutingPortAdapterRegistry::new()),
        };
        network.attach(
            node_id,
            Arc::new(WorkerCommandExecutor::new(
                node_id,
                worker.bindings.clone(),
                worker.routing.clone(),
                worker.runtime.clone(),
                network.bridge(node_id),
            )),
        );
        workers.insert(node_id, worker);
    }

    Cluster {
        orchestrator,
        repository,
        network,
        host_runtime,
        host_routing,
        workers,
    }
}

fn cluster() -> Cluster {
    cluster_with(StaticDependencyCatalog::new(), &[WORKER])
}

fn members() -> Vec<TeamMemberSpec> {
    vec![
        TeamMemberSpec::new("lead", "agent-lead", "gpt-4o").with_home_node(HOST),
        TeamMemberSpec::new("researcher", "agent-research", "claude-sonnet").with_home_node(WORKER),
        TeamMemberSpec::new("writer", "agent-writer", "gpt-4o-mini"),
    ]
}

fn start_request(members: Vec<TeamMemberSpec>) -> StartTeamRunRequest {
    StartTeamRunRequest {
        team_definition_id: "team-a".to_string(),
        coordinator_member_name: "lead".to_string(),
        members,
        default_node_id: None,
    }
}

fn user_message(member: &str, content: &str) -> UserMessageRequest {
    UserMessageRequest {
        member_name: member.to_string(),
        content: content.to_string(),
    }
}

async fn started(cluster: &Cluster) -> TeamRunRecord {
    cluster
        .orchestrator
        .start_run_if_missing(start_request(members()))
        .await
        .unwrap()
        .record
}

#[tokio::test]
async fn test_start_places_bootstraps_and_binds() {
    let cluster = cluster();
    let worker = cluster.worker(WORKER);

    let first = cluster
        .orchestrator
        .start_run_if_missing(start_request(members()))
        .await
        .unwrap();
    assert!(first.created);
    let run = first.record;
    assert_eq!(run.status, TeamRunStatus::Running);
    assert_eq!(run.run_version, RunVersion::INITIAL);
    assert_eq!(run.placement_by_member.node_for("researcher"), Some(WORKER));
    assert_eq!(run.placement_by_member.node_for("writer"), Some(HOST));

    assert_eq!(cluster.host_runtime.calls(), vec!["start:lead,writer"]);
    assert_eq!(worker.runtime.calls(), vec!["start:researcher"]);

    let worker_binding = worker.bindings.resolve_run(&run.team_run_id).unwrap();
    assert_eq!(worker_binding.run_version, RunVersion::INITIAL);
    assert_eq!(worker_binding.host_node_id, HOST);
    assert!(worker_binding.hosts_member("researcher"));
    assert!(!worker_binding.hosts_member("lead"));
    assert!(worker.routing.try_resolve(&run.team_run_id).is_some());

    let again = cluster
        .orchestrator
        .start_run_if_missing(start_request(members()))
        .await
        .unwrap();
    assert!(!again.created);
    assert_eq!(again.record.team_run_id, run.team_run_id);
    assert_eq!(cluster.network.sent_count(WORKER, EnvelopeKind::RunBootstrap), 1);
    assert_eq!(cluster.host_runtime.count("start"), 1);
}

#[tokio::test]
async fn test_concurrent_starts_converge_on_one_run() {
    let cluster = cluster();

    let starts = (0..5).map(|_| cluster.orchestrator.start_run_if_missing(start_request(members())));
    let results: Vec<_> = join_all(starts).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(results.iter().filter(|r| r.created).count(), 1);
    let run_id = &results[0].record.team_run_id;
    assert!(results.iter().all(|r| &r.record.team_run_id == run_id));
    assert_eq!(cluster.repository.list_active().await.unwrap().len(), 1);
    assert_eq!(cluster.network.sent_count(WORKER, EnvelopeKind::RunBootstrap), 1);
}

#[tokio::test]
async fn test_host_routes_to_local_and_remote_members() {
    let cluster = cluster();
    let run = started(&cluster).await;
    let port = cluster.orchestrator.routing_port(&run.team_run_id).unwrap();

    assert!(port.dispatch_user_message(user_message("lead", "plan it")).await.accepted);
    assert!(port.dispatch_user_message(user_message("researcher", "dig in")).await.accepted);
    assert_eq!(
        port.dispatch_user_message(user_message("ghost", "hello?")).await,
        DispatchResult::rejected("UNKNOWN_MEMBER")
    );

    assert!(cluster.host_runtime.calls().contains(&"user:lead:plan it".to_string()));
    assert!(cluster
        .worker(WORKER)
        .runtime
        .calls()
        .contains(&"user:researcher:dig in".to_string()));
    assert_eq!(cluster.network.sent_count(WORKER, EnvelopeKind::UserMessage), 1);
}

#[tokio::test]
async fn test_worker_uplink_reaches_host_member() {
    let cluster = cluster();
    let run = started(&cluster).await;
    let worker = cluster.worker(WORKER);

    let uplink = worker.routing.resolve(&run.team_run_id).unwrap();
    let result = uplink
        .dispatch_inter_agent_message_request(InterAgentMessageRequest {
            sender_member_name: "researcher".to_string(),
            recipient_member_name: "lead".to_string(),
            content: "sources collected".to_string(),
        })
        .await;

    assert_eq!(result, DispatchResult::accepted());
    assert_eq!(cluster.network.sent_count(HOST, EnvelopeKind::InterAgentMessageRequest), 1);
    assert!(cluster.host_runtime.calls().contains(&"inter:researcher->lead".to_string()));
    assert!(!worker.runtime.calls().iter().any(|c| c.starts_with("inter")));
}

fn approval_requested(run: &TeamRunRecord, node_id: &str, member: &str, call: &str, version: u64) -> TeamEventInput {
    TeamEventInput {
        team_run_id: run.team_run_id.clone(),
        run_version: run.run_version,
        source_node_id: node_id.to_string(),
        member_name: Some(member.to_string()),
        agent_id: None,
        event_type: TOOL_APPROVAL_REQUESTED.to_string(),
        payload: json!({"toolInvocationId": call, "invocationVersion": version}),
    }
}

fn decision(member: &str, call: &str, version: u64) -> ToolApprovalDecision {
    ToolApprovalDecision {
        member_name: member.to_string(),
        tool_invocation_id: call.to_string(),
        invocation_version: version,
        approved: true,
        reason: None,
    }
}

#[tokio::test]
async fn test_tool_approval_requires_current_invocation_version() {
    let cluster = cluster();
    let run = started(&cluster).await;
    let port = cluster.orchestrator.routing_port(&run.team_run_id).unwrap();
    let events = cluster.orchestrator.aggregator();

    // A host member's request is published locally, a worker member's arrives through ingress
    events.publish_local_event(approval_requested(&run, HOST, "lead", "call-1", 2));
    events.publish_remote_event(approval_requested(&run, WORKER, "researcher", "call-2", 1));

    assert_eq!(
        port.dispatch_tool_approval(decision("lead", "call-1", 1)).await,
        DispatchResult::rejected("STALE_INVOCATION_VERSION")
    );
    assert!(port.dispatch_tool_approval(decision("lead", "call-1", 2)).await.accepted);
    assert_eq!(
        port.dispatch_tool_approval(decision("lead", "call-1", 2)).await,
        DispatchResult::rejected("MISSING_INVOCATION_VERSION")
    );
    assert!(port.dispatch_tool_approval(decision("researcher", "call-2", 1)).await.accepted);

    assert_eq!(cluster.host_runtime.count("approval:call-1:true"), 1);
    assert_eq!(cluster.worker(WORKER).runtime.count("approval:call-2:true"), 1);
}

#[tokio::test]
async fn test_restart_fences_previous_run_version() {
    let cluster = cluster();
    let run = started(&cluster).await;
    let worker = cluster.worker(WORKER);
    let stale_port = cluster.orchestrator.routing_port(&run.team_run_id).unwrap();

    let restarted = cluster
        .orchestrator
        .restart_run(&run.team_run_id, &members())
        .await
        .unwrap();
    assert_eq!(restarted.run_version, RunVersion::new(2));
    assert_eq!(restarted.status, TeamRunStatus::Running);
    assert_eq!(
        worker.bindings.resolve_run(&run.team_run_id).unwrap().run_version,
        RunVersion::new(2)
    );
    assert_eq!(worker.runtime.calls(), vec!["start:researcher", "stop", "start:researcher"]);

    // The replaced adapter still stamps version 1, which the worker now fences
    assert_eq!(
        stale_port.dispatch_user_message(user_message("researcher", "old")).await,
        DispatchResult::rejected("DELIVERY_FAILED")
    );

    let port = cluster.orchestrator.routing_port(&run.team_run_id).unwrap();
    assert!(port.dispatch_user_message(user_message("researcher", "new")).await.accepted);
    assert_eq!(worker.runtime.count("user:researcher"), 1);
}

#[tokio::test]
async fn test_stop_then_delete_allows_fresh_start() {
    let cluster = cluster();
    let run = started(&cluster).await;
    let worker = cluster.worker(WORKER);

    assert!(matches!(
        cluster.orchestrator.delete_run(&run.team_run_id).await,
        Err(OrchestratorError::RunStillActive(_))
    ));

    let stopped = cluster
        .orchestrator
        .stop_run(&run.team_run_id, Some("done".to_string()))
        .await
        .unwrap();
    assert_eq!(stopped.status, TeamRunStatus::Stopped);
    assert_eq!(cluster.network.sent_count(WORKER, EnvelopeKind::ControlStop), 1);
    assert_eq!(worker.runtime.count("stop"), 1);
    assert_eq!(cluster.host_runtime.count("stop"), 1);
    assert!(!worker.bindings.is_bound(&run.team_run_id));
    assert!(worker.routing.try_resolve(&run.team_run_id).is_none());
    assert!(cluster.host_routing.try_resolve(&run.team_run_id).is_none());

    assert!(cluster.orchestrator.delete_run(&run.team_run_id).await.unwrap());
    assert!(cluster.repository.find_by_id(&run.team_run_id).await.unwrap().is_none());

    let next = cluster
        .orchestrator
        .start_run_if_missing(start_request(members()))
        .await
        .unwrap();
    assert!(next.created);
    assert_ne!(next.record.team_run_id, run.team_run_id);
}

#[tokio::test]
async fn test_worker_requested_stop_stops_whole_run() {
    let cluster = cluster();
    let run = started(&cluster).await;
    let worker = cluster.worker(WORKER);

    let uplink = worker.routing.resolve(&run.team_run_id).unwrap();
    let result = uplink
        .dispatch_control_stop(ControlStopRequest {
            reason: Some("research complete".to_string()),
        })
        .await;
    assert_eq!(result, DispatchResult::accepted());

    let record = cluster.repository.find_by_id(&run.team_run_id).await.unwrap().unwrap();
    assert_eq!(record.status, TeamRunStatus::Stopped);
    assert!(cluster.host_routing.try_resolve(&run.team_run_id).is_none());
    assert!(cluster.repository.list_active().await.unwrap().is_empty());

    assert_eq!(cluster.network.sent_count(HOST, EnvelopeKind::ControlStop), 1);
    assert_eq!(cluster.network.sent_count(WORKER, EnvelopeKind::ControlStop), 1);
    assert_eq!(cluster.host_runtime.count("stop"), 1);
    assert_eq!(worker.runtime.count("stop"), 1);
    assert!(!worker.bindings.is_bound(&run.team_run_id));
}

#[tokio::test]
async fn test_host_rejects_commands_from_nodes_outside_placement() {
    let cluster = cluster();
    let run = started(&cluster).await;

    let envelope = EnvelopeBuilder::new()
        .build_envelope(
            EnvelopeInput::new(
                run.team_run_id.clone(),
                EnvelopeKind::ControlStop,
                RoutedPayload {
                    team_definition_id: "team-a".to_string(),
                    payload: ControlStopRequest::default(),
                },
            ),
            run.run_version,
        )
        .unwrap()
        .to_wire()
        .unwrap();

    let err = cluster
        .network
        .transport(WORKER_2)
        .send_command(HOST, &envelope)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Status { status: 403, ref body } if body == "UNAUTHORIZED_SENDER"));

    let record = cluster.repository.find_by_id(&run.team_run_id).await.unwrap().unwrap();
    assert_eq!(record.status, TeamRunStatus::Running);
    assert_eq!(cluster.host_runtime.count("stop"), 0);
}

#[tokio::test]
async fn test_missing_dependency_blocks_start() {
    let catalog = StaticDependencyCatalog::new().with_available(WORKER, DependencyKind::Skill, "web-search");
    let cluster = cluster_with(catalog, &[WORKER]);

    let mut team = members();
    team[1] = team[1].clone().with_dependency(DependencyKind::Skill, "web-search");
    team[2] = team[2].clone().with_dependency(DependencyKind::Tool, "spellcheck");

    let err = cluster
        .orchestrator
        .start_run_if_missing(start_request(team))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Hydration(_)));
    assert!(cluster.repository.list_active().await.unwrap().is_empty());
    assert!(cluster.worker(WORKER).runtime.calls().is_empty());
}

#[tokio::test]
async fn test_unreachable_worker_marks_run_failed() {
    let cluster = cluster_with(StaticDependencyCatalog::new(), &[]);

    let err = cluster
        .orchestrator
        .start_run_if_missing(start_request(members()))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Bootstrap { ref node_id, .. } if node_id == WORKER));
    assert!(cluster.repository.list_active().await.unwrap().is_empty());
    assert!(cluster.host_routing.is_empty());
    assert!(cluster.host_runtime.calls().is_empty());
}

#[tokio::test]
async fn test_partial_bootstrap_failure_stops_bootstrapped_workers() {
    let cluster = cluster_with(StaticDependencyCatalog::new(), &[WORKER]);
    let worker = cluster.worker(WORKER);
    let mut team = members();
    team.push(TeamMemberSpec::new("analyst", "agent-analyst", "gpt-4o").with_home_node(WORKER_2));

    let err = cluster
        .orchestrator
        .start_run_if_missing(start_request(team))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Bootstrap { ref node_id, .. } if node_id == WORKER_2));

    // worker-1 was bootstrapped before worker-2 failed and must not keep running
    assert_eq!(cluster.network.sent_count(WORKER, EnvelopeKind::ControlStop), 1);
    assert_eq!(worker.runtime.calls(), vec!["start:researcher", "stop"]);
    assert!(worker.bindings.bound_run_ids().is_empty());
    assert!(worker.routing.is_empty());

    assert!(cluster.repository.list_active().await.unwrap().is_empty());
    assert!(cluster.host_routing.is_empty());
    assert!(cluster.host_runtime.calls().is_empty());
}

#[tokio::test]
async fn test_rejects_coordinator_outside_team() {
    let cluster = cluster();
    let mut request = start_request(members());
    request.coordinator_member_name = "nobody".to_string();

    assert!(matches!(
        cluster.orchestrator.start_run_if_missing(request).await,
        Err(OrchestratorError::InvalidRequest(_))
    ));
}

fn bootstrap_envelope(run_version: u64, host_node_id: &str) -> WireEnvelope {
    let payload = RunBootstrapPayload {
        team_definition_id: "team-a".to_string(),
        host_node_id: host_node_id.to_string(),
        coordinator_member_name: "lead".to_string(),
        members: vec![MemberRuntimeConfig::from(&members()[1])],
    };
    EnvelopeBuilder::new()
        .build_envelope(
            EnvelopeInput::new("run-7", EnvelopeKind::RunBootstrap, payload),
            RunVersion::new(run_version),
        )
        .unwrap()
        .to_wire()
        .unwrap()
}

#[tokio::test]
async fn test_worker_bootstrap_is_versioned() {
    let network = Arc::new(LoopbackNetwork::default());
    let runtime = Arc::new(RecordingRuntime::default());
    let bindings = Arc::new(RunScopedTeamBindingRegistry::new());
    let executor = WorkerCommandExecutor::new(
        WORKER,
        bindings.clone(),
        Arc::new(TeamRoutingPortAdapterRegistry::new()),
        runtime.clone(),
        network.bridge(WORKER),
    );

    executor.execute(HOST, &bootstrap_envelope(3, HOST)).await.unwrap();
    executor.execute(HOST, &bootstrap_envelope(3, HOST)).await.unwrap();
    assert_eq!(runtime.count("start"), 1);

    let stale = executor.execute(HOST, &bootstrap_envelope(2, HOST)).await.unwrap_err();
    assert!(matches!(stale, CommandError::Fencing(FencingError::StaleRunVersion { .. })));
    assert_eq!(bindings.resolve_run("run-7").unwrap().run_version, RunVersion::new(3));

    let mut stop = EnvelopeBuilder::new()
        .build_envelope(
            EnvelopeInput::new(
                "run-7",
                EnvelopeKind::ControlStop,
                json!({"teamDefinitionId": "team-a", "payload": ControlStopRequest::default()}),
            ),
            RunVersion::new(2),
        )
        .unwrap();
    assert!(matches!(
        executor.execute(HOST, &stop).await,
        Err(CommandError::Fencing(FencingError::StaleRunVersion { .. }))
    ));

    stop.run_version = RunVersion::new(3);
    executor.execute(HOST, &stop).await.unwrap();
    assert!(!bindings.is_bound("run-7"));
    assert_eq!(runtime.count("stop"), 1);
}

#[tokio::test]
async fn test_worker_only_obeys_the_run_host() {
    let network = Arc::new(LoopbackNetwork::default());
    let runtime = Arc::new(RecordingRuntime::default());
    let bindings = Arc::new(RunScopedTeamBindingRegistry::new());
    let executor = WorkerCommandExecutor::new(
        WORKER,
        bindings.clone(),
        Arc::new(TeamRoutingPortAdapterRegistry::new()),
        runtime.clone(),
        network.bridge(WORKER),
    );

    // A node cannot bootstrap a run in another node's name
    let spoofed = executor.execute(WORKER_2, &bootstrap_envelope(1, HOST)).await.unwrap_err();
    assert_eq!(spoofed.code(), "UNAUTHORIZED_SENDER");
    assert!(!bindings.is_bound("run-7"));

    executor.execute(HOST, &bootstrap_envelope(1, HOST)).await.unwrap();

    // Nor take over a run bound to another host
    let takeover = executor
        .execute(WORKER_2, &bootstrap_envelope(2, WORKER_2))
        .await
        .unwrap_err();
    assert!(matches!(takeover, CommandError::UnauthorizedSender { .. }));
    assert_eq!(bindings.resolve_run("run-7").unwrap().run_version, RunVersion::new(1));

    let stop = EnvelopeBuilder::new()
        .build_envelope(
            EnvelopeInput::new(
                "run-7",
                EnvelopeKind::ControlStop,
                json!({"teamDefinitionId": "team-a", "payload": ControlStopRequest::default()}),
            ),
            RunVersion::new(1),
        )
        .unwrap();
    assert!(matches!(
        executor.execute(WORKER_2, &stop).await,
        Err(CommandError::UnauthorizedSender { .. })
    ));
    assert!(bindings.is_bound("run-7"));
    assert_eq!(runtime.count("stop"), 0);

    executor.execute(HOST, &stop).await.unwrap();
    assert!(!bindings.is_bound("run-7"));
}
