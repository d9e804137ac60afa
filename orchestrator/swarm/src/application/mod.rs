// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application services for distributed team runs.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Registries, routing adapters, bridge command executors and
//!   the host-side run orchestrator

pub mod binding_registry;
pub mod command_executor;
pub mod host_routing;
pub mod orchestrator;
pub mod routing_registry;
pub mod worker_uplink;

pub use binding_registry::RunScopedTeamBindingRegistry;
pub use command_executor::{HostCommandExecutor, TeamRunStopper, WorkerCommandExecutor};
pub use host_routing::{HostDistributedRoutingAdapter, HostRunContext};
pub use orchestrator::{
    OrchestratorDependencies, OrchestratorError, StartTeamRunRequest, StartedTeamRun, TeamRunOrchestrator,
};
pub use routing_registry::{RoutingRegistryError, TeamRoutingPortAdapterRegistry};
pub use worker_uplink::{BridgeHostForwarder, HostForwarder, WorkerUplinkRoutingAdapter};
