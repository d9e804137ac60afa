// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod dependency_hydration;
pub mod event_aggregator;
pub mod event_ingress;
pub mod retry;

// Re-export services for convenience
pub use dependency_hydration::{DependencyHydrationService, DependencyProvisioner, HydrationError, StaticDependencyCatalog};
pub use event_aggregator::TeamEventAggregator;
pub use event_ingress::{IngestOutcome, RemoteEventIngress};
pub use retry::CommandRetryPolicy;
