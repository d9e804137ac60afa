// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! One routing adapter per active team run, plus the run version it was
//! registered for. Doubles as a [`RunVersionResolver`] for fencing.

use aegis_team_core::domain::envelope::RunVersion;
use aegis_team_core::domain::fencing::RunVersionResolver;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::routing::TeamRoutingPort;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingRegistryError {
    #[error("No routing adapter registered for team run '{team_run_id}'")]
    MissingRoutingAdapter { team_run_id: String },
}

#[derive(Clone)]
struct RegisteredAdapter {
    adapter: Arc<dyn TeamRoutingPort>,
    run_version: RunVersion,
}

#[derive(Default)]
pub struct TeamRoutingPortAdapterRegistry {
    adapters: RwLock<HashMap<String, RegisteredAdapter>>,
}

impl TeamRoutingPortAdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any adapter registered for the run.
    pub fn register(&self, team_run_id: impl Into<String>, run_version: RunVersion, adapter: Arc<dyn TeamRoutingPort>) {
        let team_run_id = team_run_id.into();
        debug!(team_run_id = %team_run_id, run_version = %run_version, "Registered routing adapter");
        self.adapters
            .write()
            .insert(team_run_id, RegisteredAdapter { adapter, run_version });
    }

    pub fn resolve(&self, team_run_id: &str) -> Result<Arc<dyn TeamRoutingPort>, RoutingRegistryError> {
        self.try_resolve(team_run_id)
            .ok_or_else(|| RoutingRegistryError::MissingRoutingAdapter {
                team_run_id: team_run_id.to_string(),
            })
    }

    pub fn try_resolve(&self, team_run_id: &str) -> Option<Arc<dyn TeamRoutingPort>> {
        self.adapters.read().get(team_run_id).map(|r| r.adapter.clone())
    }

    pub fn resolve_run_version(&self, team_run_id: &str) -> Result<RunVersion, RoutingRegistryError> {
        self.adapters
            .read()
            .get(team_run_id)
            .map(|r| r.run_version)
            .ok_or_else(|| RoutingRegistryError::MissingRoutingAdapter {
                team_run_id: team_run_id.to_string(),
            })
    }

    pub fn unregister(&self, team_run_id: &str) -> bool {
        self.adapters.write().remove(team_run_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }
}

#[async_trait]
impl RunVersionResolver for TeamRoutingPortAdapterRegistry {
    async fn resolve_current_run_version(&self, team_run_id: &str) -> Option<RunVersion> {
        self.resolve_run_version(team_run_id).ok()
    }
}
