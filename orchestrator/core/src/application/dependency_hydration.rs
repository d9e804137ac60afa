// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Dependency Hydration Service
//
// Runs after placement and before the run is allowed to start. Every
// dependency a member declares (skill, workspace, tool) must be present on
// the node the member was placed on. Provisioning itself belongs to the
// node-local artifact manager behind `DependencyProvisioner`; this service
// only fans out the checks and collects every failure so the caller can
// report the full picture in one go.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::team_run::{DependencyKind, MemberDependency, Placement, TeamMemberSpec};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    #[error("{kind:?} '{reference}' is not available on node '{node_id}'")]
    NotAvailable {
        node_id: String,
        kind: DependencyKind,
        reference: String,
    },

    #[error("provisioning failed: {0}")]
    Failed(String),
}

/// Ensures a dependency is usable on a node, preparing it if needed.
#[async_trait]
pub trait DependencyProvisioner: Send + Sync {
    async fn ensure_available(&self, node_id: &str, dependency: &MemberDependency) -> Result<(), ProvisionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationFailure {
    pub member_name: String,
    pub node_id: Option<String>,
    pub reason: String,
}

impl fmt::Display for HydrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node) => write!(f, "{}@{}: {}", self.member_name, node, self.reason),
            None => write!(f, "{}: {}", self.member_name, self.reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HydrationError {
    #[error("{} member dependencies unavailable: {}", .failures.len(), format_failures(.failures))]
    Unavailable { failures: Vec<HydrationFailure> },
}

fn format_failures(failures: &[HydrationFailure]) -> String {
    failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationReport {
    pub members: usize,
    pub dependencies: usize,
}

pub struct DependencyHydrationService {
    provisioner: Arc<dyn DependencyProvisioner>,
}

impl DependencyHydrationService {
    pub fn new(provisioner: Arc<dyn DependencyProvisioner>) -> Self {
        Self { provisioner }
    }

    pub async fn hydrate(
        &self,
        placement: &Placement,
        members: &[TeamMemberSpec],
    ) -> Result<HydrationReport, HydrationError> {
        let mut failures = Vec::new();
        let mut checks = Vec::new();

        for member in members {
            let Some(node_id) = placement.node_for(&member.member_name) else {
                failures.push(HydrationFailure {
                    member_name: member.member_name.clone(),
                    node_id: None,
                    reason: "member has no placement".to_string(),
                });
                continue;
            };

            for dependency in &member.dependencies {
                let provisioner = self.provisioner.clone();
                let member_name = member.member_name.clone();
                let node_id = node_id.to_string();
                checks.push(async move {
                    provisioner
                        .ensure_available(&node_id, dependency)
                        .await
                        .map_err(|e| HydrationFailure {
                            member_name,
                            node_id: Some(node_id),
                            reason: e.to_string(),
                        })
                });
            }
        }

        let dependencies = checks.len();
        failures.extend(join_all(checks).await.into_iter().filter_map(Result::err));

        if !failures.is_empty() {
            warn!("Dependency hydration failed for {} dependencies", failures.len());
            return Err(HydrationError::Unavailable { failures });
        }

        info!(
            "Hydrated {} dependencies for {} members",
            dependencies,
            members.len()
        );
        Ok(HydrationReport {
            members: members.len(),
            dependencies,
        })
    }
}

/// In-memory provisioner: a dependency is available iff it was registered for
/// the node.
#[derive(Debug, Default)]
pub struct StaticDependencyCatalog {
    available: RwLock<HashMap<String, HashSet<MemberDependency>>>,
}

impl StaticDependencyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_available(self, node_id: impl Into<String>, kind: DependencyKind, reference: impl Into<String>) -> Self {
        self.register(node_id, kind, reference);
        self
    }

    pub fn register(&self, node_id: impl Into<String>, kind: DependencyKind, reference: impl Into<String>) {
        self.available
            .write()
            .entry(node_id.into())
            .or_default()
            .insert(MemberDependency {
                kind,
                reference: reference.into(),
            });
    }
}

#[async_trait]
impl DependencyProvisioner for StaticDependencyCatalog {
    async fn ensure_available(&self, node_id: &str, dependency: &MemberDependency) -> Result<(), ProvisionError> {
        let available = self
            .available
            .read()
            .get(node_id)
            .is_some_and(|deps| deps.contains(dependency));

        if available {
            Ok(())
        } else {
            Err(ProvisionError::NotAvailable {
                node_id: node_id.to_string(),
                kind: dependency.kind,
                reference: dependency.reference.clone(),
            })
        }
    }
}
