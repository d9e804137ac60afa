// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Team Run Aggregate
//!
//! A team run is one live execution of a team definition, spread over a host
//! node and zero or more worker nodes.
//!
//! ## Invariants
//!
//! - At most one *active* run (`Starting` or `Running`) exists per
//!   `team_definition_id`. The repository enforces this on `create_run`.
//! - `placement` is computed once at run start and never mutated; re-placing
//!   members requires a new run version.
//! - `run_version` only grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::envelope::RunVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRunStatus {
    Starting,
    Running,
    Stopped,
    Failed,
}

impl TeamRunStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for TeamRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a member landed on its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementSource {
    Home,
    Default,
    Hashed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPlacement {
    pub node_id: String,
    pub source: PlacementSource,
}

/// Member name → node assignment for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Placement(BTreeMap<String, MemberPlacement>);

impl Placement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, member_name: impl Into<String>, placement: MemberPlacement) {
        self.0.insert(member_name.into(), placement);
    }

    pub fn get(&self, member_name: &str) -> Option<&MemberPlacement> {
        self.0.get(member_name)
    }

    pub fn node_for(&self, member_name: &str) -> Option<&str> {
        self.0.get(member_name).map(|p| p.node_id.as_str())
    }

    pub fn members_on(&self, node_id: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, p)| p.node_id == node_id)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn nodes(&self) -> BTreeSet<String> {
        self.0.values().map(|p| p.node_id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MemberPlacement)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Skill,
    Workspace,
    Tool,
}

/// A node-local artifact a member needs before the run may start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberDependency {
    pub kind: DependencyKind,
    pub reference: String,
}

/// Team member as declared by the team definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMemberSpec {
    pub member_name: String,
    pub agent_definition_id: String,
    pub llm_model_identifier: String,
    #[serde(default)]
    pub auto_execute_tools: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_config: Option<Value>,
    /// Pins the member to one node when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_node_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<MemberDependency>,
}

impl TeamMemberSpec {
    pub fn new(
        member_name: impl Into<String>,
        agent_definition_id: impl Into<String>,
        llm_model_identifier: impl Into<String>,
    ) -> Self {
        Self {
            member_name: member_name.into(),
            agent_definition_id: agent_definition_id.into(),
            llm_model_identifier: llm_model_identifier.into(),
            auto_execute_tools: false,
            workspace_id: None,
            llm_config: None,
            home_node_id: None,
            dependencies: vec![],
        }
    }

    pub fn with_home_node(mut self, node_id: impl Into<String>) -> Self {
        self.home_node_id = Some(node_id.into());
        self
    }

    pub fn with_dependency(mut self, kind: DependencyKind, reference: impl Into<String>) -> Self {
        self.dependencies.push(MemberDependency {
            kind,
            reference: reference.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRunRecord {
    pub team_run_id: String,
    pub team_definition_id: String,
    pub coordinator_member_name: String,
    pub run_version: RunVersion,
    pub host_node_id: String,
    pub placement_by_member: Placement,
    pub status: TeamRunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`crate::domain::repository::TeamRunRepository::create_run`].
#[derive(Debug, Clone)]
pub struct NewTeamRun {
    pub team_run_id: String,
    pub team_definition_id: String,
    pub coordinator_member_name: String,
    pub host_node_id: String,
    pub placement_by_member: Placement,
}

impl TeamRunRecord {
    pub fn from_new(new_run: NewTeamRun, now: DateTime<Utc>) -> Self {
        Self {
            team_run_id: new_run.team_run_id,
            team_definition_id: new_run.team_definition_id,
            coordinator_member_name: new_run.coordinator_member_name,
            run_version: RunVersion::INITIAL,
            host_node_id: new_run.host_node_id,
            placement_by_member: new_run.placement_by_member,
            status: TeamRunStatus::Starting,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_groups_members_by_node() {
        let mut placement = Placement::new();
        placement.assign("coordinator", MemberPlacement { node_id: "host".into(), source: PlacementSource::Default });
        placement.assign("researcher", MemberPlacement { node_id: "worker-1".into(), source: PlacementSource::Hashed });
        placement.assign("writer", MemberPlacement { node_id: "worker-1".into(), source: PlacementSource::Home });

        assert_eq!(placement.members_on("worker-1"), vec!["researcher".to_string(), "writer".to_string()]);
        assert_eq!(placement.node_for("coordinator"), Some("host"));
        assert_eq!(placement.nodes().len(), 2);
    }

    #[test]
    fn test_status_activity() {
        assert!(TeamRunStatus::Starting.is_active());
        assert!(TeamRunStatus::Running.is_active());
        assert!(!TeamRunStatus::Stopped.is_active());
        assert!(!TeamRunStatus::Failed.is_active());
    }
}
