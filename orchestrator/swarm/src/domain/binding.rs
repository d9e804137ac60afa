// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Run-Scoped Team Binding
//!
//! Associates a team run with the concrete runtime team instance executing it
//! on this node and with the execution configuration of each member placed
//! here. Bindings are plain owned data: cloning one yields a fully
//! independent copy.

use aegis_team_core::domain::envelope::RunVersion;
use aegis_team_core::domain::team_run::TeamMemberSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRuntimeConfig {
    pub member_name: String,
    pub agent_definition_id: String,
    pub llm_model_identifier: String,
    #[serde(default)]
    pub auto_execute_tools: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_config: Option<Value>,
}

impl From<&TeamMemberSpec> for MemberRuntimeConfig {
    fn from(spec: &TeamMemberSpec) -> Self {
        Self {
            member_name: spec.member_name.clone(),
            agent_definition_id: spec.agent_definition_id.clone(),
            llm_model_identifier: spec.llm_model_identifier.clone(),
            auto_execute_tools: spec.auto_execute_tools,
            workspace_id: spec.workspace_id.clone(),
            llm_config: spec.llm_config.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunScopedTeamBinding {
    pub team_run_id: String,
    pub run_version: RunVersion,
    pub team_definition_id: String,
    /// Node that owns the run; the only node allowed to command this binding.
    pub host_node_id: String,
    pub runtime_team_id: String,
    pub member_configs: Vec<MemberRuntimeConfig>,
}

impl RunScopedTeamBinding {
    pub fn member(&self, member_name: &str) -> Option<&MemberRuntimeConfig> {
        self.member_configs.iter().find(|m| m.member_name == member_name)
    }

    pub fn hosts_member(&self, member_name: &str) -> bool {
        self.member(member_name).is_some()
    }
}

/// Payload of a `RUN_BOOTSTRAP` envelope: everything a worker needs to bind
/// the members placed on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunBootstrapPayload {
    pub team_definition_id: String,
    pub host_node_id: String,
    pub coordinator_member_name: String,
    pub members: Vec<MemberRuntimeConfig>,
}
