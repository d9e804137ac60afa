// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Run-scoped team binding registry.
//!
//! Reads hand out clones, so a caller mutating a returned binding never
//! changes what the registry holds.

use aegis_team_core::domain::envelope::RunVersion;
use aegis_team_core::domain::fencing::RunVersionResolver;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

use crate::domain::binding::RunScopedTeamBinding;

#[derive(Debug, Default)]
pub struct RunScopedTeamBindingRegistry {
    bindings: RwLock<HashMap<String, RunScopedTeamBinding>>,
}

impl RunScopedTeamBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the binding this one replaced, if any.
    pub fn bind_run(&self, binding: RunScopedTeamBinding) -> Option<RunScopedTeamBinding> {
        info!(
            team_run_id = %binding.team_run_id,
            run_version = %binding.run_version,
            runtime_team_id = %binding.runtime_team_id,
            members = binding.member_configs.len(),
            "Bound team run"
        );
        self.bindings.write().insert(binding.team_run_id.clone(), binding)
    }

    pub fn resolve_run(&self, team_run_id: &str) -> Option<RunScopedTeamBinding> {
        self.bindings.read().get(team_run_id).cloned()
    }

    pub fn unbind_run(&self, team_run_id: &str) -> Option<RunScopedTeamBinding> {
        let removed = self.bindings.write().remove(team_run_id);
        if removed.is_some() {
            info!(team_run_id = %team_run_id, "Unbound team run");
        }
        removed
    }

    pub fn is_bound(&self, team_run_id: &str) -> bool {
        self.bindings.read().contains_key(team_run_id)
    }

    pub fn bound_run_ids(&self) -> Vec<String> {
        self.bindings.read().keys().cloned().collect()
    }
}

#[async_trait]
impl RunVersionResolver for RunScopedTeamBindingRegistry {
    async fn resolve_current_run_version(&self, team_run_id: &str) -> Option<RunVersion> {
        self.bindings.read().get(team_run_id).map(|b| b.run_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::binding::MemberRuntimeConfig;

    fn binding() -> RunScopedTeamBinding {
        RunScopedTeamBinding {
            team_run_id: "run-1".to_string(),
            run_version: RunVersion::new(2),
            team_definition_id: "team-a".to_string(),
            host_node_id: "host".to_string(),
            runtime_team_id: "rt-1".to_string(),
            member_configs: vec![MemberRuntimeConfig {
                member_name: "researcher".to_string(),
                agent_definition_id: "agent-res".to_string(),
                llm_model_identifier: "gpt-4o".to_string(),
                auto_execute_tools: false,
                workspace_id: None,
                llm_config: None,
            }],
        }
    }

    #[test]
    fn test_resolved_copy_is_isolated() {
        let registry = RunScopedTeamBindingRegistry::new();
        registry.bind_run(binding());

        let mut copy = registry.resolve_run("run-1").unwrap();
        copy.member_configs[0].auto_execute_tools = true;
        copy.member_configs.push(copy.member_configs[0].clone());
        copy.runtime_team_id = "hijacked".to_string();

        assert_eq!(registry.resolve_run("run-1").unwrap(), binding());
    }

    #[test]
    fn test_bind_unbind_and_version() {
        let registry = RunScopedTeamBindingRegistry::new();
        assert!(registry.bind_run(binding()).is_none());
        assert_eq!(
            tokio_test::block_on(registry.resolve_current_run_version("run-1")),
            Some(RunVersion::new(2))
        );
        assert!(registry.resolve_run("run-1").unwrap().hosts_member("researcher"));

        assert!(registry.unbind_run("run-1").is_some());
        assert!(!registry.is_bound("run-1"));
        assert_eq!(tokio_test::block_on(registry.resolve_current_run_version("run-1")), None);
    }
}
