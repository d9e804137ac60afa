// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Guards tool-approval decisions against stale invocation versions.
//!
//! Access is not serialized; a late decision simply fails validation. Keys are
//! `(team_run_id, tool_invocation_id)` so equal invocation ids in different
//! runs never interfere.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolApprovalError {
    #[error("no pending invocation '{tool_invocation_id}' in team run '{team_run_id}'")]
    MissingInvocationVersion {
        team_run_id: String,
        tool_invocation_id: String,
    },

    #[error("stale version {received} for invocation '{tool_invocation_id}' in team run '{team_run_id}' (expected {expected})")]
    StaleInvocationVersion {
        team_run_id: String,
        tool_invocation_id: String,
        received: u64,
        expected: u64,
    },
}

impl ToolApprovalError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingInvocationVersion { .. } => "MISSING_INVOCATION_VERSION",
            Self::StaleInvocationVersion { .. } => "STALE_INVOCATION_VERSION",
        }
    }
}

type InvocationKey = (String, String);

#[derive(Debug, Default)]
pub struct ToolApprovalConcurrencyPolicy {
    pending: Mutex<HashMap<InvocationKey, u64>>,
}

impl ToolApprovalConcurrencyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-registering an invocation replaces the expected version.
    pub fn register_pending_invocation(&self, team_run_id: &str, tool_invocation_id: &str, expected_version: u64) {
        debug!(
            team_run_id = %team_run_id,
            tool_invocation_id = %tool_invocation_id,
            expected_version,
            "Registered pending tool invocation"
        );
        self.pending
            .lock()
            .insert((team_run_id.to_string(), tool_invocation_id.to_string()), expected_version);
    }

    pub fn validate_invocation_version(
        &self,
        team_run_id: &str,
        tool_invocation_id: &str,
        version: u64,
    ) -> Result<(), ToolApprovalError> {
        let pending = self.pending.lock();
        let key = (team_run_id.to_string(), tool_invocation_id.to_string());
        match pending.get(&key) {
            None => Err(ToolApprovalError::MissingInvocationVersion {
                team_run_id: team_run_id.to_string(),
                tool_invocation_id: tool_invocation_id.to_string(),
            }),
            Some(&expected) if expected != version => Err(ToolApprovalError::StaleInvocationVersion {
                team_run_id: team_run_id.to_string(),
                tool_invocation_id: tool_invocation_id.to_string(),
                received: version,
                expected,
            }),
            Some(_) => Ok(()),
        }
    }

    pub fn complete_invocation(&self, team_run_id: &str, tool_invocation_id: &str) {
        self.pending
            .lock()
            .remove(&(team_run_id.to_string(), tool_invocation_id.to_string()));
    }

    /// Drops every pending invocation of a run (run stopped or deleted).
    pub fn clear_run(&self, team_run_id: &str) {
        self.pending.lock().retain(|(run, _), _| run != team_run_id);
    }
}
