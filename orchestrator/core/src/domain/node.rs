// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Node identity as seen by the coordination layer.
//!
//! Health and capability flags are reported by the discovery bridge; the core
//! never health-checks nodes itself.

use serde::{Deserialize, Serialize};

/// Entry in the node directory: where a node lives and what it can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDirectoryEntry {
    pub node_id: String,
    pub base_url: String,
    #[serde(default = "default_true")]
    pub is_healthy: bool,
    #[serde(default = "default_true")]
    pub supports_agent_execution: bool,
}

impl NodeDirectoryEntry {
    pub fn new(node_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            base_url: base_url.into(),
            is_healthy: true,
            supports_agent_execution: true,
        }
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            node_id: self.node_id.clone(),
            is_healthy: Some(self.is_healthy),
            supports_agent_execution: Some(self.supports_agent_execution),
        }
    }
}

/// Placement input. Missing flags count as "yes": only an explicit `false`
/// excludes a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_healthy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_agent_execution: Option<bool>,
}

impl NodeSnapshot {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            is_healthy: None,
            supports_agent_execution: None,
        }
    }

    pub fn healthy(mut self, is_healthy: bool) -> Self {
        self.is_healthy = Some(is_healthy);
        self
    }

    pub fn agent_execution(mut self, supported: bool) -> Self {
        self.supports_agent_execution = Some(supported);
        self
    }

    pub fn is_eligible(&self) -> bool {
        self.is_healthy != Some(false) && self.supports_agent_execution != Some(false)
    }
}

fn default_true() -> bool {
    true
}
