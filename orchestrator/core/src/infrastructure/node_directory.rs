// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Node Directory
//!
//! Maps logical node ids to reachable base URLs and derives the fixed internal
//! endpoint paths. Every component that talks to a remote node resolves the
//! target here.
//!
//! The directory is seeded from configuration and mutated at runtime by the
//! discovery bridge through [`NodeDirectoryService::upsert`] and
//! [`NodeDirectoryService::prune`]. Protected ids survive pruning.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::domain::node::{NodeDirectoryEntry, NodeSnapshot};
use crate::domain::node_config::DistributedNodeConfigManifest;

pub const COMMAND_PATH: &str = "/internal/distributed/v1/commands";
pub const EVENT_PATH: &str = "/internal/distributed/v1/events";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeDirectoryError {
    #[error("Unknown node directory entry: {0}")]
    UnknownNodeDirectoryEntry(String),

    #[error("Invalid base URL '{base_url}' for node '{node_id}': {reason}")]
    InvalidBaseUrl {
        node_id: String,
        base_url: String,
        reason: String,
    },
}

#[derive(Debug, Default)]
pub struct NodeDirectoryService {
    entries: RwLock<BTreeMap<String, NodeDirectoryEntry>>,
    protected_node_ids: HashSet<String>,
}

impl NodeDirectoryService {
    pub fn new(entries: Vec<NodeDirectoryEntry>) -> Self {
        Self::with_protected(entries, HashSet::new())
    }

    pub fn with_protected(entries: Vec<NodeDirectoryEntry>, protected_node_ids: HashSet<String>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.node_id.clone(), entry))
            .collect();
        Self {
            entries: RwLock::new(entries),
            protected_node_ids,
        }
    }

    /// This node and its configured peers; this node is always protected.
    pub fn from_config(config: &DistributedNodeConfigManifest) -> Self {
        let mut protected: HashSet<String> = config.spec.protected_node_ids.iter().cloned().collect();
        protected.insert(config.spec.node.id.clone());
        Self::with_protected(config.directory_entries(), protected)
    }

    pub fn resolve_distributed_command_url(&self, node_id: &str) -> Result<String, NodeDirectoryError> {
        self.resolve_url(node_id, COMMAND_PATH)
    }

    pub fn resolve_distributed_event_url(&self, node_id: &str) -> Result<String, NodeDirectoryError> {
        self.resolve_url(node_id, EVENT_PATH)
    }

    fn resolve_url(&self, node_id: &str, suffix: &str) -> Result<String, NodeDirectoryError> {
        let entries = self.entries.read();
        let entry = entries
            .get(node_id)
            .ok_or_else(|| NodeDirectoryError::UnknownNodeDirectoryEntry(node_id.to_string()))?;
        Ok(format!("{}{}", entry.base_url.trim_end_matches('/'), suffix))
    }

    pub fn get(&self, node_id: &str) -> Option<NodeDirectoryEntry> {
        self.entries.read().get(node_id).cloned()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.entries.read().contains_key(node_id)
    }

    pub fn entries(&self) -> Vec<NodeDirectoryEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Placement candidates for every known node.
    pub fn snapshots(&self) -> Vec<NodeSnapshot> {
        self.entries.read().values().map(NodeDirectoryEntry::snapshot).collect()
    }

    pub fn is_protected(&self, node_id: &str) -> bool {
        self.protected_node_ids.contains(node_id)
    }

    /// Announce or refresh a peer.
    pub fn upsert(&self, entry: NodeDirectoryEntry) -> Result<(), NodeDirectoryError> {
        url::Url::parse(&entry.base_url).map_err(|e| NodeDirectoryError::InvalidBaseUrl {
            node_id: entry.node_id.clone(),
            base_url: entry.base_url.clone(),
            reason: e.to_string(),
        })?;

        let previous = self.entries.write().insert(entry.node_id.clone(), entry.clone());
        if previous.is_none() {
            info!(node_id = %entry.node_id, base_url = %entry.base_url, "Node joined directory");
        } else {
            debug!(node_id = %entry.node_id, healthy = entry.is_healthy, "Node directory entry refreshed");
        }
        Ok(())
    }

    /// Remove every unprotected node not in `retain`. Returns the pruned ids.
    pub fn prune(&self, retain: &HashSet<String>) -> Vec<String> {
        let mut entries = self.entries.write();
        let pruned: Vec<String> = entries
            .keys()
            .filter(|id| !retain.contains(*id) && !self.protected_node_ids.contains(*id))
            .cloned()
            .collect();

        for node_id in &pruned {
            entries.remove(node_id);
            info!(node_id = %node_id, "Node pruned from directory");
        }
        pruned
    }

    pub fn set_health(&self, node_id: &str, is_healthy: bool) -> Result<(), NodeDirectoryError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(node_id)
            .ok_or_else(|| NodeDirectoryError::UnknownNodeDirectoryEntry(node_id.to_string()))?;
        entry.is_healthy = is_healthy;
        Ok(())
    }
}
