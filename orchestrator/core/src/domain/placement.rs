// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Member Placement
//!
//! Decides which node executes each team member.
//!
//! 1. A member with a `home_node_id` goes to that node, which must be known
//!    and healthy ([`PlacementConstraintPolicy`]).
//! 2. Otherwise [`DefaultPlacementPolicy`] filters candidates by health and
//!    agent-execution capability, prefers the caller's default node, and
//!    falls back to a stable hash of the member name.
//!
//! Hashing runs over candidates sorted by node id, so the same topology
//! always yields the same placement regardless of snapshot order. A host that
//! restarts can re-derive placement for a resumed run.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::domain::node::NodeSnapshot;
use crate::domain::team_run::{MemberPlacement, Placement, PlacementSource, TeamMemberSpec};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("no eligible node can execute member '{member_name}'")]
    NoPlacementCandidate { member_name: String },

    #[error("member '{member_name}' declares unknown home node '{home_node_id}'")]
    UnknownHomeNode {
        member_name: String,
        home_node_id: String,
    },

    #[error("home node '{home_node_id}' of member '{member_name}' is not healthy")]
    HomeNodeUnavailable {
        member_name: String,
        home_node_id: String,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPlacementPolicy;

impl DefaultPlacementPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn assign_by_capability_and_health(
        &self,
        member_name: &str,
        candidates: &[NodeSnapshot],
        default_node_id: Option<&str>,
    ) -> Result<MemberPlacement, PlacementError> {
        let mut eligible: Vec<&str> = candidates
            .iter()
            .filter(|c| c.is_eligible())
            .map(|c| c.node_id.as_str())
            .collect();
        eligible.sort_unstable();
        eligible.dedup();

        if eligible.is_empty() {
            return Err(PlacementError::NoPlacementCandidate {
                member_name: member_name.to_string(),
            });
        }

        if let Some(default_node_id) = default_node_id {
            if eligible.contains(&default_node_id) {
                return Ok(MemberPlacement {
                    node_id: default_node_id.to_string(),
                    source: PlacementSource::Default,
                });
            }
        }

        let index = (stable_hash(member_name) % eligible.len() as u64) as usize;
        Ok(MemberPlacement {
            node_id: eligible[index].to_string(),
            source: PlacementSource::Hashed,
        })
    }
}

/// First eight bytes of SHA-256, big endian. Stable across processes and builds.
fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlacementConstraintPolicy;

impl PlacementConstraintPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Members without a declared home node are always accepted.
    pub fn validate_home_node_ownership(
        &self,
        member: &TeamMemberSpec,
        known_node_ids: &HashSet<String>,
        healthy_node_ids: &HashSet<String>,
    ) -> Result<(), PlacementError> {
        let Some(home_node_id) = member.home_node_id.as_deref() else {
            return Ok(());
        };

        if !known_node_ids.contains(home_node_id) {
            return Err(PlacementError::UnknownHomeNode {
                member_name: member.member_name.clone(),
                home_node_id: home_node_id.to_string(),
            });
        }

        if !healthy_node_ids.contains(home_node_id) {
            return Err(PlacementError::HomeNodeUnavailable {
                member_name: member.member_name.clone(),
                home_node_id: home_node_id.to_string(),
            });
        }

        Ok(())
    }
}

/// Combines both policies into a full placement for a team.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlacementPlanner {
    default_policy: DefaultPlacementPolicy,
    constraint_policy: PlacementConstraintPolicy,
}

impl PlacementPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(
        &self,
        members: &[TeamMemberSpec],
        candidates: &[NodeSnapshot],
        default_node_id: Option<&str>,
    ) -> Result<Placement, PlacementError> {
        let known: HashSet<String> = candidates.iter().map(|c| c.node_id.clone()).collect();
        let healthy: HashSet<String> = candidates
            .iter()
            .filter(|c| c.is_eligible())
            .map(|c| c.node_id.clone())
            .collect();

        let mut placement = Placement::new();
        for member in members {
            self.constraint_policy
                .validate_home_node_ownership(member, &known, &healthy)?;

            let assigned = match &member.home_node_id {
                Some(home) => MemberPlacement {
                    node_id: home.clone(),
                    source: PlacementSource::Home,
                },
                None => self.default_policy.assign_by_capability_and_health(
                    &member.member_name,
                    candidates,
                    default_node_id,
                )?,
            };
            placement.assign(member.member_name.clone(), assigned);
        }

        Ok(placement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> Vec<NodeSnapshot> {
        vec![
            NodeSnapshot::new("node-c"),
            NodeSnapshot::new("node-a").healthy(true).agent_execution(true),
            NodeSnapshot::new("node-b"),
            NodeSnapshot::new("node-down").healthy(false),
            NodeSnapshot::new("node-gateway").agent_execution(false),
        ]
    }

    #[test]
    fn test_hash_placement_is_deterministic_and_order_independent() {
        let policy = DefaultPlacementPolicy::new();
        let first = policy.assign_by_capability_and_health("researcher", &nodes(), None).unwrap();
        let second = policy.assign_by_capability_and_health("researcher", &nodes(), None).unwrap();

        let mut reversed = nodes();
        reversed.reverse();
        let third = policy.assign_by_capability_and_health("researcher", &reversed, None).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, third);
        assert_eq!(first.source, PlacementSource::Hashed);
        assert!(["node-a", "node-b", "node-c"].contains(&first.node_id.as_str()));
    }

    #[test]
    fn test_default_node_wins_when_eligible() {
        let policy = DefaultPlacementPolicy::new();
        let placed = policy.assign_by_capability_and_health("writer", &nodes(), Some("node-b")).unwrap();
        assert_eq!(placed.node_id, "node-b");
        assert_eq!(placed.source, PlacementSource::Default);

        let fallback = policy.assign_by_capability_and_health("writer", &nodes(), Some("node-down")).unwrap();
        assert_eq!(fallback.source, PlacementSource::Hashed);
        assert_ne!(fallback.node_id, "node-down");
    }

    #[test]
    fn test_no_eligible_candidates() {
        let policy = DefaultPlacementPolicy::new();
        let candidates = vec![
            NodeSnapshot::new("down").healthy(false),
            NodeSnapshot::new("gateway").agent_execution(false),
        ];
        assert_eq!(
            policy.assign_by_capability_and_health("writer", &candidates, None),
            Err(PlacementError::NoPlacementCandidate { member_name: "writer".into() })
        );
    }

    #[test]
    fn test_home_node_constraints() {
        let policy = PlacementConstraintPolicy::new();
        let known: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let healthy: HashSet<String> = ["a"].iter().map(|s| s.to_string()).collect();

        let free = TeamMemberSpec::new("m", "agent", "model");
        assert!(policy.validate_home_node_ownership(&free, &known, &healthy).is_ok());

        let pinned = free.clone().with_home_node("a");
        assert!(policy.validate_home_node_ownership(&pinned, &known, &healthy).is_ok());

        let unknown = free.clone().with_home_node("z");
        assert!(matches!(
            policy.validate_home_node_ownership(&unknown, &known, &healthy),
            Err(PlacementError::UnknownHomeNode { .. })
        ));

        let unhealthy = free.with_home_node("b");
        assert!(matches!(
            policy.validate_home_node_ownership(&unhealthy, &known, &healthy),
            Err(PlacementError::HomeNodeUnavailable { .. })
        ));
    }

    #[test]
    fn test_planner_mixes_sources() {
        let members = vec![
            TeamMemberSpec::new("coordinator", "agent-1", "model"),
            TeamMemberSpec::new("coder", "agent-2", "model").with_home_node("node-c"),
        ];

        let placement = PlacementPlanner::new().plan(&members, &nodes(), Some("node-a")).unwrap();
        assert_eq!(placement.get("coordinator").unwrap().source, PlacementSource::Default);
        assert_eq!(placement.get("coder").unwrap(), &MemberPlacement {
            node_id: "node-c".into(),
            source: PlacementSource::Home,
        });
    }

    #[test]
    fn test_planner_rejects_unavailable_home() {
        let members = vec![TeamMemberSpec::new("coder", "agent-2", "model").with_home_node("node-down")];
        assert!(matches!(
            PlacementPlanner::new().plan(&members, &nodes(), None),
            Err(PlacementError::HomeNodeUnavailable { .. })
        ));
    }
}
