// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Run-Version Fencing
//!
//! Rejects or drops messages that reference a run version other than the
//! current one. Command paths call [`RunVersionFencingPolicy::assert_current_run_version`]
//! and fail loudly; event ingestion calls [`RunVersionFencingPolicy::drop_if_stale`]
//! and silently ignores stale traffic.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::envelope::RunVersion;

/// Looks up the authoritative run version for a team run.
#[async_trait]
pub trait RunVersionResolver: Send + Sync {
    async fn resolve_current_run_version(&self, team_run_id: &str) -> Option<RunVersion>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FencingError {
    #[error("no current run version for team run '{team_run_id}'")]
    MissingRunVersion { team_run_id: String },

    #[error("stale run version {received} for team run '{team_run_id}' (current {current})")]
    StaleRunVersion {
        team_run_id: String,
        received: RunVersion,
        current: RunVersion,
    },
}

#[derive(Clone)]
pub struct RunVersionFencingPolicy {
    resolver: Arc<dyn RunVersionResolver>,
}

impl RunVersionFencingPolicy {
    pub fn new(resolver: Arc<dyn RunVersionResolver>) -> Self {
        Self { resolver }
    }

    pub async fn assert_current_run_version(
        &self,
        team_run_id: &str,
        run_version: RunVersion,
    ) -> Result<(), FencingError> {
        let current = self
            .resolver
            .resolve_current_run_version(team_run_id)
            .await
            .ok_or_else(|| FencingError::MissingRunVersion {
                team_run_id: team_run_id.to_string(),
            })?;

        if current != run_version {
            warn!(
                team_run_id = %team_run_id,
                received = %run_version,
                current = %current,
                "Rejecting message with stale run version"
            );
            return Err(FencingError::StaleRunVersion {
                team_run_id: team_run_id.to_string(),
                received: run_version,
                current,
            });
        }

        Ok(())
    }

    /// `true` means the message must be dropped. A run without a resolvable
    /// version is treated as stale.
    pub async fn drop_if_stale(&self, team_run_id: &str, run_version: RunVersion) -> bool {
        match self.resolver.resolve_current_run_version(team_run_id).await {
            Some(current) if current == run_version => false,
            Some(current) => {
                debug!(team_run_id = %team_run_id, received = %run_version, current = %current, "Dropping stale message");
                true
            }
            None => {
                debug!(team_run_id = %team_run_id, received = %run_version, "Dropping message for unknown run");
                true
            }
        }
    }
}
