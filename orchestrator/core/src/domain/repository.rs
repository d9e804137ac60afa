// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Team Run Repository Interface
//!
//! Persistence contract for the [`TeamRunRecord`] aggregate, following the
//! DDD Repository pattern: interface in the domain layer, implementations in
//! `crate::infrastructure::repositories`.
//!
//! | Implementation | Backing store |
//! |----------------|---------------|
//! | `InMemoryTeamRunRepository` | process memory (development, tests, single host) |
//!
//! Durable stores plug in behind the same trait; the coordination layer only
//! ever talks to `Arc<dyn TeamRunRepository>`.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::envelope::RunVersion;
use crate::domain::fencing::RunVersionResolver;
use crate::domain::team_run::{NewTeamRun, TeamRunRecord, TeamRunStatus};

/// Single source of truth for team run records.
#[async_trait]
pub trait TeamRunRepository: Send + Sync {
    /// Create a run with [`RunVersion::INITIAL`] and status `Starting`.
    ///
    /// Fails with [`RepositoryError::ActiveRunExists`] if the definition
    /// already has an active run. The check and the insert are atomic.
    async fn create_run(&self, new_run: NewTeamRun) -> Result<TeamRunRecord, RepositoryError>;

    async fn find_by_id(&self, team_run_id: &str) -> Result<Option<TeamRunRecord>, RepositoryError>;

    async fn find_active_by_definition(
        &self,
        team_definition_id: &str,
    ) -> Result<Option<TeamRunRecord>, RepositoryError>;

    async fn list_active(&self) -> Result<Vec<TeamRunRecord>, RepositoryError>;

    /// Bump the run version and return the new value.
    async fn allocate_run_version(&self, team_run_id: &str) -> Result<RunVersion, RepositoryError>;

    async fn resolve_run_version(&self, team_run_id: &str) -> Result<Option<RunVersion>, RepositoryError>;

    async fn update_status(
        &self,
        team_run_id: &str,
        status: TeamRunStatus,
    ) -> Result<TeamRunRecord, RepositoryError>;

    /// Returns whether a record was removed.
    async fn delete(&self, team_run_id: &str) -> Result<bool, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Team run not found: {0}")]
    NotFound(String),

    #[error("Team definition '{team_definition_id}' already has active run '{team_run_id}'")]
    ActiveRunExists {
        team_definition_id: String,
        team_run_id: String,
    },

    #[error("Team run id already in use: {0}")]
    DuplicateRunId(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

/// Exposes a repository as the fencing policy's source of truth.
pub struct RepositoryRunVersionResolver {
    repository: Arc<dyn TeamRunRepository>,
}

impl RepositoryRunVersionResolver {
    pub fn new(repository: Arc<dyn TeamRunRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl RunVersionResolver for RepositoryRunVersionResolver {
    async fn resolve_current_run_version(&self, team_run_id: &str) -> Option<RunVersion> {
        match self.repository.resolve_run_version(team_run_id).await {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(team_run_id = %team_run_id, error = %e, "Run version lookup failed");
                None
            }
        }
    }
}
