// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository contracts defined in the
//! domain layer, following the Repository pattern from DDD.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve team run records
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **InMemoryTeamRunRepository** - Thread-safe map-backed storage for
//!   single-host deployments, development and tests
//!
//! # Design Principles
//!
//! 1. **Technology Agnostic**: Domain layer has no knowledge of persistence
//! 2. **Transactional Consistency**: The single-active-run check and the insert
//!    happen under one lock
//! 3. **Error Mapping**: Every failure is a domain `RepositoryError`

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::envelope::RunVersion;
use crate::domain::repository::{RepositoryError, TeamRunRepository};
use crate::domain::team_run::{NewTeamRun, TeamRunRecord, TeamRunStatus};

#[derive(Debug, Clone, Default)]
pub struct InMemoryTeamRunRepository {
    runs: Arc<RwLock<HashMap<String, TeamRunRecord>>>,
}

impl InMemoryTeamRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate<F>(&self, team_run_id: &str, f: F) -> Result<TeamRunRecord, RepositoryError>
    where
        F: FnOnce(&mut TeamRunRecord),
    {
        let mut runs = self.runs.write();
        let record = runs
            .get_mut(team_run_id)
            .ok_or_else(|| RepositoryError::NotFound(team_run_id.to_string()))?;
        f(record);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

#[async_trait]
impl TeamRunRepository for InMemoryTeamRunRepository {
    async fn create_run(&self, new_run: NewTeamRun) -> Result<TeamRunRecord, RepositoryError> {
        let mut runs = self.runs.write();

        if runs.contains_key(&new_run.team_run_id) {
            return Err(RepositoryError::DuplicateRunId(new_run.team_run_id));
        }
        if let Some(active) = runs
            .values()
            .find(|r| r.team_definition_id == new_run.team_definition_id && r.status.is_active())
        {
            return Err(RepositoryError::ActiveRunExists {
                team_definition_id: new_run.team_definition_id,
                team_run_id: active.team_run_id.clone(),
            });
        }

        let record = TeamRunRecord::from_new(new_run, Utc::now());
        runs.insert(record.team_run_id.clone(), record.clone());
        info!(
            team_run_id = %record.team_run_id,
            team_definition_id = %record.team_definition_id,
            "Team run created"
        );
        Ok(record)
    }

    async fn find_by_id(&self, team_run_id: &str) -> Result<Option<TeamRunRecord>, RepositoryError> {
        Ok(self.runs.read().get(team_run_id).cloned())
    }

    async fn find_active_by_definition(
        &self,
        team_definition_id: &str,
    ) -> Result<Option<TeamRunRecord>, RepositoryError> {
        Ok(self
            .runs
            .read()
            .values()
            .find(|r| r.team_definition_id == team_definition_id && r.status.is_active())
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<TeamRunRecord>, RepositoryError> {
        let mut active: Vec<TeamRunRecord> = self
            .runs
            .read()
            .values()
            .filter(|r| r.status.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn allocate_run_version(&self, team_run_id: &str) -> Result<RunVersion, RepositoryError> {
        let record = self.mutate(team_run_id, |r| r.run_version = r.run_version.next())?;
        debug!(team_run_id = %team_run_id, run_version = %record.run_version, "Allocated run version");
        Ok(record.run_version)
    }

    async fn resolve_run_version(&self, team_run_id: &str) -> Result<Option<RunVersion>, RepositoryError> {
        Ok(self.runs.read().get(team_run_id).map(|r| r.run_version))
    }

    async fn update_status(
        &self,
        team_run_id: &str,
        status: TeamRunStatus,
    ) -> Result<TeamRunRecord, RepositoryError> {
        let mut runs = self.runs.write();
        let team_definition_id = runs
            .get(team_run_id)
            .map(|r| r.team_definition_id.clone())
            .ok_or_else(|| RepositoryError::NotFound(team_run_id.to_string()))?;

        // Reactivating must not create a second active run for the definition
        if status.is_active() {
            if let Some(other) = runs.values().find(|r| {
                r.team_definition_id == team_definition_id && r.team_run_id != team_run_id && r.status.is_active()
            }) {
                return Err(RepositoryError::ActiveRunExists {
                    team_definition_id,
                    team_run_id: other.team_run_id.clone(),
                });
            }
        }

        let record = runs
            .get_mut(team_run_id)
            .ok_or_else(|| RepositoryError::NotFound(team_run_id.to_string()))?;
        record.status = status;
        record.updated_at = Utc::now();
        info!(team_run_id = %team_run_id, status = %status, "Team run status updated");
        Ok(record.clone())
    }

    async fn delete(&self, team_run_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.runs.write().remove(team_run_id).is_some())
    }
}
