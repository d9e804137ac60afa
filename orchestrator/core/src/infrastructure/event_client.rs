// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Worker → host event uplink.
//!
//! Events carry a worker-assigned `sourceEventId` that stays the same across
//! retries, so re-deliveries collapse in the host's idempotency policy.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::application::retry::CommandRetryPolicy;
use crate::domain::events::RemoteTeamEvent;
use crate::infrastructure::command_client::{SignedJsonPoster, TransportError};
use crate::infrastructure::node_directory::NodeDirectoryService;

#[async_trait]
pub trait EventUplink: Send + Sync {
    /// Returns the number of delivery attempts used.
    async fn send_event(&self, event: &RemoteTeamEvent) -> Result<u32, TransportError>;
}

pub struct HostDistributedEventClient {
    host_node_id: String,
    directory: Arc<NodeDirectoryService>,
    poster: SignedJsonPoster,
    retry: CommandRetryPolicy,
}

impl HostDistributedEventClient {
    pub fn new(
        host_node_id: impl Into<String>,
        directory: Arc<NodeDirectoryService>,
        poster: SignedJsonPoster,
        retry: CommandRetryPolicy,
    ) -> Self {
        Self {
            host_node_id: host_node_id.into(),
            directory,
            poster,
            retry,
        }
    }
}

#[async_trait]
impl EventUplink for HostDistributedEventClient {
    async fn send_event(&self, event: &RemoteTeamEvent) -> Result<u32, TransportError> {
        let url = self.directory.resolve_distributed_event_url(&self.host_node_id)?;
        let body = serde_json::to_vec(event)?;

        let outcome = self
            .retry
            .retry_with_backoff(TransportError::is_retryable, |_| self.poster.post(&url, body.clone()))
            .await?;

        debug!(
            team_run_id = %event.event.team_run_id,
            source_event_id = %event.source_event_id,
            attempts = outcome.attempts,
            "Event delivered to host"
        );
        Ok(outcome.attempts)
    }
}
