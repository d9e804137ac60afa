// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Host-side ingestion of events reported by workers.
//!
//! Order matters: fencing runs before dedup so a stale event never occupies
//! an idempotency slot, and dedup runs before publishing so a re-delivered
//! event never consumes a sequence number. Tool approval requests register
//! their invocation version when the aggregator publishes them.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::application::event_aggregator::TeamEventAggregator;
use crate::domain::events::RemoteTeamEvent;
use crate::domain::fencing::RunVersionFencingPolicy;
use crate::infrastructure::idempotency::{RemoteEventIdempotencyPolicy, RemoteEventKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "sequence", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestOutcome {
    Published(u64),
    DroppedStale,
    DroppedDuplicate,
}

pub struct RemoteEventIngress {
    fencing: RunVersionFencingPolicy,
    idempotency: Arc<RemoteEventIdempotencyPolicy>,
    aggregator: TeamEventAggregator,
}

impl RemoteEventIngress {
    pub fn new(
        fencing: RunVersionFencingPolicy,
        idempotency: Arc<RemoteEventIdempotencyPolicy>,
        aggregator: TeamEventAggregator,
    ) -> Self {
        Self {
            fencing,
            idempotency,
            aggregator,
        }
    }

    pub async fn ingest(&self, remote: RemoteTeamEvent) -> IngestOutcome {
        let event = remote.event;

        if self.fencing.drop_if_stale(&event.team_run_id, event.run_version).await {
            metrics::counter!("aegis_remote_events_dropped_total", "reason" => "stale").increment(1);
            return IngestOutcome::DroppedStale;
        }

        let key = RemoteEventKey::new(&event.team_run_id, &event.source_node_id, &remote.source_event_id);
        if self.idempotency.should_drop_duplicate(&key) {
            metrics::counter!("aegis_remote_events_dropped_total", "reason" => "duplicate").increment(1);
            return IngestOutcome::DroppedDuplicate;
        }

        let published = self.aggregator.publish_remote_event(event);
        debug!(
            team_run_id = %published.team_run_id,
            sequence = published.sequence,
            source_event_id = %remote.source_event_id,
            "Ingested remote event"
        );
        IngestOutcome::Published(published.sequence)
    }
}
