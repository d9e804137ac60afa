// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Team Event Aggregator
//
// Merges local and remote team events into one ordered stream per run.
// Sequence numbers start at 1 per team run and are shared across origins;
// they are the only ordering clients may rely on for display and replay.
//
// Fan-out goes to a tokio broadcast channel (live subscribers) and to an
// optional sink callback. Both are invoked under the sequence lock so every
// consumer observes events in sequence order.
//
// A TOOL_APPROVAL_REQUESTED event of either origin registers its invocation
// version with the attached ToolApprovalConcurrencyPolicy before fan-out, so a
// consumer reacting to the event can already submit a decision.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::clock::{Clock, SystemClock};
use crate::domain::events::{
    AggregatedTeamEvent, EventOrigin, TeamEventInput, ToolApprovalRequestedPayload, TOOL_APPROVAL_REQUESTED,
};
use crate::domain::tool_approval::ToolApprovalConcurrencyPolicy;

pub type PublishSink = Arc<dyn Fn(&AggregatedTeamEvent) + Send + Sync>;

#[derive(Clone)]
pub struct TeamEventAggregator {
    sequences: Arc<Mutex<HashMap<String, u64>>>,
    sender: Arc<broadcast::Sender<AggregatedTeamEvent>>,
    sink: Option<PublishSink>,
    tool_approvals: Option<Arc<ToolApprovalConcurrencyPolicy>>,
    clock: Arc<dyn Clock>,
}

impl TeamEventAggregator {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sequences: Arc::new(Mutex::new(HashMap::new())),
            sender: Arc::new(sender),
            sink: None,
            tool_approvals: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// The sink runs while the sequence lock is held and must not block.
    pub fn with_sink(mut self, sink: PublishSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_tool_approvals(mut self, tool_approvals: Arc<ToolApprovalConcurrencyPolicy>) -> Self {
        self.tool_approvals = Some(tool_approvals);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn publish_local_event(&self, input: TeamEventInput) -> AggregatedTeamEvent {
        self.publish(input, EventOrigin::Local)
    }

    pub fn publish_remote_event(&self, input: TeamEventInput) -> AggregatedTeamEvent {
        self.publish(input, EventOrigin::Remote)
    }

    fn publish(&self, input: TeamEventInput, origin: EventOrigin) -> AggregatedTeamEvent {
        self.register_tool_approval(&input);
        let received_at = self.received_at();
        let mut sequences = self.sequences.lock();

        let counter = sequences.entry(input.team_run_id.clone()).or_insert(0);
        *counter += 1;
        let event = AggregatedTeamEvent::from_input(input, *counter, origin, received_at);

        if self.sender.send(event.clone()).is_err() {
            debug!(team_run_id = %event.team_run_id, "No subscribers listening to team events");
        }
        if let Some(sink) = &self.sink {
            sink(&event);
        }
        drop(sequences);

        metrics::counter!("aegis_team_events_published_total", "origin" => origin_label(origin)).increment(1);
        debug!(
            team_run_id = %event.team_run_id,
            sequence = event.sequence,
            event_type = %event.event_type,
            origin = ?origin,
            "Published team event"
        );
        event
    }

    fn register_tool_approval(&self, input: &TeamEventInput) {
        let Some(tool_approvals) = &self.tool_approvals else {
            return;
        };
        if input.event_type != TOOL_APPROVAL_REQUESTED {
            return;
        }
        match serde_json::from_value::<ToolApprovalRequestedPayload>(input.payload.clone()) {
            Ok(request) => tool_approvals.register_pending_invocation(
                &input.team_run_id,
                &request.tool_invocation_id,
                request.invocation_version,
            ),
            Err(e) => warn!(
                team_run_id = %input.team_run_id,
                error = %e,
                "Malformed tool approval request payload"
            ),
        }
    }

    /// Last sequence assigned for a run, `0` if none.
    pub fn current_sequence(&self, team_run_id: &str) -> u64 {
        self.sequences.lock().get(team_run_id).copied().unwrap_or(0)
    }

    /// Forgets a deleted run; a later run with the same id restarts at 1.
    pub fn reset_run(&self, team_run_id: &str) {
        self.sequences.lock().remove(team_run_id);
    }

    pub fn subscribe(&self) -> TeamEventReceiver {
        TeamEventReceiver {
            receiver: self.sender.subscribe(),
            team_run_id: None,
        }
    }

    /// Receiver that only yields events of one team run.
    pub fn subscribe_run(&self, team_run_id: impl Into<String>) -> TeamEventReceiver {
        TeamEventReceiver {
            receiver: self.sender.subscribe(),
            team_run_id: Some(team_run_id.into()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn received_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.clock.now_ms()).unwrap_or_else(Utc::now)
    }
}

impl Default for TeamEventAggregator {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn origin_label(origin: EventOrigin) -> &'static str {
    match origin {
        EventOrigin::Local => "local",
        EventOrigin::Remote => "remote",
    }
}

pub struct TeamEventReceiver {
    receiver: broadcast::Receiver<AggregatedTeamEvent>,
    team_run_id: Option<String>,
}

impl TeamEventReceiver {
    pub async fn recv(&mut self) -> Result<AggregatedTeamEvent, AggregatorError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => AggregatorError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Team event receiver lagged by {} events", n);
                    AggregatorError::Lagged(n)
                }
            })?;

            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<AggregatedTeamEvent, AggregatorError> {
        loop {
            let event = self.receiver.try_recv().map_err(|e| match e {
                broadcast::error::TryRecvError::Empty => AggregatorError::Empty,
                broadcast::error::TryRecvError::Closed => AggregatorError::Closed,
                broadcast::error::TryRecvError::Lagged(n) => {
                    warn!("Team event receiver lagged by {} events", n);
                    AggregatorError::Lagged(n)
                }
            })?;

            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    fn matches(&self, event: &AggregatedTeamEvent) -> bool {
        self.team_run_id
            .as_deref()
            .map_or(true, |id| id == event.team_run_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Team event stream is closed")]
    Closed,

    #[error("No team events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
