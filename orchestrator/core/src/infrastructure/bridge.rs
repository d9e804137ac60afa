// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Node Bridge
//!
//! Wire-level command channel between a host and its workers.
//!
//! Delivery is idempotent at two levels:
//!
//! | Side | Structure | Guarantees |
//! |------|-----------|------------|
//! | [`HostNodeBridgeClient`] | in-flight envelope ids | one outstanding network send per envelope id |
//! | [`WorkerNodeBridgeServer`] | bounded LRU of processed ids | at most one execution per envelope id |
//!
//! Both structures are updated with an atomic check-and-set under a lock, so
//! concurrent duplicates cannot both proceed.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::retry::CommandRetryPolicy;
use crate::domain::envelope::{EnvelopeKind, TeamEnvelope, WireEnvelope};
use crate::domain::fencing::FencingError;
use crate::domain::node_config::BridgeConfig;
use crate::domain::tool_approval::ToolApprovalError;
use crate::infrastructure::command_client::{CommandTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub delivered: bool,
    pub attempts: u32,
    pub deduped: bool,
}

#[derive(Clone)]
pub struct HostNodeBridgeClient {
    transport: Arc<dyn CommandTransport>,
    retry: CommandRetryPolicy,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl HostNodeBridgeClient {
    pub fn new(transport: Arc<dyn CommandTransport>, retry: CommandRetryPolicy) -> Self {
        Self {
            transport,
            retry,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Deliver an envelope, retrying transient failures. A concurrent call
    /// for an envelope id that is already in flight returns immediately as
    /// deduped. After retries are exhausted the last transport error is
    /// returned.
    pub async fn send_command(&self, target_node_id: &str, envelope: &WireEnvelope) -> Result<SendOutcome, TransportError> {
        let envelope_id = envelope.envelope_id.clone();
        if !self.in_flight.lock().insert(envelope_id.clone()) {
            debug!(envelope_id = %envelope_id, "Envelope already in flight, skipping send");
            metrics::counter!("aegis_distributed_commands_deduped_total", "side" => "client").increment(1);
            return Ok(SendOutcome {
                delivered: true,
                attempts: 0,
                deduped: true,
            });
        }

        let in_flight = self.in_flight.clone();
        scopeguard::defer! {
            in_flight.lock().remove(&envelope_id);
        }

        let outcome = self
            .retry
            .retry_with_backoff(TransportError::is_retryable, |attempt| {
                if attempt > 1 {
                    debug!(envelope_id = %envelope.envelope_id, attempt, "Resending envelope");
                }
                self.transport.send_command(target_node_id, envelope)
            })
            .await
            .inspect_err(|e| {
                warn!(
                    target_node_id = %target_node_id,
                    envelope_id = %envelope.envelope_id,
                    error = %e,
                    "Command delivery failed"
                );
                metrics::counter!("aegis_distributed_commands_failed_total").increment(1);
            })?;

        metrics::counter!("aegis_distributed_commands_sent_total", "kind" => envelope.kind.as_str()).increment(1);
        Ok(SendOutcome {
            delivered: true,
            attempts: outcome.attempts,
            deduped: false,
        })
    }

    /// Typed convenience over [`Self::send_command`].
    pub async fn send_envelope<T: Serialize>(
        &self,
        target_node_id: &str,
        envelope: &TeamEnvelope<T>,
    ) -> Result<SendOutcome, TransportError> {
        let wire = envelope.to_wire()?;
        self.send_command(target_node_id, &wire).await
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Failure while executing a delivered command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Fencing(#[from] FencingError),

    #[error(transparent)]
    ToolApproval(#[from] ToolApprovalError),

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: EnvelopeKind, reason: String },

    #[error("Envelope kind {0} is not accepted here")]
    UnsupportedKind(EnvelopeKind),

    #[error("Team run '{0}' is not bound on this node")]
    UnknownRun(String),

    #[error("Command rejected with {code}")]
    Rejected { code: String },

    #[error("Node '{sender_node_id}' may not send this command: {reason}")]
    UnauthorizedSender { sender_node_id: String, reason: String },

    #[error("Command execution failed: {0}")]
    Execution(String),
}

impl CommandError {
    pub fn code(&self) -> &str {
        match self {
            Self::Fencing(FencingError::StaleRunVersion { .. }) => "STALE_RUN_VERSION",
            Self::Fencing(FencingError::MissingRunVersion { .. }) => "MISSING_RUN_VERSION",
            Self::ToolApproval(e) => e.code(),
            Self::InvalidPayload { .. } => "INVALID_ENVELOPE",
            Self::UnsupportedKind(_) => "UNSUPPORTED_KIND",
            Self::UnknownRun(_) => "UNKNOWN_TEAM_RUN",
            Self::Rejected { code } => code,
            Self::UnauthorizedSender { .. } => "UNAUTHORIZED_SENDER",
            Self::Execution(_) => "COMMAND_FAILED",
        }
    }

    /// The message is obsolete rather than the node being broken.
    pub fn is_consistency_error(&self) -> bool {
        matches!(self, Self::Fencing(_) | Self::ToolApproval(_))
    }
}

/// Executes a command that reached this node through the bridge.
///
/// `sender_node_id` is the authenticated node that signed the request; the
/// handler decides whether that node may issue the command for the run.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, sender_node_id: &str, envelope: &WireEnvelope) -> Result<(), CommandError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleOutcome {
    pub handled: bool,
    pub deduped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessingState {
    InProgress,
    Done,
}

pub struct WorkerNodeBridgeServer {
    handler: Arc<dyn CommandHandler>,
    processed: Mutex<LruCache<String, ProcessingState>>,
}

impl WorkerNodeBridgeServer {
    pub fn new(handler: Arc<dyn CommandHandler>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            handler,
            processed: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(handler: Arc<dyn CommandHandler>, config: &BridgeConfig) -> Self {
        Self::new(handler, config.processed_cache_capacity)
    }

    /// Execute an envelope at most once. A duplicate (already processed or
    /// currently executing) is acknowledged without touching the handler. A
    /// failed or cancelled execution is forgotten so the sender's retry can
    /// run it again.
    pub async fn handle_command(
        &self,
        sender_node_id: &str,
        envelope: &WireEnvelope,
    ) -> Result<HandleOutcome, CommandError> {
        {
            let mut processed = self.processed.lock();
            if processed.contains(&envelope.envelope_id) {
                debug!(envelope_id = %envelope.envelope_id, "Duplicate envelope acknowledged");
                metrics::counter!("aegis_distributed_commands_deduped_total", "side" => "server").increment(1);
                return Ok(HandleOutcome {
                    handled: true,
                    deduped: true,
                });
            }
            processed.put(envelope.envelope_id.clone(), ProcessingState::InProgress);
        }

        // Pops the in-progress marker on error or if this future is dropped
        let pending = scopeguard::guard(envelope.envelope_id.clone(), |envelope_id| {
            self.processed.lock().pop(&envelope_id);
        });

        match self.handler.execute(sender_node_id, envelope).await {
            Ok(()) => {
                let envelope_id = scopeguard::ScopeGuard::into_inner(pending);
                self.processed.lock().put(envelope_id, ProcessingState::Done);
                metrics::counter!("aegis_distributed_commands_handled_total", "kind" => envelope.kind.as_str())
                    .increment(1);
                Ok(HandleOutcome {
                    handled: true,
                    deduped: false,
                })
            }
            Err(e) => {
                drop(pending);
                warn!(
                    sender_node_id = %sender_node_id,
                    team_run_id = %envelope.team_run_id,
                    envelope_id = %envelope.envelope_id,
                    kind = %envelope.kind,
                    error = %e,
                    "Command execution failed"
                );
                Err(e)
            }
        }
    }

    pub fn clear_processed_cache(&self) {
        let mut processed = self.processed.lock();
        info!("Clearing {} processed envelope ids", processed.len());
        processed.clear();
    }

    /// Ids recorded as fully processed.
    pub fn processed_count(&self) -> usize {
        self.processed
            .lock()
            .iter()
            .filter(|(_, state)| **state == ProcessingState::Done)
            .count()
    }
}
