// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Host → worker command transport.
//!
//! One signed JSON POST per call. Failures are reported, never retried here:
//! the bridge client owns the retry loop and asks
//! [`TransportError::is_retryable`] whether to go again.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::envelope::WireEnvelope;
use crate::domain::node_config::TransportConfig;
use crate::infrastructure::auth::{AuthError, InternalEnvelopeAuth};
use crate::infrastructure::node_directory::{NodeDirectoryError, NodeDirectoryService};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    UnknownNode(#[from] NodeDirectoryError),

    #[error("Failed to serialize request body: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to sign request: {0}")]
    Auth(#[from] AuthError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Peer responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl TransportError {
    /// Network failures, 5xx and 429 may succeed on a later attempt. Other
    /// 4xx responses (stale versions, rejected commands, bad signatures) and
    /// misconfiguration never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Delivers one envelope to one node.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send_command(&self, target_node_id: &str, envelope: &WireEnvelope) -> Result<(), TransportError>;
}

/// Signed JSON POST shared by the command and event clients.
#[derive(Clone)]
pub struct SignedJsonPoster {
    http: reqwest::Client,
    auth: InternalEnvelopeAuth,
}

impl SignedJsonPoster {
    pub fn new(auth: InternalEnvelopeAuth, config: &TransportConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { http, auth })
    }

    pub async fn post(&self, url: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let signed = self.auth.sign(&body)?;

        let mut request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in signed.pairs() {
            request = request.header(name, value);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

pub struct HostDistributedCommandClient {
    directory: Arc<NodeDirectoryService>,
    poster: SignedJsonPoster,
}

impl HostDistributedCommandClient {
    pub fn new(directory: Arc<NodeDirectoryService>, poster: SignedJsonPoster) -> Self {
        Self { directory, poster }
    }
}

#[async_trait]
impl CommandTransport for HostDistributedCommandClient {
    async fn send_command(&self, target_node_id: &str, envelope: &WireEnvelope) -> Result<(), TransportError> {
        let url = self.directory.resolve_distributed_command_url(target_node_id)?;
        let body = serde_json::to_vec(envelope)?;

        debug!(
            target_node_id = %target_node_id,
            envelope_id = %envelope.envelope_id,
            kind = %envelope.kind,
            "Posting distributed command"
        );
        self.poster.post(&url, body).await
    }
}
