// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Internal Envelope Authentication
//
// Node-to-node requests carry two headers:
//
//   x-ab-node-id:   <claimed sender node id>
//   x-ab-signature: t=<unix ms>,v1=<hex HMAC-SHA256>
//
// The MAC covers "<t>.<node id>.<raw body>" and is keyed by the shared secret
// whose key id is the claimed node id. Secrets are looked up per request
// through a resolver so they can rotate without restarting the node.
//
// Verification fails closed: unknown key, malformed header, timestamp outside
// the skew window and MAC mismatch are all rejections, never retried.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::domain::clock::{Clock, SystemClock};
use crate::domain::node_config::AuthConfig;

pub const NODE_ID_HEADER: &str = "x-ab-node-id";
pub const SIGNATURE_HEADER: &str = "x-ab-signature";

type HmacSha256 = Hmac<Sha256>;

/// Key id → secret.
pub type SecretResolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Malformed signature header")]
    MalformedSignature,

    #[error("No shared secret for key id '{0}'")]
    UnknownKey(String),

    #[error("Signature timestamp {timestamp_ms} outside allowed skew (now {now_ms})")]
    TimestampSkew { timestamp_ms: i64, now_ms: i64 },

    #[error("Signature mismatch")]
    SignatureMismatch,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingHeader(_) => "MISSING_SIGNATURE",
            Self::MalformedSignature => "MALFORMED_SIGNATURE",
            Self::UnknownKey(_) => "UNKNOWN_NODE_KEY",
            Self::TimestampSkew { .. } => "SIGNATURE_EXPIRED",
            Self::SignatureMismatch => "INVALID_SIGNATURE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub node_id: String,
    pub signature: String,
}

impl SignedHeaders {
    pub fn pairs(&self) -> [(&'static str, &str); 2] {
        [(NODE_ID_HEADER, &self.node_id), (SIGNATURE_HEADER, &self.signature)]
    }
}

#[derive(Clone)]
pub struct InternalEnvelopeAuth {
    node_id: String,
    secrets: SecretResolver,
    clock: Arc<dyn Clock>,
    max_clock_skew_ms: i64,
}

impl InternalEnvelopeAuth {
    pub fn new(node_id: impl Into<String>, secrets: SecretResolver) -> Self {
        Self {
            node_id: node_id.into(),
            secrets,
            clock: Arc::new(SystemClock),
            max_clock_skew_ms: AuthConfig::default().max_clock_skew_ms,
        }
    }

    pub fn from_config(node_id: impl Into<String>, config: &AuthConfig) -> Self {
        let config = config.clone();
        let skew = config.max_clock_skew_ms;
        Self::new(node_id, Arc::new(move |key_id: &str| config.resolve_secret(key_id)))
            .with_max_clock_skew_ms(skew)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_clock_skew_ms(mut self, max_clock_skew_ms: i64) -> Self {
        self.max_clock_skew_ms = max_clock_skew_ms;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Sign an outgoing body as this node.
    pub fn sign(&self, body: &[u8]) -> Result<SignedHeaders, AuthError> {
        let timestamp_ms = self.clock.now_ms();
        let mac = self.compute_mac(&self.node_id, timestamp_ms, body)?;
        Ok(SignedHeaders {
            node_id: self.node_id.clone(),
            signature: format!("t={},v1={}", timestamp_ms, hex::encode(mac)),
        })
    }

    /// Verify an incoming request; returns the authenticated sender node id.
    pub fn verify(
        &self,
        body: &[u8],
        node_id_header: Option<&str>,
        signature_header: Option<&str>,
    ) -> Result<String, AuthError> {
        let node_id = node_id_header
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingHeader(NODE_ID_HEADER))?;
        let signature = signature_header.ok_or(AuthError::MissingHeader(SIGNATURE_HEADER))?;
        let (timestamp_ms, provided) = parse_signature(signature)?;

        let now_ms = self.clock.now_ms();
        let within_skew = now_ms
            .checked_sub(timestamp_ms)
            .map(i64::unsigned_abs)
            .is_some_and(|skew| skew <= self.max_clock_skew_ms.unsigned_abs());
        if !within_skew {
            warn!(node_id = %node_id, timestamp_ms, now_ms, "Rejecting signature outside skew window");
            return Err(AuthError::TimestampSkew { timestamp_ms, now_ms });
        }

        let expected = self.compute_mac(node_id, timestamp_ms, body)?;
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            warn!(node_id = %node_id, "Rejecting request with invalid signature");
            return Err(AuthError::SignatureMismatch);
        }

        Ok(node_id.to_string())
    }

    fn compute_mac(&self, key_id: &str, timestamp_ms: i64, body: &[u8]) -> Result<Vec<u8>, AuthError> {
        let secret = (self.secrets)(key_id).ok_or_else(|| AuthError::UnknownKey(key_id.to_string()))?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AuthError::UnknownKey(key_id.to_string()))?;
        mac.update(timestamp_ms.to_string().as_bytes());
        mac.update(b".");
        mac.update(key_id.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn parse_signature(header: &str) -> Result<(i64, Vec<u8>), AuthError> {
    let mut timestamp = None;
    let mut digest = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => digest = hex::decode(value).ok(),
            _ => {}
        }
    }
    match (timestamp, digest) {
        (Some(t), Some(d)) => Ok((t, d)),
        _ => Err(AuthError::MalformedSignature),
    }
}
