// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Team Envelopes
//!
//! Every cross-node command travels inside a [`TeamEnvelope`]: routing metadata
//! (team run, run version, kind, causation, sequence) plus an opaque payload.
//! The `envelope_id` is the idempotency key used by both sides of the bridge.
//!
//! ```text
//! EnvelopeInput ──build_shell──▶ EnvelopeShell ──attach_run_version──▶ TeamEnvelope
//!        └──────────────────build_envelope(input, version)──────────────────┘
//! ```

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Monotonic version of a team run.
///
/// Peers have historically sent the version either as a JSON number or as a
/// decimal string. Both deserialize to the same canonical `u64`, and all
/// comparisons happen on that value, so `"2"` and `2` are the same version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RunVersion(u64);

impl RunVersion {
    /// Version assigned to a freshly created run.
    pub const INITIAL: RunVersion = RunVersion(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RunVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunVersion {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl From<u64> for RunVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for RunVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(Self(n)),
            Repr::Text(s) => s
                .parse::<RunVersion>()
                .map_err(|_| D::Error::custom(format!("invalid run version '{}'", s))),
        }
    }
}

/// Discriminates the payload shape of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeKind {
    UserMessage,
    ToolApproval,
    InterAgentMessageRequest,
    ControlStop,
    /// Host → worker: members placed on the worker and their execution config.
    RunBootstrap,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserMessage => "USER_MESSAGE",
            Self::ToolApproval => "TOOL_APPROVAL",
            Self::InterAgentMessageRequest => "INTER_AGENT_MESSAGE_REQUEST",
            Self::ControlStop => "CONTROL_STOP",
            Self::RunBootstrap => "RUN_BOOTSTRAP",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-describing, deduplicable message wrapper for cross-node traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEnvelope<T> {
    pub envelope_id: String,
    pub team_run_id: String,
    pub run_version: RunVersion,
    pub kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    pub payload: T,
}

/// Envelope on the wire, payload still undecoded.
pub type WireEnvelope = TeamEnvelope<Value>;

impl<T: Serialize> TeamEnvelope<T> {
    /// Re-encode the payload as JSON so the envelope can cross the bridge.
    pub fn to_wire(&self) -> Result<WireEnvelope, serde_json::Error> {
        Ok(TeamEnvelope {
            envelope_id: self.envelope_id.clone(),
            team_run_id: self.team_run_id.clone(),
            run_version: self.run_version,
            kind: self.kind,
            causation_id: self.causation_id.clone(),
            sequence: self.sequence,
            payload: serde_json::to_value(&self.payload)?,
        })
    }
}

impl WireEnvelope {
    pub fn decode_payload<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        P::deserialize(&self.payload)
    }
}

/// An envelope whose authoritative run version is not known yet.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeShell<T> {
    pub envelope_id: String,
    pub team_run_id: String,
    pub kind: EnvelopeKind,
    pub causation_id: Option<String>,
    pub sequence: Option<u64>,
    pub payload: T,
}

impl<T> EnvelopeShell<T> {
    pub fn attach_run_version(self, run_version: RunVersion) -> TeamEnvelope<T> {
        TeamEnvelope {
            envelope_id: self.envelope_id,
            team_run_id: self.team_run_id,
            run_version,
            kind: self.kind,
            causation_id: self.causation_id,
            sequence: self.sequence,
            payload: self.payload,
        }
    }
}

/// Caller-facing description of an envelope to build.
#[derive(Debug, Clone)]
pub struct EnvelopeInput<T> {
    /// Retries must pass the id of the original attempt here.
    pub envelope_id: Option<String>,
    pub team_run_id: String,
    pub kind: EnvelopeKind,
    pub causation_id: Option<String>,
    pub sequence: Option<u64>,
    pub payload: T,
}

impl<T> EnvelopeInput<T> {
    pub fn new(team_run_id: impl Into<String>, kind: EnvelopeKind, payload: T) -> Self {
        Self {
            envelope_id: None,
            team_run_id: team_run_id.into(),
            kind,
            causation_id: None,
            sequence: None,
            payload,
        }
    }

    pub fn with_envelope_id(mut self, envelope_id: impl Into<String>) -> Self {
        self.envelope_id = Some(envelope_id.into());
        self
    }

    pub fn caused_by(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("team run id must not be empty")]
    EmptyTeamRunId,

    #[error("explicit envelope id must not be empty")]
    EmptyEnvelopeId,
}

pub type EnvelopeIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Builds envelopes, generating an `envelope_id` when the caller does not supply one.
#[derive(Clone)]
pub struct EnvelopeBuilder {
    id_generator: EnvelopeIdGenerator,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self {
            id_generator: Arc::new(|| Uuid::new_v4().to_string()),
        }
    }

    pub fn with_id_generator(id_generator: EnvelopeIdGenerator) -> Self {
        Self { id_generator }
    }

    pub fn build_shell<T>(&self, input: EnvelopeInput<T>) -> Result<EnvelopeShell<T>, EnvelopeError> {
        if input.team_run_id.trim().is_empty() {
            return Err(EnvelopeError::EmptyTeamRunId);
        }

        let envelope_id = match input.envelope_id {
            Some(id) if id.trim().is_empty() => return Err(EnvelopeError::EmptyEnvelopeId),
            Some(id) => id,
            None => (self.id_generator)(),
        };

        Ok(EnvelopeShell {
            envelope_id,
            team_run_id: input.team_run_id,
            kind: input.kind,
            causation_id: input.causation_id,
            sequence: input.sequence,
            payload: input.payload,
        })
    }

    pub fn build_envelope<T>(
        &self,
        input: EnvelopeInput<T>,
        run_version: RunVersion,
    ) -> Result<TeamEnvelope<T>, EnvelopeError> {
        Ok(self.build_shell(input)?.attach_run_version(run_version))
    }

    pub fn attach_run_version<T>(shell: EnvelopeShell<T>, run_version: RunVersion) -> TeamEnvelope<T> {
        shell.attach_run_version(run_version)
    }
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
