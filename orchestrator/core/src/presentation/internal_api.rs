// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Internal Distributed API
//
// Two node-to-node endpoints, both signed with InternalEnvelopeAuth:
//
//   POST /internal/distributed/v1/commands  (TeamEnvelope → CommandHandler)
//   POST /internal/distributed/v1/events    (RemoteTeamEvent → RemoteEventIngress)
//
// The signature is verified over the raw body before any parsing.
//
// Status mapping:
//   202  accepted (including deduped re-deliveries)
//   400  INVALID_ENVELOPE / UNSUPPORTED_KIND
//   401  signature failures, with {code, detail}
//   403  SOURCE_NODE_MISMATCH (event claims another node as its source),
//        UNAUTHORIZED_SENDER (signer may not command this run)
//   404  UNKNOWN_TEAM_RUN
//   409  stale or missing run/invocation versions, rejected dispatches
//   500  anything else

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::application::event_ingress::RemoteEventIngress;
use crate::domain::envelope::WireEnvelope;
use crate::domain::events::RemoteTeamEvent;
use crate::infrastructure::auth::{InternalEnvelopeAuth, NODE_ID_HEADER, SIGNATURE_HEADER};
use crate::infrastructure::bridge::{CommandError, WorkerNodeBridgeServer};
use crate::infrastructure::node_directory::{COMMAND_PATH, EVENT_PATH};

pub struct CommandEndpointState {
    pub auth: InternalEnvelopeAuth,
    pub server: Arc<WorkerNodeBridgeServer>,
}

pub struct EventEndpointState {
    pub auth: InternalEnvelopeAuth,
    pub ingress: Arc<RemoteEventIngress>,
}

pub fn command_routes(auth: InternalEnvelopeAuth, server: Arc<WorkerNodeBridgeServer>) -> Router {
    let state = Arc::new(CommandEndpointState { auth, server });
    Router::new()
        .route(COMMAND_PATH, post(receive_command))
        .with_state(state)
}

pub fn event_routes(auth: InternalEnvelopeAuth, ingress: Arc<RemoteEventIngress>) -> Router {
    let state = Arc::new(EventEndpointState { auth, ingress });
    Router::new()
        .route(EVENT_PATH, post(receive_event))
        .with_state(state)
}

fn error_response(status: StatusCode, code: &str, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "code": code, "detail": detail.into() }))).into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn authenticate(auth: &InternalEnvelopeAuth, headers: &HeaderMap, body: &[u8]) -> Result<String, Response> {
    auth.verify(body, header(headers, NODE_ID_HEADER), header(headers, SIGNATURE_HEADER))
        .map_err(|e| error_response(StatusCode::UNAUTHORIZED, e.code(), e.to_string()))
}

async fn receive_command(
    State(state): State<Arc<CommandEndpointState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sender = match authenticate(&state.auth, &headers, &body) {
        Ok(sender) => sender,
        Err(response) => return response,
    };

    let envelope: WireEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "INVALID_ENVELOPE", e.to_string()),
    };

    match state.server.handle_command(&sender, &envelope).await {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Err(e) => {
            warn!(sender = %sender, envelope_id = %envelope.envelope_id, error = %e, "Command rejected");
            error_response(command_error_status(&e), e.code(), e.to_string())
        }
    }
}

fn command_error_status(error: &CommandError) -> StatusCode {
    match error {
        CommandError::Fencing(_) | CommandError::ToolApproval(_) | CommandError::Rejected { .. } => {
            StatusCode::CONFLICT
        }
        CommandError::InvalidPayload { .. } | CommandError::UnsupportedKind(_) => StatusCode::BAD_REQUEST,
        CommandError::UnknownRun(_) => StatusCode::NOT_FOUND,
        CommandError::UnauthorizedSender { .. } => StatusCode::FORBIDDEN,
        CommandError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn receive_event(
    State(state): State<Arc<EventEndpointState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sender = match authenticate(&state.auth, &headers, &body) {
        Ok(sender) => sender,
        Err(response) => return response,
    };

    let event: RemoteTeamEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "INVALID_ENVELOPE", e.to_string()),
    };

    if event.event.source_node_id != sender {
        return error_response(
            StatusCode::FORBIDDEN,
            "SOURCE_NODE_MISMATCH",
            format!("node '{}' cannot report events for '{}'", sender, event.event.source_node_id),
        );
    }

    let outcome = state.ingress.ingest(event).await;
    (StatusCode::ACCEPTED, Json(outcome)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::{EnvelopeKind, RunVersion, TeamEnvelope};
    use crate::infrastructure::bridge::CommandHandler;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct RejectStale;

    #[async_trait]
    impl CommandHandler for RejectStale {
        async fn execute(&self, sender_node_id: &str, envelope: &WireEnvelope) -> Result<(), CommandError> {
            if sender_node_id != "host" {
                return Err(CommandError::UnauthorizedSender {
                    sender_node_id: sender_node_id.to_string(),
                    reason: "not the run's host".to_string(),
                });
            }
            if envelope.run_version != RunVersion::new(2) {
                return Err(crate::domain::fencing::FencingError::StaleRunVersion {
                    team_run_id: envelope.team_run_id.clone(),
                    received: envelope.run_version,
                    current: RunVersion::new(2),
                }
                .into());
            }
            Ok(())
        }
    }

    fn auth_as(node_id: &str) -> InternalEnvelopeAuth {
        InternalEnvelopeAuth::new(node_id, Arc::new(|_: &str| Some("secret".to_string())))
    }

    fn auth() -> InternalEnvelopeAuth {
        auth_as("host")
    }

    fn body(version: u64) -> Vec<u8> {
        let envelope = TeamEnvelope {
            envelope_id: format!("e-{}", version),
            team_run_id: "run-1".to_string(),
            run_version: RunVersion::new(version),
            kind: EnvelopeKind::ControlStop,
            causation_id: None,
            sequence: None,
            payload: json!({}),
        };
        serde_json::to_vec(&envelope).unwrap()
    }

    fn signed_request(body: Vec<u8>) -> Request<Body> {
        signed_request_as("host", body)
    }

    fn signed_request_as(node_id: &str, body: Vec<u8>) -> Request<Body> {
        let signed = auth_as(node_id).sign(&body).unwrap();
        Request::post(COMMAND_PATH)
            .header("content-type", "application/json")
            .header(NODE_ID_HEADER, signed.node_id)
            .header(SIGNATURE_HEADER, signed.signature)
            .body(Body::from(body))
            .unwrap()
    }

    fn app() -> Router {
        command_routes(auth(), Arc::new(WorkerNodeBridgeServer::new(Arc::new(RejectStale), 16)))
    }

    #[tokio::test]
    async fn test_command_status_mapping() {
        let accepted = app().oneshot(signed_request(body(2))).await.unwrap();
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);

        let stale = app().oneshot(signed_request(body(1))).await.unwrap();
        assert_eq!(stale.status(), StatusCode::CONFLICT);

        let garbage = app().oneshot(signed_request(b"{not json".to_vec())).await.unwrap();
        assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unsigned_command_is_unauthorized() {
        let request = Request::post(COMMAND_PATH)
            .header("content-type", "application/json")
            .body(Body::from(body(2)))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_command_from_unauthorized_sender_is_forbidden() {
        let response = app().oneshot(signed_request_as("worker-2", body(2))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "UNAUTHORIZED_SENDER");
    }
}
