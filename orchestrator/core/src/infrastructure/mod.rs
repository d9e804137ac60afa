// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod auth;
pub mod bridge;
pub mod command_client;
pub mod event_client;
pub mod idempotency;
pub mod node_directory;
pub mod repositories;
pub mod telemetry;

pub use auth::InternalEnvelopeAuth;
pub use bridge::{CommandError, CommandHandler, HostNodeBridgeClient, WorkerNodeBridgeServer};
pub use command_client::{CommandTransport, HostDistributedCommandClient, SignedJsonPoster, TransportError};
pub use event_client::{EventUplink, HostDistributedEventClient};
pub use idempotency::RemoteEventIdempotencyPolicy;
pub use node_directory::NodeDirectoryService;
pub use repositories::InMemoryTeamRunRepository;
