// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `aegis-team-swarm`: Distributed Team Routing
//!
//! Runs one agent team across a host node and its workers.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `RunScopedTeamBinding`, `TeamRoutingPort`, `TeamMemberRuntime` |
//! | [`application`] | Application | registries, routing adapters, command executors, `TeamRunOrchestrator` |
//!
//! ## Key Concepts
//!
//! - **Binding**: the runtime team instance executing a run on this node plus
//!   the configuration of each member placed here.
//! - **Routing adapter**: the per-run [`domain::TeamRoutingPort`]. On the host it
//!   delivers to local members or sends envelopes to workers; on a worker it
//!   forwards everything up to the host.
//! - **Run version**: every adapter and binding is tied to one run version.
//!   A restart allocates a new one, and envelopes still carrying the old
//!   version are fenced on arrival.
//!
//! Transport, signing, fencing and event aggregation live in `aegis-team-core`.

pub mod application;
pub mod domain;

pub use domain::*;
