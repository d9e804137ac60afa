// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Team Routing Domain Layer
//!
//! Pure types and ports for routing commands within a distributed team run.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`binding`] | `RunScopedTeamBinding`, `MemberRuntimeConfig`, `RunBootstrapPayload` |
//! | [`routing`] | `TeamRoutingPort`, request types, `DispatchResult` |
//! | [`runtime`] | `TeamMemberRuntime` port to the agent execution engine |

pub mod binding;
pub mod routing;
pub mod runtime;

pub use binding::*;
pub use routing::*;
pub use runtime::*;
