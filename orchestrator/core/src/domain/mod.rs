// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value objects, policies and repository contracts for distributed team runs.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure coordination rules with no transport or storage concerns

pub mod clock;
pub mod envelope;
pub mod events;
pub mod fencing;
pub mod node;
pub mod node_config;
pub mod placement;
pub mod repository;
pub mod team_run;
pub mod tool_approval;
