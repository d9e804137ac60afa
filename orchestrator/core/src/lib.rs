// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AEGIS Team Core
//!
//! Distributed team-run coordination: placement, signed envelope delivery,
//! run-version fencing and event aggregation between a host node and its
//! workers.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain policies, application services, transports and the
//!   internal node-to-node HTTP surface

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
