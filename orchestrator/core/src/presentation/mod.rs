// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`aegis-team-core`)
//!
//! Node-to-node HTTP surface that translates signed requests into bridge and
//! ingress calls. No coordination logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`internal_api`] | HTTP (Axum) | Internal command and event endpoints |

pub mod internal_api;
