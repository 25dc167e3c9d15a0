// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`pkgbroker-core`)
//!
//! Transports that translate peer requests into [`crate::application`] calls.
//! No business logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`bus`] | Unix socket, NDJSON | Method calls, replies and broadcast signals |
//! | [`health`] | HTTP (Axum) | Loopback liveness and session state |

pub mod bus;
pub mod health;
