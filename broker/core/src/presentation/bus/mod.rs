// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{BusClient, ReceivedSignal};
pub use protocol::{BusError, MethodCall, ServerFrame, PROTOCOL_VERSION};
pub use server::BusServer;
