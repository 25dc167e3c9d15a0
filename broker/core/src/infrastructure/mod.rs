// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod authority;
pub mod event_bus;
pub mod memory_backend;

pub use authority::UidPolicyAuthority;
pub use event_bus::{EventBus, EventBusError, EventReceiver};
pub use memory_backend::{Catalog, MemoryEngineFactory, RepositoryCatalog, SigningKey};
