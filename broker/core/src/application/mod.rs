// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod error;
pub mod gate;
pub mod catalog;
pub mod transaction;
pub mod service;
pub mod watchdog;

pub use error::{ServiceError, INTERFACE};
pub use service::{PackageService, ServiceStatus, API_VERSION};
pub use transaction::RunOutcome;
pub use watchdog::WatchdogScheduler;
