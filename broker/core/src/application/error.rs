// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

use thiserror::Error;

use crate::domain::backend::BackendError;

/// Bus interface name; error names are `<INTERFACE>.<Kind>`.
pub const INTERFACE: &str = "org.pkgbroker.System";

/// Failures surfaced to bus callers as named errors.
///
/// Build and run outcomes are not errors; they travel in-band as result codes.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("caller is not authorized for privileged operations")]
    AccessDenied,

    #[error("session is locked by another client")]
    LockedByOther,

    #[error("cannot start package engine: {0}")]
    EngineInit(BackendError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::LockedByOther => "LockedByOther",
            Self::EngineInit(_) => "EngineInitError",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Backend(_) => "TransactionError",
        }
    }

    pub fn bus_name(&self) -> String {
        format!("{}.{}", INTERFACE, self.kind())
    }
}
