// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Broad classes of failures when talking to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required setting is missing
    ConfigurationMissing,

    /// The backend rejected our credentials or token
    AuthenticationFailure,

    /// The resource does not exist
    NotFound,

    /// No response was received in time
    NetworkOrTimeout,

    /// Some of the steps of a multi-backend operation failed
    PartialFailure,

    /// Anything else
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConfigurationMissing => "configuration missing",
            Self::AuthenticationFailure => "authentication failure",
            Self::NotFound => "not found",
            Self::NetworkOrTimeout => "network error or timeout",
            Self::PartialFailure => "partial failure",
            Self::Unexpected => "unexpected error",
        };
        f.write_str(s)
    }
}

impl ErrorKind {
    /// Classify an error by walking its chain of causes.
    ///
    /// An explicit [`BackendError`] wins, then HTTP client errors are
    /// classified from their status code or failure mode.
    #[must_use]
    pub fn of(error: &anyhow::Error) -> Self {
        // Also finds a BackendError attached as context
        if let Some(error) = error.downcast_ref::<BackendError>() {
            return error.kind;
        }

        for cause in error.chain() {
            if let Some(error) = cause.downcast_ref::<BackendError>() {
                return error.kind;
            }

            if let Some(error) = cause.downcast_ref::<reqwest::Error>() {
                if error.is_timeout() || error.is_connect() {
                    return Self::NetworkOrTimeout;
                }

                if let Some(status) = error.status() {
                    return Self::from_status(status.as_u16());
                }
            }
        }

        Self::Unexpected
    }

    /// Classify an HTTP error status code
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailure,
            404 => Self::NotFound,
            408 | 502..=504 => Self::NetworkOrTimeout,
            _ => Self::Unexpected,
        }
    }
}

/// An error with an explicit [`ErrorKind`], optionally carrying the HTTP
/// status the backend answered with.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// An error built out of an unexpected HTTP status code
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Find the HTTP status code in the chain of causes of an error, if any
    #[must_use]
    pub fn status_of(error: &anyhow::Error) -> Option<u16> {
        if let Some(status) = error.downcast_ref::<BackendError>().and_then(|e| e.status) {
            return Some(status);
        }

        error.chain().find_map(|cause| {
            if let Some(error) = cause.downcast_ref::<BackendError>() {
                return error.status;
            }

            cause
                .downcast_ref::<reqwest::Error>()
                .and_then(reqwest::Error::status)
                .map(|status| status.as_u16())
        })
    }
}
