// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Error responses of the Token endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay, skip_serializing_none};

/// An error code returned by the Token endpoint, as defined in [RFC 6749].
///
/// [RFC 6749]: https://www.rfc-editor.org/rfc/rfc6749#section-5.2
#[derive(Debug, Clone, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub enum ClientErrorCode {
    /// `invalid_request`
    InvalidRequest,

    /// `invalid_client`
    InvalidClient,

    /// `invalid_grant`
    ///
    /// The refresh token or the resource owner credentials are invalid,
    /// expired or revoked.
    InvalidGrant,

    /// `unauthorized_client`
    UnauthorizedClient,

    /// `unsupported_grant_type`
    UnsupportedGrantType,

    /// `invalid_scope`
    InvalidScope,

    /// `invalid_target`, returned by the token exchange grant when the
    /// audience is unknown.
    InvalidTarget,

    /// Any other error code.
    Unknown(String),
}

impl ClientErrorCode {
    /// Whether this error means the credentials used for the grant were
    /// rejected.
    #[must_use]
    pub fn is_credentials_rejected(&self) -> bool {
        matches!(
            self,
            Self::InvalidGrant | Self::InvalidClient | Self::UnauthorizedClient
        )
    }
}

impl fmt::Display for ClientErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => f.write_str("invalid_request"),
            Self::InvalidClient => f.write_str("invalid_client"),
            Self::InvalidGrant => f.write_str("invalid_grant"),
            Self::UnauthorizedClient => f.write_str("unauthorized_client"),
            Self::UnsupportedGrantType => f.write_str("unsupported_grant_type"),
            Self::InvalidScope => f.write_str("invalid_scope"),
            Self::InvalidTarget => f.write_str("invalid_target"),
            Self::Unknown(value) => f.write_str(value),
        }
    }
}

impl std::str::FromStr for ClientErrorCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "invalid_request" => Self::InvalidRequest,
            "invalid_client" => Self::InvalidClient,
            "invalid_grant" => Self::InvalidGrant,
            "unauthorized_client" => Self::UnauthorizedClient,
            "unsupported_grant_type" => Self::UnsupportedGrantType,
            "invalid_scope" => Self::InvalidScope,
            "invalid_target" => Self::InvalidTarget,
            other => Self::Unknown(other.to_owned()),
        })
    }
}

/// The body of an error response.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientError {
    /// The error code.
    pub error: ClientErrorCode,

    /// A human-readable description of the error.
    pub error_description: Option<String>,
}

impl ClientError {
    /// Creates a new error with the given code and no description.
    #[must_use]
    pub const fn new(error: ClientErrorCode) -> Self {
        Self {
            error,
            error_description: None,
        }
    }

    /// Sets the description of this error.
    #[must_use]
    pub fn with_description(mut self, description: String) -> Self {
        self.error_description = Some(description);
        self
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {description}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for ClientError {}
