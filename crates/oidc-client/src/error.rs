// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! The error types used in this crate.

use oauth2_types::errors::ClientError;
use reqwest::StatusCode;
use thiserror::Error;

/// All possible errors when requesting an access token.
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The HTTP client returned an error.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The Token endpoint answered with an error status code.
    #[error("token endpoint responded with status {status}")]
    Endpoint {
        /// The HTTP status code of the response.
        status: StatusCode,

        /// The error body of the response, if it could be parsed.
        #[source]
        error: Option<ClientError>,
    },
}

impl TokenRequestError {
    /// Whether the identity provider rejected the credentials used for the
    /// grant, as opposed to a transient failure.
    #[must_use]
    pub fn is_credentials_rejected(&self) -> bool {
        match self {
            Self::Http(_) => false,
            Self::Endpoint {
                error: Some(error), ..
            } => error.error.is_credentials_rejected(),
            Self::Endpoint { status, .. } => {
                *status == StatusCode::UNAUTHORIZED || *status == StatusCode::BAD_REQUEST
            }
        }
    }

    /// Whether the request failed before any response was received.
    #[must_use]
    pub fn is_network(&self) -> bool {
        match self {
            Self::Http(error) => error.is_connect() || error.is_timeout() || error.is_request(),
            Self::Endpoint { .. } => false,
        }
    }
}
