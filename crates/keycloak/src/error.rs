// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::fmt::Display;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// The error bodies the admin API answers with. Depending on the endpoint, it
/// is either an OAuth-style error or a plain message.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeycloakErrorBody {
    OAuth {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    },
    Message {
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

/// Represents an error received from Keycloak.
/// Where possible, we capture the error message from the JSON response body.
#[derive(Debug, Error)]
pub(crate) struct Error {
    body: Option<KeycloakErrorBody>,

    #[source]
    source: reqwest::Error,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.body {
            Some(KeycloakErrorBody::OAuth {
                error,
                error_description: Some(description),
            }) => write!(f, "{error}: {description}"),
            Some(KeycloakErrorBody::OAuth { error, .. }) => write!(f, "{error}"),
            Some(KeycloakErrorBody::Message { error_message }) => write!(f, "{error_message}"),
            None => write!(f, "(no specific error)"),
        }
    }
}

/// An extension trait for [`reqwest::Response`] to help working with errors
/// from Keycloak.
#[async_trait]
pub(crate) trait KeycloakResponseExt: Sized {
    async fn error_for_keycloak_error(self) -> Result<Self, Error>;
}

#[async_trait]
impl KeycloakResponseExt for reqwest::Response {
    async fn error_for_keycloak_error(self) -> Result<Self, Error> {
        match self.error_for_status_ref() {
            Ok(_response) => Ok(self),
            Err(source) => {
                let body = self.json().await.ok();
                Err(Error { body, source })
            }
        }
    }
}
