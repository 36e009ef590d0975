// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::fmt::Display;

use anyhow::{Context, bail};
use async_trait::async_trait;
use ephemera_backends::{MailAdmin, SettingsUpdate};
use ephemera_data_model::Principal;
use ephemera_http::RequestBuilderExt as _;
use http::{Method, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use thiserror::Error;
use url::Url;

/// How to authenticate against the management API.
#[derive(Clone)]
pub enum StalwartAuth {
    /// An administrator account
    Basic { username: String, password: String },

    /// An API key
    Bearer { token: String },
}

impl std::fmt::Debug for StalwartAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Bearer { .. } => f.debug_struct("Bearer").finish_non_exhaustive(),
        }
    }
}

/// A client for the REST management API of a Stalwart mail server.
#[derive(Clone)]
pub struct StalwartConnection {
    endpoint: Url,
    auth: StalwartAuth,
    http_client: reqwest::Client,
}

/// Successful answers are wrapped in a `data` envelope
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Represents an error received from the management API.
#[derive(Debug, Deserialize)]
struct ManagementError {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Debug, Error)]
pub(crate) struct Error {
    management_error: Option<ManagementError>,

    #[source]
    source: reqwest::Error,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.management_error {
            Some(ManagementError {
                error,
                details: Some(details),
            }) => write!(f, "{error}: {details}"),
            Some(ManagementError { error, .. }) => write!(f, "{error}"),
            None => write!(f, "(no specific error)"),
        }
    }
}

/// An extension trait for [`reqwest::Response`] to help working with errors
/// from the management API.
#[async_trait]
trait StalwartResponseExt: Sized {
    async fn error_for_stalwart_error(self) -> Result<Self, Error>;
}

#[async_trait]
impl StalwartResponseExt for reqwest::Response {
    async fn error_for_stalwart_error(self) -> Result<Self, Error> {
        match self.error_for_status_ref() {
            Ok(_response) => Ok(self),
            Err(source) => {
                let management_error = self.json().await.ok();
                Err(Error {
                    management_error,
                    source,
                })
            }
        }
    }
}

impl StalwartConnection {
    #[must_use]
    pub fn new(endpoint: Url, auth: StalwartAuth, http_client: reqwest::Client) -> Self {
        Self {
            endpoint,
            auth,
            http_client,
        }
    }

    fn builder(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let request = self.http_client.request(
            method,
            self.endpoint
                .join(url)
                .map(String::from)
                .unwrap_or_default(),
        );

        match &self.auth {
            StalwartAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            StalwartAuth::Bearer { token } => request.bearer_auth(token),
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.builder(Method::GET, url)
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.builder(Method::POST, url)
    }

    fn delete(&self, url: &str) -> reqwest::RequestBuilder {
        self.builder(Method::DELETE, url)
    }
}

async fn data<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, reqwest::Error> {
    let envelope: Envelope<T> = response.json().await?;
    Ok(envelope.data)
}

#[async_trait]
impl MailAdmin for StalwartConnection {
    #[tracing::instrument(
        name = "mail.get_principal",
        skip_all,
        fields(mail.principal = name),
        err(Debug),
    )]
    async fn get_principal(&self, name: &str) -> Result<Option<Principal>, anyhow::Error> {
        let encoded_name = urlencoding::encode(name);
        let response = self
            .get(&format!("api/principal/{encoded_name}"))
            .send_traced()
            .await
            .context("Failed to query principal from Stalwart")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response
            .error_for_stalwart_error()
            .await
            .context("Unexpected HTTP response while querying principal from Stalwart")?;

        let principal = data(response)
            .await
            .context("Failed to deserialize response while querying principal from Stalwart")?;

        Ok(Some(principal))
    }

    #[tracing::instrument(
        name = "mail.create_principal",
        skip_all,
        fields(mail.principal = principal.name),
        err(Debug),
    )]
    async fn create_principal(&self, principal: &Principal) -> Result<Option<u64>, anyhow::Error> {
        let response = self
            .post("api/principal")
            .json(principal)
            .send_traced()
            .await
            .context("Failed to create principal in Stalwart")?;

        let response = response
            .error_for_stalwart_error()
            .await
            .context("Unexpected HTTP response while creating principal in Stalwart")?;

        let id: Option<u64> = data(response)
            .await
            .context("Failed to deserialize response while creating principal in Stalwart")?;

        Ok(id)
    }

    #[tracing::instrument(
        name = "mail.delete_principal",
        skip_all,
        fields(mail.principal = name),
        err(Debug),
    )]
    async fn delete_principal(&self, name: &str) -> Result<u16, anyhow::Error> {
        let encoded_name = urlencoding::encode(name);
        let response = self
            .delete(&format!("api/principal/{encoded_name}"))
            .send_traced()
            .await
            .context("Failed to delete principal in Stalwart")?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(status.as_u16());
        }

        response
            .error_for_stalwart_error()
            .await
            .context("Unexpected HTTP response while deleting principal in Stalwart")?;

        Ok(status.as_u16())
    }

    #[tracing::instrument(
        name = "mail.update_settings",
        skip_all,
        fields(mail.settings.count = updates.len()),
        err(Debug),
    )]
    async fn update_settings(&self, updates: &[SettingsUpdate]) -> Result<(), anyhow::Error> {
        let response = self
            .post("api/settings")
            .json(updates)
            .send_traced()
            .await
            .context("Failed to update settings in Stalwart")?;

        response
            .error_for_stalwart_error()
            .await
            .context("Unexpected HTTP response while updating settings in Stalwart")?;

        Ok(())
    }

    #[tracing::instrument(name = "mail.reload", skip_all, err(Debug))]
    async fn reload(&self) -> Result<(), anyhow::Error> {
        let response = self
            .get("api/reload")
            .send_traced()
            .await
            .context("Failed to reload Stalwart settings")?;

        let response = response
            .error_for_stalwart_error()
            .await
            .context("Unexpected HTTP response while reloading Stalwart settings")?;

        if response.status() != StatusCode::OK {
            bail!(
                "Unexpected HTTP code while reloading Stalwart settings: {}",
                response.status()
            );
        }

        Ok(())
    }
}
