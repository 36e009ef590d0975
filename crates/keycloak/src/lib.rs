// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An implementation of the [`IdentityProvider`] contract on top of the
//! Keycloak admin REST API.

use anyhow::{Context, bail};
use chrono::DateTime;
use ephemera_backends::{BackendError, ErrorKind, IdentityProvider};
use ephemera_data_model::{BoxClock, Identity, NewIdentity, TokenPair};
use ephemera_http::RequestBuilderExt as _;
use ephemera_oidc_client::{
    requests::client_credentials::access_token_with_client_credentials,
    types::client_credentials::ClientCredentials,
};
use error::KeycloakResponseExt;
use http::{Method, StatusCode, header::LOCATION};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

mod error;

/// How many users to fetch per page when listing
const PAGE_SIZE: usize = 100;

pub struct KeycloakConnection {
    realm: String,
    admin_endpoint: Url,
    token_endpoint: Url,
    credentials: ClientCredentials,
    http_client: reqwest::Client,
    clock: BoxClock,
    admin_token: Mutex<Option<TokenPair>>,
}

impl KeycloakConnection {
    /// Create a new connection to the given realm of a Keycloak server.
    ///
    /// The `credentials` are those of a confidential client with the
    /// `manage-users` role of the `realm-management` client.
    ///
    /// # Errors
    ///
    /// Returns an error if the realm name can't be turned into a valid URL.
    pub fn new(
        base_url: &Url,
        realm: &str,
        credentials: ClientCredentials,
        http_client: reqwest::Client,
        clock: BoxClock,
    ) -> Result<Self, url::ParseError> {
        let encoded_realm = urlencoding::encode(realm);
        let admin_endpoint = base_url.join(&format!("admin/realms/{encoded_realm}/"))?;
        let token_endpoint = Self::issuer(base_url, realm)?.join("protocol/openid-connect/token")?;

        Ok(Self {
            realm: realm.to_owned(),
            admin_endpoint,
            token_endpoint,
            credentials,
            http_client,
            clock,
            admin_token: Mutex::new(None),
        })
    }

    /// The OIDC issuer of the given realm
    ///
    /// # Errors
    ///
    /// Returns an error if the realm name can't be turned into a valid URL.
    pub fn issuer(base_url: &Url, realm: &str) -> Result<Url, url::ParseError> {
        let realm = urlencoding::encode(realm);
        base_url.join(&format!("realms/{realm}/"))
    }

    /// The token endpoint of the realm
    #[must_use]
    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    /// Get an admin access token, reusing the cached one unless it is about
    /// to expire.
    async fn admin_token(&self) -> Result<String, anyhow::Error> {
        let mut cached = self.admin_token.lock().await;
        let now = self.clock.now();

        if let Some(token) = cached.as_ref() {
            if !token.needs_refresh(now) {
                return Ok(token.access_token.clone());
            }
        }

        debug!("Requesting a new admin token");
        let response = access_token_with_client_credentials(
            &self.http_client,
            &self.credentials,
            &self.token_endpoint,
            None,
        )
        .await
        .map_err(|error| {
            let kind = if error.is_network() {
                ErrorKind::NetworkOrTimeout
            } else if error.is_credentials_rejected() {
                ErrorKind::AuthenticationFailure
            } else {
                ErrorKind::Unexpected
            };

            anyhow::Error::new(error).context(BackendError::new(
                kind,
                "Failed to get an admin token from Keycloak",
            ))
        })?;

        let token = TokenPair::from_response(response, now);
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn forget_admin_token(&self) {
        self.admin_token.lock().await.take();
    }

    /// Send a request to the admin API. If the admin token got rejected, it is
    /// renewed and the request sent once more.
    async fn send<F>(
        &self,
        method: Method,
        path: &str,
        prepare: F,
    ) -> Result<reqwest::Response, anyhow::Error>
    where
        F: Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync,
    {
        let url = self.admin_endpoint.join(path)?;

        let token = self.admin_token().await?;
        let response = prepare(
            self.http_client
                .request(method.clone(), url.clone())
                .bearer_auth(token),
        )
        .send_traced()
        .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("Admin token was rejected, retrying with a fresh one");
        self.forget_admin_token().await;
        let token = self.admin_token().await?;
        let response = prepare(self.http_client.request(method, url).bearer_auth(token))
            .send_traced()
            .await?;

        Ok(response)
    }

    fn to_identity(&self, user: KeycloakUser) -> Result<Identity, anyhow::Error> {
        let Some(id) = user.id else {
            bail!("Keycloak returned a user without an ID");
        };

        let created_at = user
            .created_timestamp
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(|| {
                // An unknown creation time never makes an identity look aged
                warn!(user.id = %id, "User has no creation timestamp");
                self.clock.now()
            });

        Ok(Identity {
            id,
            username: user.username,
            email: user.email.filter(|email| !email.is_empty()),
            enabled: user.enabled.unwrap_or(false),
            created_at,
        })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeycloakCredential {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    temporary: bool,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeycloakUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,

    username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    email_verified: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,

    #[serde(default, skip_serializing)]
    created_timestamp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    credentials: Option<Vec<KeycloakCredential>>,
}

#[async_trait::async_trait]
impl IdentityProvider for KeycloakConnection {
    #[tracing::instrument(
        name = "idp.check_connectivity",
        skip_all,
        fields(idp.realm = self.realm),
        err(Debug),
    )]
    async fn check_connectivity(&self) -> Result<(), anyhow::Error> {
        let response = self
            .send(Method::GET, "users/count", |r| r)
            .await
            .context("Failed to reach Keycloak")?;

        response
            .error_for_keycloak_error()
            .await
            .context("Unexpected HTTP response while checking Keycloak connectivity")?;

        Ok(())
    }

    #[tracing::instrument(
        name = "idp.list_identities",
        skip_all,
        fields(idp.realm = self.realm),
        err(Debug),
    )]
    async fn list_identities(&self) -> Result<Vec<Identity>, anyhow::Error> {
        let mut identities = Vec::new();
        let mut first = 0;

        loop {
            let query = [("first", first.to_string()), ("max", PAGE_SIZE.to_string())];
            let response = self
                .send(Method::GET, "users", |r| r.query(&query))
                .await
                .context("Failed to list users from Keycloak")?;

            let response = response
                .error_for_keycloak_error()
                .await
                .context("Unexpected HTTP response while listing users from Keycloak")?;

            let page: Vec<KeycloakUser> = response
                .json()
                .await
                .context("Failed to deserialize response while listing users from Keycloak")?;

            let len = page.len();
            for user in page {
                match self.to_identity(user) {
                    Ok(identity) => identities.push(identity),
                    Err(e) => warn!(
                        error = &*e as &dyn std::error::Error,
                        "Skipping user while listing users from Keycloak"
                    ),
                }
            }

            if len < PAGE_SIZE {
                break;
            }
            first += len;
        }

        Ok(identities)
    }

    #[tracing::instrument(
        name = "idp.get_identity",
        skip_all,
        fields(idp.realm = self.realm, user.id = id),
        err(Debug),
    )]
    async fn get_identity(&self, id: &str) -> Result<Option<Identity>, anyhow::Error> {
        let encoded_id = urlencoding::encode(id);
        let response = self
            .send(Method::GET, &format!("users/{encoded_id}"), |r| r)
            .await
            .context("Failed to query user from Keycloak")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response
            .error_for_keycloak_error()
            .await
            .context("Unexpected HTTP response while querying user from Keycloak")?;

        let user: KeycloakUser = response
            .json()
            .await
            .context("Failed to deserialize response while querying user from Keycloak")?;

        Ok(Some(self.to_identity(user)?))
    }

    #[tracing::instrument(
        name = "idp.create_identity",
        skip_all,
        fields(idp.realm = self.realm, user.username = identity.username),
        err(Debug),
    )]
    async fn create_identity(&self, identity: &NewIdentity) -> Result<String, anyhow::Error> {
        let body = KeycloakUser {
            username: identity.username.clone(),
            email: Some(identity.email.clone()),
            email_verified: Some(true),
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
            enabled: Some(true),
            credentials: identity.password.as_ref().map(|password| {
                vec![KeycloakCredential {
                    kind: "password".to_owned(),
                    value: password.clone(),
                    temporary: false,
                }]
            }),
            ..KeycloakUser::default()
        };

        let response = self
            .send(Method::POST, "users", |r| r.json(&body))
            .await
            .context("Failed to create user in Keycloak")?;

        if response.status() == StatusCode::CONFLICT {
            return Err(BackendError::from_status(
                StatusCode::CONFLICT.as_u16(),
                "username or email already exists",
            )
            .into());
        }

        let response = response
            .error_for_keycloak_error()
            .await
            .context("Unexpected HTTP response while creating user in Keycloak")?;

        if response.status() != StatusCode::CREATED {
            bail!(
                "Unexpected HTTP code while creating user in Keycloak: {}",
                response.status()
            );
        }

        // The ID of the new user is the last segment of the Location header
        let id = response
            .headers()
            .get(LOCATION)
            .and_then(|location| location.to_str().ok())
            .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
            .filter(|id| !id.is_empty())
            .context("Keycloak did not return the location of the new user")?;

        Ok(id.to_owned())
    }

    #[tracing::instrument(
        name = "idp.delete_identity",
        skip_all,
        fields(idp.realm = self.realm, user.id = id),
        err(Debug),
    )]
    async fn delete_identity(&self, id: &str) -> Result<bool, anyhow::Error> {
        let encoded_id = urlencoding::encode(id);
        let response = self
            .send(Method::DELETE, &format!("users/{encoded_id}"), |r| r)
            .await
            .context("Failed to delete user in Keycloak")?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("User was already deleted");
            return Ok(false);
        }

        response
            .error_for_keycloak_error()
            .await
            .context("Unexpected HTTP response while deleting user in Keycloak")?;

        Ok(true)
    }

    #[tracing::instrument(
        name = "idp.logout_sessions",
        skip_all,
        fields(idp.realm = self.realm, user.id = id),
        err(Debug),
    )]
    async fn logout_sessions(&self, id: &str) -> Result<(), anyhow::Error> {
        let encoded_id = urlencoding::encode(id);
        let response = self
            .send(Method::POST, &format!("users/{encoded_id}/logout"), |r| r)
            .await
            .context("Failed to end the sessions of user in Keycloak")?;

        response
            .error_for_keycloak_error()
            .await
            .context("Unexpected HTTP response while ending the sessions of user in Keycloak")?;

        Ok(())
    }
}
