// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Mailbox pre-deployment for mail backends which only create principals
//! once they see an identity authenticate.
//!
//! The protocol gets an access token for the mail backend's OIDC client,
//! authenticates against the submission server with it, then waits for the
//! mail backend to materialize the principal:
//!
//! ```text
//! TokenExchangeRequested -> TokenExchanged -> HandshakeAttempted
//!     -> DiscoveryPending -> Discovered | DiscoveryFailed
//! ```

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ephemera_backends::{BackendError, MailAdmin, MailBackend, MailboxVerification};
use ephemera_data_model::{DiscoveryState, InvalidTransitionError, Principal};
use ephemera_oidc_client::{
    error::TokenRequestError,
    requests::{password::access_token_with_password, token_exchange::exchange_access_token},
    types::client_credentials::ClientCredentials,
};
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::smtp::{Handshake, HandshakeOutcome};

/// How long to leave the mail backend to cache a discovered principal
pub const DEFAULT_DISCOVERY_DELAY: Duration = Duration::from_secs(3);

const LISTING_DISCLAIMER: &str = "authentication succeeded, but the mail backend does not list \
                                  principals discovered over OIDC";

/// What the caller hands over to prove the identity.
#[derive(Clone)]
pub enum DiscoveryCredential {
    /// The password of the identity, used with the password grant
    Password(String),

    /// An access token of an existing session, exchanged for one scoped to
    /// the mail backend
    SessionToken(String),
}

impl std::fmt::Debug for DiscoveryCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(..)"),
            Self::SessionToken(_) => f.write_str("SessionToken(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub username: String,
    pub email: String,
    pub credential: DiscoveryCredential,
}

/// Something able to get an access token accepted by the mail backend.
#[async_trait]
pub trait MailTokenSource: Send + Sync {
    async fn mail_access_token(
        &self,
        username: &str,
        credential: &DiscoveryCredential,
    ) -> Result<String, TokenRequestError>;
}

/// Gets mail access tokens from the token endpoint of the identity provider.
pub struct OidcMailTokenSource {
    http_client: reqwest::Client,
    token_endpoint: Url,

    /// Our own client, allowed to exchange tokens
    app_client: ClientCredentials,

    /// The client the mail backend validates tokens for
    mail_client: ClientCredentials,
}

impl OidcMailTokenSource {
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        token_endpoint: Url,
        app_client: ClientCredentials,
        mail_client: ClientCredentials,
    ) -> Self {
        Self {
            http_client,
            token_endpoint,
            app_client,
            mail_client,
        }
    }
}

#[async_trait]
impl MailTokenSource for OidcMailTokenSource {
    async fn mail_access_token(
        &self,
        username: &str,
        credential: &DiscoveryCredential,
    ) -> Result<String, TokenRequestError> {
        let response = match credential {
            DiscoveryCredential::Password(password) => {
                access_token_with_password(
                    &self.http_client,
                    &self.mail_client,
                    &self.token_endpoint,
                    username,
                    password,
                    Some("openid email".to_owned()),
                )
                .await?
            }

            DiscoveryCredential::SessionToken(token) => {
                exchange_access_token(
                    &self.http_client,
                    &self.app_client,
                    &self.token_endpoint,
                    token.clone(),
                    self.mail_client.client_id(),
                )
                .await?
            }
        };

        Ok(response.access_token)
    }
}

/// The terminal result of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DiscoveryResult {
    Discovered {
        principal: Option<Principal>,
        note: Option<String>,
    },

    DiscoveryFailed {
        handshake_error: Option<String>,
        verification_error: Option<String>,
        auth_succeeded: bool,
    },
}

impl DiscoveryResult {
    #[must_use]
    pub fn is_discovered(&self) -> bool {
        matches!(self, Self::Discovered { .. })
    }

    /// A human readable summary
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Discovered {
                principal: Some(principal),
                note: None,
            } => format!("mailbox discovered as {}", principal.name),
            Self::Discovered {
                principal: Some(principal),
                note: Some(note),
            } => format!("mailbox available as {} ({note})", principal.name),
            Self::Discovered {
                principal: None,
                note,
            } => note.clone().unwrap_or_else(|| "mailbox discovered".to_owned()),
            Self::DiscoveryFailed {
                verification_error,
                auth_succeeded: true,
                ..
            } => format!(
                "authentication succeeded but the mailbox is not visible yet: {}",
                verification_error.as_deref().unwrap_or("unknown error")
            ),
            Self::DiscoveryFailed {
                handshake_error,
                verification_error,
                auth_succeeded: false,
            } => format!(
                "authentication failed: {}",
                handshake_error
                    .as_deref()
                    .or(verification_error.as_deref())
                    .unwrap_or("unknown error")
            ),
        }
    }
}

/// The result of a run, with the states it went through.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub result: DiscoveryResult,
    pub trail: Vec<DiscoveryState>,
    pub handshake: Option<HandshakeOutcome>,
}

struct Trail {
    states: Vec<DiscoveryState>,
    current: DiscoveryState,
    handshake: Option<HandshakeOutcome>,
}

impl Trail {
    fn new() -> Self {
        let current = DiscoveryState::default();
        Self {
            states: vec![current],
            current,
            handshake: None,
        }
    }

    fn advance(
        &mut self,
        step: fn(DiscoveryState) -> Result<DiscoveryState, InvalidTransitionError>,
    ) -> Result<(), InvalidTransitionError> {
        self.current = step(self.current)?;
        self.states.push(self.current);
        Ok(())
    }
}

/// Runs the discovery protocol against a mail backend.
pub struct PreDeploy {
    tokens: Arc<dyn MailTokenSource>,
    handshake: Arc<dyn Handshake>,
    mail: Arc<dyn MailBackend>,
    admin: Arc<dyn MailAdmin>,
    delay: Duration,
}

impl PreDeploy {
    #[must_use]
    pub fn new(
        tokens: Arc<dyn MailTokenSource>,
        handshake: Arc<dyn Handshake>,
        mail: Arc<dyn MailBackend>,
        admin: Arc<dyn MailAdmin>,
    ) -> Self {
        Self {
            tokens,
            handshake,
            mail,
            admin,
            delay: DEFAULT_DISCOVERY_DELAY,
        }
    }

    /// Set how long to wait between the handshake and the verification
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run the protocol for an identity. Never fails: failures are described
    /// by the returned report.
    #[tracing::instrument(
        name = "mail.predeploy",
        skip_all,
        fields(user.username = request.username, user.email = request.email),
    )]
    pub async fn run(&self, request: &DiscoveryRequest) -> DiscoveryReport {
        let mut trail = Trail::new();

        let result = match self.drive(&mut trail, request).await {
            Ok(result) => result,
            Err(InvalidTransitionError) => DiscoveryResult::DiscoveryFailed {
                handshake_error: None,
                verification_error: Some("invalid state transition".to_owned()),
                auth_succeeded: false,
            },
        };

        if !result.is_discovered() {
            if let Ok(state) = trail.current.failed() {
                trail.current = state;
                trail.states.push(state);
            }
        }

        info!(
            discovered = result.is_discovered(),
            trail = ?trail.states,
            "Mailbox discovery finished"
        );

        DiscoveryReport {
            result,
            trail: trail.states,
            handshake: trail.handshake,
        }
    }

    async fn drive(
        &self,
        trail: &mut Trail,
        request: &DiscoveryRequest,
    ) -> Result<DiscoveryResult, InvalidTransitionError> {
        let access_token = match self
            .tokens
            .mail_access_token(&request.username, &request.credential)
            .await
        {
            Ok(token) => token,
            Err(error) => {
                warn!(error = &error as &dyn std::error::Error, "Token exchange failed");
                return Ok(DiscoveryResult::DiscoveryFailed {
                    handshake_error: Some(format!("token exchange failed: {error}")),
                    verification_error: None,
                    auth_succeeded: false,
                });
            }
        };
        trail.advance(DiscoveryState::exchanged)?;

        let outcome = self
            .handshake
            .handshake(&request.username, &access_token)
            .await;
        trail.advance(DiscoveryState::handshake_attempted)?;
        trail.handshake = Some(outcome.clone());

        if outcome.is_fatal() {
            // The mail backend never saw the identity, there is nothing to wait for
            return Ok(DiscoveryResult::DiscoveryFailed {
                handshake_error: outcome.error().map(str::to_owned),
                verification_error: None,
                auth_succeeded: false,
            });
        }

        trail.advance(DiscoveryState::pending)?;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut verification = self.mail.verify_mailbox_exists(&request.email).await;
        if !verification.is_usable() {
            verification = self.mail.verify_mailbox_exists(&request.username).await;
        }

        if let MailboxVerification::Exists { principal } = verification {
            trail.advance(DiscoveryState::discovered)?;
            return Ok(DiscoveryResult::Discovered {
                principal: Some(principal),
                note: None,
            });
        }

        let verification_error = verification.failure();

        if !outcome.is_success() {
            return Ok(DiscoveryResult::DiscoveryFailed {
                handshake_error: outcome.error().map(str::to_owned),
                verification_error,
                auth_succeeded: false,
            });
        }

        // Authentication went through, so the principal should exist. Try to
        // create it once before giving up.
        let principal = Principal::individual(request.username.clone(), request.email.clone());
        match self.admin.create_principal(&principal).await {
            Ok(id) => {
                trail.advance(DiscoveryState::discovered)?;
                Ok(DiscoveryResult::Discovered {
                    principal: Some(Principal { id, ..principal }),
                    note: Some("created explicitly after authenticating".to_owned()),
                })
            }

            Err(error) if is_already_exists(&error) => {
                trail.advance(DiscoveryState::discovered)?;
                Ok(DiscoveryResult::Discovered {
                    principal: None,
                    note: Some(LISTING_DISCLAIMER.to_owned()),
                })
            }

            Err(error) => Ok(DiscoveryResult::DiscoveryFailed {
                handshake_error: None,
                verification_error: Some(format!(
                    "{}; fallback creation failed: {error:#}",
                    verification_error.as_deref().unwrap_or("mailbox not found")
                )),
                auth_succeeded: true,
            }),
        }
    }
}

fn is_already_exists(error: &anyhow::Error) -> bool {
    BackendError::status_of(error) == Some(409)
        || format!("{error:#}").contains("fieldAlreadyExists")
}
