// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Requests and responses of the Token endpoint.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as, skip_serializing_none};

/// The type of a token, as used by the [token exchange] grant.
///
/// [token exchange]: https://www.rfc-editor.org/rfc/rfc8693#section-3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenTypeIdentifier {
    /// An OAuth 2.0 access token.
    #[serde(rename = "urn:ietf:params:oauth:token-type:access_token")]
    AccessToken,

    /// An OAuth 2.0 refresh token.
    #[serde(rename = "urn:ietf:params:oauth:token-type:refresh_token")]
    RefreshToken,

    /// An OpenID Connect ID Token.
    #[serde(rename = "urn:ietf:params:oauth:token-type:id_token")]
    IdToken,
}

/// A [Resource Owner Password Credentials] grant.
///
/// [Resource Owner Password Credentials]: https://www.rfc-editor.org/rfc/rfc6749#section-4.3
#[skip_serializing_none]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordGrant {
    /// The username of the resource owner.
    pub username: String,

    /// The password of the resource owner.
    pub password: String,

    /// The space-separated scope to request.
    pub scope: Option<String>,
}

impl std::fmt::Debug for PasswordGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordGrant")
            .field("username", &self.username)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A [refresh token grant].
///
/// [refresh token grant]: https://www.rfc-editor.org/rfc/rfc6749#section-6
#[skip_serializing_none]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenGrant {
    /// The refresh token issued to the client.
    pub refresh_token: String,

    /// The scope of the access request.
    ///
    /// Must not include any scope not originally granted. If omitted, it is
    /// treated as equal to the scope originally granted.
    pub scope: Option<String>,
}

impl std::fmt::Debug for RefreshTokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenGrant")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A [client credentials grant].
///
/// [client credentials grant]: https://www.rfc-editor.org/rfc/rfc6749#section-4.4
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentialsGrant {
    /// The scope of the access request.
    pub scope: Option<String>,
}

/// A [token exchange grant].
///
/// Used to turn a token issued for one client into a token scoped to another
/// audience, without prompting the user again.
///
/// [token exchange grant]: https://www.rfc-editor.org/rfc/rfc8693#section-2.1
#[skip_serializing_none]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExchangeGrant {
    /// The token that represents the identity on whose behalf the request is
    /// made.
    pub subject_token: String,

    /// The type of `subject_token`.
    pub subject_token_type: TokenTypeIdentifier,

    /// The type of token requested.
    pub requested_token_type: Option<TokenTypeIdentifier>,

    /// The client the requested token is meant for.
    pub audience: Option<String>,

    /// The scope of the requested token.
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenExchangeGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeGrant")
            .field("subject_token_type", &self.subject_token_type)
            .field("requested_token_type", &self.requested_token_type)
            .field("audience", &self.audience)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// An request at the Token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "grant_type")]
pub enum AccessTokenRequest {
    /// A resource owner password grant.
    #[serde(rename = "password")]
    Password(PasswordGrant),

    /// A refresh token grant.
    #[serde(rename = "refresh_token")]
    RefreshToken(RefreshTokenGrant),

    /// A client credentials grant.
    #[serde(rename = "client_credentials")]
    ClientCredentials(ClientCredentialsGrant),

    /// A token exchange grant.
    #[serde(rename = "urn:ietf:params:oauth:grant-type:token-exchange")]
    TokenExchange(TokenExchangeGrant),
}

impl AccessTokenRequest {
    /// The value of the `grant_type` parameter for this request.
    #[must_use]
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::RefreshToken(_) => "refresh_token",
            Self::ClientCredentials(_) => "client_credentials",
            Self::TokenExchange(_) => "urn:ietf:params:oauth:grant-type:token-exchange",
        }
    }
}

fn default_token_type() -> String {
    "Bearer".to_owned()
}

/// A successful response from the Token endpoint.
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    /// The access token to access the requested scope.
    pub access_token: String,

    /// The token to refresh the access token when it expires.
    pub refresh_token: Option<String>,

    /// ID Token value associated with the authenticated session.
    pub id_token: Option<String>,

    /// The type of the access token, almost always `Bearer`.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// The duration for which the access token is valid.
    #[serde_as(as = "Option<DurationSeconds<i64>>")]
    pub expires_in: Option<Duration>,

    /// The scope of the access token.
    pub scope: Option<String>,

    /// The type of the issued token, only set by the token exchange grant.
    pub issued_token_type: Option<TokenTypeIdentifier>,
}

impl AccessTokenResponse {
    /// Creates a new `Bearer` response with the given access token.
    #[must_use]
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            refresh_token: None,
            id_token: None,
            token_type: default_token_type(),
            expires_in: None,
            scope: None,
            issued_token_type: None,
        }
    }

    /// Adds a refresh token to the response.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: String) -> Self {
        self.refresh_token = Some(refresh_token);
        self
    }

    /// Adds an ID Token to the response.
    #[must_use]
    pub fn with_id_token(mut self, id_token: String) -> Self {
        self.id_token = Some(id_token);
        self
    }

    /// Adds an expiration duration to the response.
    #[must_use]
    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }
}

impl std::fmt::Debug for AccessTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("issued_token_type", &self.issued_token_type)
            .finish_non_exhaustive()
    }
}
