// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use ephemera_oidc_client::{
    error::TokenRequestError, requests::refresh_token::refresh_access_token,
    types::client_credentials::ClientCredentials,
};
use oauth2_types::requests::AccessTokenResponse;
use url::Url;

/// Something able to redeem a refresh token
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str)
    -> Result<AccessTokenResponse, TokenRequestError>;
}

/// Redeems refresh tokens at the token endpoint of the identity provider
pub struct OidcTokenRefresher {
    http_client: reqwest::Client,
    credentials: ClientCredentials,
    token_endpoint: Url,
}

impl OidcTokenRefresher {
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        credentials: ClientCredentials,
        token_endpoint: Url,
    ) -> Self {
        Self {
            http_client,
            credentials,
            token_endpoint,
        }
    }
}

#[async_trait]
impl TokenRefresher for OidcTokenRefresher {
    async fn refresh(
        &self,
        refresh_token: &str,
    ) -> Result<AccessTokenResponse, TokenRequestError> {
        refresh_access_token(
            &self.http_client,
            &self.credentials,
            &self.token_endpoint,
            refresh_token.to_owned(),
            None,
        )
        .await
    }
}
