// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Requests for the [Token Exchange] grant.
//!
//! [Token Exchange]: https://www.rfc-editor.org/rfc/rfc8693

use oauth2_types::requests::{
    AccessTokenRequest, AccessTokenResponse, TokenExchangeGrant, TokenTypeIdentifier,
};
use url::Url;

use crate::{
    error::TokenRequestError, requests::token::request_access_token,
    types::client_credentials::ClientCredentials,
};

/// Exchange an access token issued to this client for an access token meant
/// for another client of the same identity provider.
///
/// # Arguments
///
/// * `http_client` - The reqwest client to use for making HTTP requests.
///
/// * `client_credentials` - The credentials of the client doing the exchange.
///   Most identity providers require a confidential client here.
///
/// * `token_endpoint` - The URL of the issuer's Token endpoint.
///
/// * `subject_token` - The access token to exchange.
///
/// * `audience` - The client ID the new token is meant for.
///
/// # Errors
///
/// Returns an error if the request fails or the response is invalid.
#[tracing::instrument(skip_all, fields(%token_endpoint, %audience))]
pub async fn exchange_access_token(
    http_client: &reqwest::Client,
    client_credentials: &ClientCredentials,
    token_endpoint: &Url,
    subject_token: String,
    audience: &str,
) -> Result<AccessTokenResponse, TokenRequestError> {
    tracing::debug!("Exchanging access token...");

    request_access_token(
        http_client,
        client_credentials,
        token_endpoint,
        AccessTokenRequest::TokenExchange(TokenExchangeGrant {
            subject_token,
            subject_token_type: TokenTypeIdentifier::AccessToken,
            requested_token_type: Some(TokenTypeIdentifier::AccessToken),
            audience: Some(audience.to_owned()),
            scope: None,
        }),
    )
    .await
}
