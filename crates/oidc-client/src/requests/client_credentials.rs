// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Requests for the [Client Credentials flow].
//!
//! [Client Credentials flow]: https://www.rfc-editor.org/rfc/rfc6749#section-4.4

use oauth2_types::requests::{AccessTokenRequest, AccessTokenResponse, ClientCredentialsGrant};
use url::Url;

use crate::{
    error::TokenRequestError, requests::token::request_access_token,
    types::client_credentials::ClientCredentials,
};

/// Request an access token on behalf of the client itself.
///
/// # Arguments
///
/// * `http_client` - The reqwest client to use for making HTTP requests.
///
/// * `client_credentials` - The credentials obtained when registering the
///   client.
///
/// * `token_endpoint` - The URL of the issuer's Token endpoint.
///
/// * `scope` - The scope to authorize.
///
/// # Errors
///
/// Returns an error if the request fails or the response is invalid.
#[tracing::instrument(skip_all, fields(%token_endpoint))]
pub async fn access_token_with_client_credentials(
    http_client: &reqwest::Client,
    client_credentials: &ClientCredentials,
    token_endpoint: &Url,
    scope: Option<String>,
) -> Result<AccessTokenResponse, TokenRequestError> {
    tracing::debug!("Requesting access token with client credentials...");

    request_access_token(
        http_client,
        client_credentials,
        token_endpoint,
        AccessTokenRequest::ClientCredentials(ClientCredentialsGrant { scope }),
    )
    .await
}
