// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Requests for the [Resource Owner Password Credentials] grant.
//!
//! [Resource Owner Password Credentials]: https://www.rfc-editor.org/rfc/rfc6749#section-4.3

use oauth2_types::requests::{AccessTokenRequest, AccessTokenResponse, PasswordGrant};
use url::Url;

use crate::{
    error::TokenRequestError, requests::token::request_access_token,
    types::client_credentials::ClientCredentials,
};

/// Exchange the username and password of a user for an access token.
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
/// * `username` - The username of the user.
///
/// * `password` - The password of the user.
///
/// * `scope` - The space-separated scope to request.
///
/// # Errors
///
/// Returns an error if the request fails or the response is invalid.
#[tracing::instrument(skip_all, fields(%token_endpoint, %username))]
pub async fn access_token_with_password(
    http_client: &reqwest::Client,
    client_credentials: &ClientCredentials,
    token_endpoint: &Url,
    username: &str,
    password: &str,
    scope: Option<String>,
) -> Result<AccessTokenResponse, TokenRequestError> {
    tracing::debug!("Requesting access token with password...");

    request_access_token(
        http_client,
        client_credentials,
        token_endpoint,
        AccessTokenRequest::Password(PasswordGrant {
            username: username.to_owned(),
            password: password.to_owned(),
            scope,
        }),
    )
    .await
}
