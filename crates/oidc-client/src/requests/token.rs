// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Requests for the Token endpoint.

use ephemera_http::RequestBuilderExt;
use oauth2_types::{
    errors::ClientError,
    requests::{AccessTokenRequest, AccessTokenResponse},
};
use url::Url;

use crate::{error::TokenRequestError, types::client_credentials::ClientCredentials};

/// Request an access token.
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
/// * `request` - The request to make at the Token endpoint.
///
/// # Errors
///
/// Returns an error if the request fails or the response is invalid.
#[tracing::instrument(
    skip_all,
    fields(
        %token_endpoint,
        grant_type = request.grant_type(),
        client_id = client_credentials.client_id(),
    ),
)]
pub async fn request_access_token(
    http_client: &reqwest::Client,
    client_credentials: &ClientCredentials,
    token_endpoint: &Url,
    request: AccessTokenRequest,
) -> Result<AccessTokenResponse, TokenRequestError> {
    tracing::debug!(?request, "Requesting access token...");

    let response = client_credentials
        .authenticated_form(http_client.post(token_endpoint.as_str()), &request)
        .send_traced()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await?;
        let error = serde_json::from_slice::<ClientError>(&body).ok();
        tracing::debug!(%status, ?error, "Token endpoint returned an error");
        return Err(TokenRequestError::Endpoint { status, error });
    }

    let token_response = response.json().await?;

    Ok(token_response)
}
