// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use assert_matches::assert_matches;
use chrono::Duration;
use ephemera_oidc_client::{
    error::TokenRequestError, requests::password::access_token_with_password,
};
use oauth2_types::{
    errors::{ClientError, ClientErrorCode},
    requests::AccessTokenResponse,
};
use wiremock::{
    Mock, Request, ResponseTemplate,
    matchers::{method, path},
};

use crate::{
    ACCESS_TOKEN, AuthMethod, CLIENT_ID, CLIENT_SECRET, PASSWORD, REFRESH_TOKEN, USERNAME,
    client_credentials, form_body, init_test,
};

#[tokio::test]
async fn pass_access_token_with_password() {
    let (http_client, mock_server, issuer) = init_test().await;
    let client_credentials = client_credentials(AuthMethod::ClientSecretPost);
    let token_endpoint = issuer.join("token").unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(|req: &Request| {
            let query_pairs = form_body(req);

            if query_pairs.get("grant_type").map(String::as_str) != Some("password") {
                println!("Wrong or missing grant type");
                return false;
            }
            if query_pairs.get("username").map(String::as_str) != Some(USERNAME) {
                println!("Wrong or missing username");
                return false;
            }
            if query_pairs.get("password").map(String::as_str) != Some(PASSWORD) {
                println!("Wrong or missing password");
                return false;
            }
            if query_pairs.get("scope").map(String::as_str) != Some("openid email") {
                println!("Wrong or missing scope");
                return false;
            }
            if query_pairs.get("client_id").map(String::as_str) != Some(CLIENT_ID) {
                println!("Wrong or missing client ID");
                return false;
            }
            if query_pairs.get("client_secret").map(String::as_str) != Some(CLIENT_SECRET) {
                println!("Wrong or missing client secret");
                return false;
            }

            true
        })
        .respond_with(
            ResponseTemplate::new(200).set_body_json(
                AccessTokenResponse::new(ACCESS_TOKEN.to_owned())
                    .with_refresh_token(REFRESH_TOKEN.to_owned())
                    .with_expires_in(Duration::seconds(300)),
            ),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = access_token_with_password(
        &http_client,
        &client_credentials,
        &token_endpoint,
        USERNAME,
        PASSWORD,
        Some("openid email".to_owned()),
    )
    .await
    .unwrap();

    assert_eq!(response.access_token, ACCESS_TOKEN);
    assert_eq!(response.refresh_token.as_deref(), Some(REFRESH_TOKEN));
    assert_eq!(response.expires_in, Some(Duration::seconds(300)));
}

#[tokio::test]
async fn fail_access_token_with_wrong_password() {
    let (http_client, mock_server, issuer) = init_test().await;
    let client_credentials = client_credentials(AuthMethod::None);
    let token_endpoint = issuer.join("token").unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(
                ClientError::new(ClientErrorCode::InvalidGrant)
                    .with_description("Invalid user credentials".to_owned()),
            ),
        )
        .mount(&mock_server)
        .await;

    let error = access_token_with_password(
        &http_client,
        &client_credentials,
        &token_endpoint,
        USERNAME,
        "wrong",
        None,
    )
    .await
    .unwrap_err();

    assert!(error.is_credentials_rejected());
    assert!(!error.is_network());
    assert_matches!(
        error,
        TokenRequestError::Endpoint {
            status,
            error: Some(ClientError {
                error: ClientErrorCode::InvalidGrant,
                ..
            }),
        } if status == 401
    );
}

#[tokio::test]
async fn fail_access_token_with_unparsable_error() {
    let (http_client, mock_server, issuer) = init_test().await;
    let client_credentials = client_credentials(AuthMethod::None);
    let token_endpoint = issuer.join("token").unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&mock_server)
        .await;

    let error = access_token_with_password(
        &http_client,
        &client_credentials,
        &token_endpoint,
        USERNAME,
        PASSWORD,
        None,
    )
    .await
    .unwrap_err();

    assert!(!error.is_credentials_rejected());
    assert_matches!(error, TokenRequestError::Endpoint { error: None, .. });
}
