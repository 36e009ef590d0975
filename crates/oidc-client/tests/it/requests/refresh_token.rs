// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use ephemera_oidc_client::requests::refresh_token::refresh_access_token;
use oauth2_types::requests::AccessTokenResponse;
use url::Url;
use wiremock::{
    Mock, Request, ResponseTemplate,
    matchers::{method, path},
};

use crate::{
    ACCESS_TOKEN, AuthMethod, CLIENT_ID, REFRESH_TOKEN, client_credentials, form_body, init_test,
};

#[tokio::test]
async fn pass_refresh_access_token() {
    let (http_client, mock_server, issuer) = init_test().await;
    let client_credentials = client_credentials(AuthMethod::None);
    let token_endpoint = issuer.join("token").unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(|req: &Request| {
            let query_pairs = form_body(req);

            if query_pairs.get("grant_type").map(String::as_str) != Some("refresh_token") {
                println!("Wrong or missing grant type");
                return false;
            }
            if query_pairs.get("refresh_token").map(String::as_str) != Some(REFRESH_TOKEN) {
                println!("Wrong or missing refresh token");
                return false;
            }
            if query_pairs.get("client_id").map(String::as_str) != Some(CLIENT_ID) {
                println!("Wrong or missing client ID");
                return false;
            }

            true
        })
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(AccessTokenResponse::new(ACCESS_TOKEN.to_owned())),
        )
        .mount(&mock_server)
        .await;

    let response = refresh_access_token(
        &http_client,
        &client_credentials,
        &token_endpoint,
        REFRESH_TOKEN.to_owned(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(response.access_token, ACCESS_TOKEN);
    assert_eq!(response.refresh_token, None);
    assert_eq!(response.id_token, None);
}

#[tokio::test]
async fn refresh_against_unreachable_endpoint() {
    let (http_client, _mock_server, _issuer) = init_test().await;
    let client_credentials = client_credentials(AuthMethod::None);

    // Grab a free port, and make sure nothing listens on it anymore
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let token_endpoint = Url::parse(&format!("http://{addr}/token")).unwrap();

    let error = refresh_access_token(
        &http_client,
        &client_credentials,
        &token_endpoint,
        REFRESH_TOKEN.to_owned(),
        None,
    )
    .await
    .unwrap_err();

    assert!(error.is_network());
    assert!(!error.is_credentials_rejected());
}
