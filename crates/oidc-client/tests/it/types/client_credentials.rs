// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use ephemera_oidc_client::requests::client_credentials::access_token_with_client_credentials;
use oauth2_types::requests::AccessTokenResponse;
use wiremock::{
    Mock, Request, ResponseTemplate,
    matchers::{basic_auth, method, path},
};

use crate::{
    ACCESS_TOKEN, AuthMethod, CLIENT_ID, CLIENT_SECRET, client_credentials, form_body, init_test,
};

#[tokio::test]
async fn pass_none() {
    let (http_client, mock_server, issuer) = init_test().await;
    let client_credentials = client_credentials(AuthMethod::None);
    let token_endpoint = issuer.join("token").unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(|req: &Request| {
            let query_pairs = form_body(req);

            if query_pairs.get("client_id").map(String::as_str) != Some(CLIENT_ID) {
                println!("Wrong or missing client ID");
                return false;
            }
            if query_pairs.contains_key("client_secret") {
                println!("Public clients have no secret");
                return false;
            }

            true
        })
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(AccessTokenResponse::new(ACCESS_TOKEN.to_owned())),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    access_token_with_client_credentials(&http_client, &client_credentials, &token_endpoint, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn pass_client_secret_basic() {
    let (http_client, mock_server, issuer) = init_test().await;
    let client_credentials = client_credentials(AuthMethod::ClientSecretBasic);
    let token_endpoint = issuer.join("token").unwrap();

    // Both parts are form-urlencoded before being put in the header
    let username = form_urlencoded::byte_serialize(CLIENT_ID.as_bytes()).collect::<String>();
    let password = form_urlencoded::byte_serialize(CLIENT_SECRET.as_bytes()).collect::<String>();

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(basic_auth(username, password))
        .and(|req: &Request| !form_body(req).contains_key("client_id"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(AccessTokenResponse::new(ACCESS_TOKEN.to_owned())),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    access_token_with_client_credentials(&http_client, &client_credentials, &token_endpoint, None)
        .await
        .unwrap();
}

#[test]
fn debug_hides_secret() {
    let credentials = client_credentials(AuthMethod::ClientSecretPost);
    let debug = format!("{credentials:?}");
    assert!(debug.contains(CLIENT_ID));
    assert!(!debug.contains(CLIENT_SECRET));
}
