// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use ephemera_oidc_client::requests::client_credentials::access_token_with_client_credentials;
use oauth2_types::requests::AccessTokenResponse;
use wiremock::{
    Mock, Request, ResponseTemplate,
    matchers::{method, path},
};

use crate::{
    ACCESS_TOKEN, AuthMethod, CLIENT_ID, CLIENT_SECRET, client_credentials, form_body, init_test,
};

#[tokio::test]
async fn pass_access_token_with_client_credentials() {
    let (http_client, mock_server, issuer) = init_test().await;
    let client_credentials = client_credentials(AuthMethod::ClientSecretPost);
    let token_endpoint = issuer.join("token").unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(|req: &Request| {
            let query_pairs = form_body(req);

            if query_pairs.get("grant_type").map(String::as_str) != Some("client_credentials") {
                println!("Wrong or missing grant type");
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
            if query_pairs.contains_key("scope") {
                println!("Unexpected scope");
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

    let response = access_token_with_client_credentials(
        &http_client,
        &client_credentials,
        &token_endpoint,
        None,
    )
    .await
    .unwrap();

    assert_eq!(response.access_token, ACCESS_TOKEN);
    assert_eq!(response.refresh_token, None);
}
