// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use ephemera_oidc_client::requests::token_exchange::exchange_access_token;
use oauth2_types::requests::{AccessTokenResponse, TokenTypeIdentifier};
use wiremock::{
    Mock, Request, ResponseTemplate,
    matchers::{method, path},
};

use crate::{ACCESS_TOKEN, AuthMethod, client_credentials, form_body, init_test};

const SUBJECT_TOKEN: &str = "SubjectToken1";
const AUDIENCE: &str = "stalwart";

#[tokio::test]
async fn pass_exchange_access_token() {
    let (http_client, mock_server, issuer) = init_test().await;
    let client_credentials = client_credentials(AuthMethod::ClientSecretBasic);
    let token_endpoint = issuer.join("token").unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(|req: &Request| {
            let query_pairs = form_body(req);

            if query_pairs.get("grant_type").map(String::as_str)
                != Some("urn:ietf:params:oauth:grant-type:token-exchange")
            {
                println!("Wrong or missing grant type");
                return false;
            }
            if query_pairs.get("subject_token").map(String::as_str) != Some(SUBJECT_TOKEN) {
                println!("Wrong or missing subject token");
                return false;
            }
            if query_pairs.get("subject_token_type").map(String::as_str)
                != Some("urn:ietf:params:oauth:token-type:access_token")
            {
                println!("Wrong or missing subject token type");
                return false;
            }
            if query_pairs.get("audience").map(String::as_str) != Some(AUDIENCE) {
                println!("Wrong or missing audience");
                return false;
            }
            if query_pairs.contains_key("client_secret") {
                println!("Client secret should be in the Authorization header");
                return false;
            }

            true
        })
        .respond_with(ResponseTemplate::new(200).set_body_json({
            let mut response = AccessTokenResponse::new(ACCESS_TOKEN.to_owned());
            response.issued_token_type = Some(TokenTypeIdentifier::AccessToken);
            response
        }))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = exchange_access_token(
        &http_client,
        &client_credentials,
        &token_endpoint,
        SUBJECT_TOKEN.to_owned(),
        AUDIENCE,
    )
    .await
    .unwrap();

    assert_eq!(response.access_token, ACCESS_TOKEN);
    assert_eq!(
        response.issued_token_type,
        Some(TokenTypeIdentifier::AccessToken)
    );
}
