// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::collections::HashMap;

use ephemera_oidc_client::types::client_credentials::ClientCredentials;
use ephemera_stalwart::predeploy::{DiscoveryCredential, MailTokenSource, OidcMailTokenSource};
use oauth2_types::requests::AccessTokenResponse;
use wiremock::{
    Mock, Request, ResponseTemplate,
    matchers::{header, method, path},
};

use crate::init_test;

const MAIL_CLIENT_ID: &str = "stalwart";
const APP_CLIENT_ID: &str = "ephemera";
const APP_CLIENT_SECRET: &str = "app-secret";

fn form_body(req: &Request) -> HashMap<String, String> {
    form_urlencoded::parse(&req.body)
        .into_owned()
        .collect::<HashMap<_, _>>()
}

async fn token_source() -> (wiremock::MockServer, OidcMailTokenSource) {
    let (http_client, mock_server, issuer) = init_test().await;
    let token_endpoint = issuer.join("realms/demo/protocol/openid-connect/token").unwrap();

    let source = OidcMailTokenSource::new(
        http_client,
        token_endpoint,
        ClientCredentials::ClientSecretPost {
            client_id: APP_CLIENT_ID.to_owned(),
            client_secret: APP_CLIENT_SECRET.to_owned(),
        },
        ClientCredentials::None {
            client_id: MAIL_CLIENT_ID.to_owned(),
        },
    );

    (mock_server, source)
}

#[tokio::test]
async fn test_password_uses_mail_client() {
    let (mock_server, source) = token_source().await;

    Mock::given(method("POST"))
        .and(path("/realms/demo/protocol/openid-connect/token"))
        .and(|req: &Request| {
            let form = form_body(req);
            form.get("grant_type").map(String::as_str) == Some("password")
                && form.get("client_id").map(String::as_str) == Some(MAIL_CLIENT_ID)
                && form.get("username").map(String::as_str) == Some("demo")
                && form.get("password").map(String::as_str) == Some("hunter2")
                && form.get("scope").map(String::as_str) == Some("openid email")
        })
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(AccessTokenResponse::new("MailToken".to_owned())),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let token = source
        .mail_access_token("demo", &DiscoveryCredential::Password("hunter2".to_owned()))
        .await
        .unwrap();

    assert_eq!(token, "MailToken");
}

#[tokio::test]
async fn test_session_token_is_exchanged_for_the_mail_audience() {
    let (mock_server, source) = token_source().await;

    Mock::given(method("POST"))
        .and(path("/realms/demo/protocol/openid-connect/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(|req: &Request| {
            let form = form_body(req);
            form.get("grant_type").map(String::as_str)
                == Some("urn:ietf:params:oauth:grant-type:token-exchange")
                && form.get("client_id").map(String::as_str) == Some(APP_CLIENT_ID)
                && form.get("client_secret").map(String::as_str) == Some(APP_CLIENT_SECRET)
                && form.get("subject_token").map(String::as_str) == Some("SessionToken")
                && form.get("audience").map(String::as_str) == Some(MAIL_CLIENT_ID)
        })
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(AccessTokenResponse::new("ExchangedToken".to_owned())),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let token = source
        .mail_access_token(
            "demo",
            &DiscoveryCredential::SessionToken("SessionToken".to_owned()),
        )
        .await
        .unwrap();

    assert_eq!(token, "ExchangedToken");
}

#[tokio::test]
async fn test_rejected_password() {
    let (mock_server, source) = token_source().await;

    Mock::given(method("POST"))
        .and(path("/realms/demo/protocol/openid-connect/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Invalid user credentials",
        })))
        .mount(&mock_server)
        .await;

    let error = source
        .mail_access_token("demo", &DiscoveryCredential::Password("wrong".to_owned()))
        .await
        .unwrap_err();

    assert!(error.is_credentials_rejected(), "{error:?}");
}
