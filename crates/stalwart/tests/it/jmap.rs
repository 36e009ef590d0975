// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use ephemera_stalwart::JmapClient;
use serde_json::json;
use wiremock::{
    Mock, Request, ResponseTemplate,
    matchers::{bearer_token, method, path},
};

use crate::init_test;

const ACCESS_TOKEN: &str = "UserAccessToken";

#[tokio::test]
async fn test_unseen_count_sums_inboxes() {
    let (http_client, mock_server, base_url) = init_test().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/jmap"))
        .and(bearer_token(ACCESS_TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apiUrl": format!("{}/jmap/", mock_server.uri()),
            "primaryAccounts": {
                "urn:ietf:params:jmap:core": "b",
                "urn:ietf:params:jmap:mail": "b",
            },
            "username": "demo@demo.test",
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/jmap/"))
        .and(bearer_token(ACCESS_TOKEN))
        .and(|req: &Request| {
            let Ok(body) = req.body_json::<serde_json::Value>() else {
                return false;
            };
            body["methodCalls"][0][0] == "Mailbox/get" && body["methodCalls"][0][1]["accountId"] == "b"
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "methodResponses": [[
                "Mailbox/get",
                {
                    "accountId": "b",
                    "state": "1",
                    "list": [
                        {"id": "a", "role": "inbox", "unreadEmails": 3},
                        {"id": "b", "role": "junk", "unreadEmails": 12},
                        {"id": "c", "role": null, "unreadEmails": 4},
                        {"id": "d", "role": "inbox", "unreadEmails": 1},
                    ],
                    "notFound": [],
                },
                "0",
            ]],
            "sessionState": "abc",
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = JmapClient::new(&base_url, http_client).unwrap();
    let unseen = client
        .unseen_count("demo@demo.test", ACCESS_TOKEN)
        .await
        .unwrap();

    assert_eq!(unseen, 4);
}

#[tokio::test]
async fn test_unseen_count_method_error() {
    let (http_client, mock_server, base_url) = init_test().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/jmap"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apiUrl": format!("{}/jmap/", mock_server.uri()),
            "primaryAccounts": {"urn:ietf:params:jmap:mail": "b"},
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/jmap/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "methodResponses": [["error", {"type": "accountNotFound"}, "0"]],
        })))
        .mount(&mock_server)
        .await;

    let client = JmapClient::new(&base_url, http_client).unwrap();
    let error = client
        .unseen_count("demo@demo.test", ACCESS_TOKEN)
        .await
        .unwrap_err();

    assert!(error.to_string().contains("accountNotFound"), "{error}");
}

#[tokio::test]
async fn test_unseen_count_rejected_token() {
    let (http_client, mock_server, base_url) = init_test().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/jmap"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let client = JmapClient::new(&base_url, http_client).unwrap();
    let result = client.unseen_count("demo@demo.test", "wrong").await;
    assert!(result.is_err());
}
