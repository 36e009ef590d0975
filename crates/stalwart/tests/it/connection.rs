// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use ephemera_backends::{
    BackendError, ErrorKind, MailAdmin, MailBackend, MailProviderKind, SettingsUpdate,
};
use ephemera_data_model::{Principal, PrincipalType};
use ephemera_stalwart::{JmapClient, MailProvider, MailServices, SmtpMode, SmtpSubmission};
use serde_json::json;
use std::sync::Arc;
use wiremock::{
    Mock, ResponseTemplate,
    matchers::{basic_auth, body_json, method, path},
};

use crate::{ADMIN_PASSWORD, ADMIN_USERNAME, stalwart_connection};

#[tokio::test]
async fn test_get_principal() {
    let (mock_server, connection) = stalwart_connection().await;

    Mock::given(method("GET"))
        .and(path("/api/principal/demo%40demo.test"))
        .and(basic_auth(ADMIN_USERNAME, ADMIN_PASSWORD))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "id": 42,
                "type": "individual",
                "name": "demo",
                "emails": ["demo@demo.test"],
                "quota": 0,
            }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/principal/missing%40demo.test"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "notFound",
            "item": "missing@demo.test",
        })))
        .mount(&mock_server)
        .await;

    let principal = connection
        .get_principal("demo@demo.test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(principal.id, Some(42));
    assert_eq!(principal.kind, PrincipalType::Individual);
    assert_eq!(principal.name, "demo");

    assert_eq!(
        connection.get_principal("missing@demo.test").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_get_principal_forbidden() {
    let (mock_server, connection) = stalwart_connection().await;

    Mock::given(method("GET"))
        .and(path("/api/principal/demo"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "forbidden",
            "details": "You are not allowed to do that",
        })))
        .mount(&mock_server)
        .await;

    let error = connection.get_principal("demo").await.unwrap_err();
    assert_eq!(ErrorKind::of(&error), ErrorKind::AuthenticationFailure);
    assert_eq!(BackendError::status_of(&error), Some(403));
    assert!(format!("{error:#}").contains("You are not allowed to do that"));
}

#[tokio::test]
async fn test_create_principal() {
    let (mock_server, connection) = stalwart_connection().await;

    Mock::given(method("POST"))
        .and(path("/api/principal"))
        .and(body_json(json!({
            "type": "individual",
            "name": "demo",
            "emails": ["demo@demo.test"],
            "description": "Ephemera demo mailbox",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": 7})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let id = connection
        .create_principal(&Principal::individual(
            "demo".to_owned(),
            "demo@demo.test".to_owned(),
        ))
        .await
        .unwrap();
    assert_eq!(id, Some(7));
}

#[tokio::test]
async fn test_settings_and_reload() {
    let (mock_server, connection) = stalwart_connection().await;

    Mock::given(method("POST"))
        .and(path("/api/settings"))
        .and(body_json(json!([
            {"type": "clear", "prefix": "server.proxy.trusted-networks."},
            {
                "type": "insert",
                "prefix": "server.proxy.trusted-networks",
                "values": [["0000", "10.0.0.0/8"]],
                "assert_empty": false,
            },
        ])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": null})))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/reload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
        .expect(1)
        .mount(&mock_server)
        .await;

    connection
        .update_settings(&[
            SettingsUpdate::Clear {
                prefix: "server.proxy.trusted-networks.".to_owned(),
            },
            SettingsUpdate::Insert {
                prefix: Some("server.proxy.trusted-networks".to_owned()),
                values: vec![("0000".to_owned(), "10.0.0.0/8".to_owned())],
                assert_empty: false,
            },
        ])
        .await
        .unwrap();
    connection.reload().await.unwrap();
}

#[tokio::test]
async fn test_delete_mailbox_twice() {
    let (mock_server, connection) = stalwart_connection().await;
    let base_url = url::Url::parse(&mock_server.uri()).unwrap();
    let http_client = ephemera_http::client(ephemera_http::ClientOptions::default()).unwrap();

    // The principal is found the first time only
    Mock::given(method("GET"))
        .and(path("/api/principal/demo%40demo.test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": 42, "type": "individual", "name": "demo", "emails": "demo@demo.test"}
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/principal/demo%40demo.test"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "notFound"})))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/principal/demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": null})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = MailProvider::new(
        MailProviderKind::OidcDirectory,
        MailServices {
            admin: Arc::new(connection),
            smtp: SmtpSubmission::new("127.0.0.1".to_owned(), None, SmtpMode::Plain),
            jmap: JmapClient::new(&base_url, http_client).unwrap(),
        },
    );

    let first = provider.delete_mailbox("demo@demo.test").await;
    assert!(first.success);
    assert_eq!(first.status, Some(200));

    let second = provider.delete_mailbox("demo@demo.test").await;
    assert!(second.success);
    assert_eq!(second.message, "not found (may already be deleted)");
}

#[tokio::test]
async fn test_delete_mailbox_failure_surfaces_status() {
    let (mock_server, connection) = stalwart_connection().await;
    let base_url = url::Url::parse(&mock_server.uri()).unwrap();
    let http_client = ephemera_http::client(ephemera_http::ClientOptions::default()).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/principal/demo%40demo.test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"type": "individual", "name": "demo"}
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/principal/demo"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "other"})))
        .mount(&mock_server)
        .await;

    let provider = MailProvider::new(
        MailProviderKind::Direct,
        MailServices {
            admin: Arc::new(connection),
            smtp: SmtpSubmission::new("127.0.0.1".to_owned(), None, SmtpMode::Plain),
            jmap: JmapClient::new(&base_url, http_client).unwrap(),
        },
    );

    let deletion = provider.delete_mailbox("demo@demo.test").await;
    assert!(!deletion.success);
    assert_eq!(deletion.status, Some(500));
}
