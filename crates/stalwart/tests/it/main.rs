// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use ephemera_http::ClientOptions;
use ephemera_stalwart::{StalwartAuth, StalwartConnection};
use url::Url;
use wiremock::MockServer;

mod connection;
mod jmap;
mod predeploy;

const ADMIN_USERNAME: &str = "admin";
const ADMIN_PASSWORD: &str = "admin-password";

async fn init_test() -> (reqwest::Client, MockServer, Url) {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let client = ephemera_http::client(ClientOptions::default()).expect("Couldn't build client");
    let mock_server = MockServer::start().await;
    let base_url = Url::parse(&mock_server.uri()).expect("Couldn't parse URL");

    (client, mock_server, base_url)
}

async fn stalwart_connection() -> (MockServer, StalwartConnection) {
    let (http_client, mock_server, base_url) = init_test().await;
    let connection = StalwartConnection::new(
        base_url,
        StalwartAuth::Basic {
            username: ADMIN_USERNAME.to_owned(),
            password: ADMIN_PASSWORD.to_owned(),
        },
        http_client,
    );

    (mock_server, connection)
}
