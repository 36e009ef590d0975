// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::collections::HashMap;

use ephemera_http::ClientOptions;
use ephemera_oidc_client::types::client_credentials::ClientCredentials;
use url::Url;
use wiremock::{MockServer, Request};

mod requests;
mod types;

const CLIENT_ID: &str = "client!+ID";
const CLIENT_SECRET: &str = "SECRET?%Gclient";
const ACCESS_TOKEN: &str = "AccessToken1";
const REFRESH_TOKEN: &str = "RefreshToken1";
const USERNAME: &str = "demo-user";
const PASSWORD: &str = "p@ss word";

/// The kinds of client authentication supported by the library
#[derive(Debug, Clone, Copy)]
enum AuthMethod {
    None,
    ClientSecretBasic,
    ClientSecretPost,
}

async fn init_test() -> (reqwest::Client, MockServer, Url) {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let client = ephemera_http::client(ClientOptions::default()).expect("Couldn't build client");
    let mock_server = MockServer::start().await;
    let issuer = Url::parse(&mock_server.uri()).expect("Couldn't parse URL");

    (client, mock_server, issuer)
}

/// Generate client credentials for the given authentication method.
fn client_credentials(auth_method: AuthMethod) -> ClientCredentials {
    match auth_method {
        AuthMethod::None => ClientCredentials::None {
            client_id: CLIENT_ID.to_owned(),
        },
        AuthMethod::ClientSecretBasic => ClientCredentials::ClientSecretBasic {
            client_id: CLIENT_ID.to_owned(),
            client_secret: CLIENT_SECRET.to_owned(),
        },
        AuthMethod::ClientSecretPost => ClientCredentials::ClientSecretPost {
            client_id: CLIENT_ID.to_owned(),
            client_secret: CLIENT_SECRET.to_owned(),
        },
    }
}

/// Decode the form body of a request
fn form_body(req: &Request) -> HashMap<String, String> {
    form_urlencoded::parse(&req.body)
        .into_owned()
        .collect::<HashMap<_, _>>()
}
