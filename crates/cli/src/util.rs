// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::Arc;

use anyhow::Context;
use ephemera_backends::{MailProviderKind, ProxySettings};
use ephemera_config::{
    ClientConfig, EmailSmtpMode, ExpirationConfig, HttpClientConfig, IdpConfig, MailConfig,
    MailProviderConfig, RootConfig, SecretsConfig, TokenAuthMethod, WebmailConfig,
};
use ephemera_data_model::{BoxClock, ExpirationPolicy, SystemClock};
use ephemera_http::ClientOptions;
use ephemera_keycloak::KeycloakConnection;
use ephemera_oidc_client::types::client_credentials::ClientCredentials;
use ephemera_stalwart::{
    JmapClient, MailProvider, MailServices, SmtpMode, SmtpSubmission, StalwartAuth,
    StalwartConnection,
    predeploy::{OidcMailTokenSource, PreDeploy},
};
use ephemera_tasks::ExpirationReconciler;
use ephemera_tokens::{OidcTokenRefresher, TokenManager};
use ephemera_webmail_pg::{PgWebmailStore, WebmailTable};
use rand::SeedableRng;
use sqlx::{
    ConnectOptions,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use tracing::log::LevelFilter;

fn clock() -> BoxClock {
    Box::new(SystemClock::default())
}

pub fn http_client_from_config(config: &HttpClientConfig) -> Result<reqwest::Client, anyhow::Error> {
    let options = ClientOptions {
        timeout: config.timeout,
        connect_timeout: config.connect_timeout,
    };

    ephemera_http::client(options).context("could not build the HTTP client")
}

pub fn client_credentials_from_config(config: &ClientConfig) -> ClientCredentials {
    let client_id = config.client_id.clone();
    // The secret presence is checked when loading the configuration
    let client_secret = config.client_secret.clone().unwrap_or_default();

    match config.token_endpoint_auth_method {
        TokenAuthMethod::None => ClientCredentials::None { client_id },
        TokenAuthMethod::ClientSecretBasic => ClientCredentials::ClientSecretBasic {
            client_id,
            client_secret,
        },
        TokenAuthMethod::ClientSecretPost => ClientCredentials::ClientSecretPost {
            client_id,
            client_secret,
        },
    }
}

pub fn keycloak_from_config(
    config: &IdpConfig,
    http_client: &reqwest::Client,
) -> Result<KeycloakConnection, anyhow::Error> {
    KeycloakConnection::new(
        &config.endpoint,
        &config.realm,
        client_credentials_from_config(&config.admin),
        http_client.clone(),
        clock(),
    )
    .context("invalid identity provider endpoint")
}

fn smtp_from_config(config: &MailConfig) -> SmtpSubmission {
    let mode = match config.smtp.mode {
        EmailSmtpMode::Plain => SmtpMode::Plain,
        EmailSmtpMode::StartTls => SmtpMode::StartTls,
        EmailSmtpMode::Tls => SmtpMode::Tls,
    };

    SmtpSubmission::new(
        config.smtp.hostname.clone(),
        config.smtp.port.map(Into::into),
        mode,
    )
    .with_timeout(config.smtp.timeout)
    .with_handshake_timeout(config.discovery.handshake_timeout)
}

pub fn stalwart_from_config(
    config: &MailConfig,
    http_client: &reqwest::Client,
) -> Result<StalwartConnection, anyhow::Error> {
    let auth = match (&config.username, &config.password, &config.api_key) {
        (Some(username), Some(password), _) => StalwartAuth::Basic {
            username: username.clone(),
            password: password.clone(),
        },
        (_, _, Some(token)) => StalwartAuth::Bearer {
            token: token.clone(),
        },
        _ => anyhow::bail!("the mail backend needs either a username and password or an API key"),
    };

    Ok(StalwartConnection::new(
        config.endpoint.clone(),
        auth,
        http_client.clone(),
    ))
}

pub fn mail_provider_from_config(
    config: &MailConfig,
    http_client: &reqwest::Client,
) -> Result<MailProvider, anyhow::Error> {
    let admin = stalwart_from_config(config, http_client)?;
    let jmap = JmapClient::new(config.jmap_endpoint(), http_client.clone())
        .context("invalid JMAP endpoint")?;

    let kind = match config.provider {
        MailProviderConfig::Direct => MailProviderKind::Direct,
        MailProviderConfig::OidcDirectory => MailProviderKind::OidcDirectory,
    };

    let services = MailServices {
        admin: Arc::new(admin),
        smtp: smtp_from_config(config),
        jmap,
    };

    Ok(MailProvider::new(kind, services))
}

pub fn proxy_settings_from_config(config: &MailConfig) -> ProxySettings {
    ProxySettings {
        proxy_protocol: config.proxy.proxy_protocol,
        trusted_networks: config.proxy.trusted_networks.clone(),
    }
}

/// Create the webmail store, with a connection pool from the configuration
#[tracing::instrument(name = "db.connect", skip_all)]
pub async fn webmail_store_from_config(
    config: &WebmailConfig,
) -> Result<PgWebmailStore, anyhow::Error> {
    let table = WebmailTable::new(&config.table, &config.column)
        .context("invalid webmail table configuration")?;

    let options: PgConnectOptions = config
        .uri
        .parse()
        .context("could not parse database connection string")?;
    let options = options
        .application_name("ephemera")
        .log_statements(LevelFilter::Debug);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.into())
        .acquire_timeout(config.connect_timeout)
        .connect_with(options)
        .await
        .context("could not connect to the webmail database")?;

    Ok(PgWebmailStore::new(pool, &table))
}

pub fn token_manager_from_config(
    secrets: &SecretsConfig,
    idp: &KeycloakConnection,
    client: &ClientConfig,
    http_client: &reqwest::Client,
) -> TokenManager {
    let mut rng = rand_chacha::ChaChaRng::from_entropy();
    let encrypter = secrets.encrypter(&mut rng);

    let refresher = OidcTokenRefresher::new(
        http_client.clone(),
        client_credentials_from_config(client),
        idp.token_endpoint().clone(),
    );

    TokenManager::new(encrypter, Arc::new(refresher), clock())
}

pub fn predeploy_from_config(
    config: &RootConfig,
    idp: &KeycloakConnection,
    mail: &MailProvider,
    http_client: &reqwest::Client,
) -> PreDeploy {
    let services = mail.services();

    let tokens = OidcMailTokenSource::new(
        http_client.clone(),
        idp.token_endpoint().clone(),
        client_credentials_from_config(&config.idp.client),
        client_credentials_from_config(&config.idp.mail_client),
    );

    PreDeploy::new(
        Arc::new(tokens),
        Arc::new(services.smtp.clone()),
        Arc::new(mail.clone()),
        Arc::clone(&services.admin),
    )
    .with_delay(config.mail.discovery.delay)
}

#[must_use]
pub fn expiration_policy_from_config(config: &ExpirationConfig) -> ExpirationPolicy {
    ExpirationPolicy::new(config.max_session_duration_minutes)
}

/// Wire the reconciler to every backend
pub async fn reconciler_from_config(
    config: &RootConfig,
    http_client: &reqwest::Client,
) -> Result<ExpirationReconciler, anyhow::Error> {
    let idp = keycloak_from_config(&config.idp, http_client)?;
    let mail = mail_provider_from_config(&config.mail, http_client)?;
    let webmail = webmail_store_from_config(&config.webmail).await?;

    Ok(ExpirationReconciler::new(
        Arc::new(idp),
        Arc::new(mail),
        Arc::new(webmail),
        clock(),
        expiration_policy_from_config(&config.expiration),
        config.expiration.cleanup_interval,
    ))
}
