// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{process::ExitCode, time::Duration};

use anyhow::Context;
use clap::Parser;
use ephemera_backends::MailBackend;
use ephemera_config::{ConfigurationSection, RootConfig};
use ephemera_data_model::{Clock, SystemClock, TokenPair};
use ephemera_oidc_client::requests::password::access_token_with_password;
use ephemera_tokens::{AccessTokenOutcome, MemorySessionStore, TokenManager};
use figment::Figment;
use serde::Serialize;
use tracing::{info, warn};

use crate::util::{
    client_credentials_from_config, http_client_from_config, keycloak_from_config,
    mail_provider_from_config, token_manager_from_config,
};

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// The username of the identity
    #[arg(long)]
    username: String,

    /// Its password. Prompted for if missing
    #[arg(long)]
    password: Option<String>,

    /// Keep polling every this many seconds, refreshing the access token
    /// when it is about to expire
    #[arg(long)]
    watch: Option<u64>,
}

#[derive(Debug, Serialize)]
struct UnseenReport<'a> {
    username: &'a str,
    unseen: u64,
    refreshed: bool,
}

impl Options {
    #[tracing::instrument(
        name = "cli.unseen",
        skip_all,
        fields(identity.username = %self.username),
    )]
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;
        let password = super::password_or_prompt(self.password, false)?;

        let http_client = http_client_from_config(&config.http)?;
        let idp = keycloak_from_config(&config.idp, &http_client)?;
        let mail = mail_provider_from_config(&config.mail, &http_client)?;
        let tokens = token_manager_from_config(
            &config.secrets,
            &idp,
            &config.idp.client,
            &http_client,
        );
        let session = MemorySessionStore::new();

        let response = access_token_with_password(
            &http_client,
            &client_credentials_from_config(&config.idp.client),
            idp.token_endpoint(),
            &self.username,
            &password,
            Some("openid email".to_owned()),
        )
        .await
        .context("could not sign in")?;
        drop(password);

        let pair = TokenPair::from_response(response, SystemClock::default().now());
        if !tokens.initialize(&self.username, &pair, &session) {
            anyhow::bail!("the identity provider returned an empty access token");
        }
        if !tokens.has_refresh_token(&self.username) {
            warn!("No refresh token was issued, polling stops once the access token expires");
        }

        loop {
            let unseen = poll(&self.username, &tokens, &session, &mail).await?;
            super::print_json(&unseen)?;

            let Some(interval) = self.watch else {
                break;
            };

            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(interval)) => {},
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                },
            }
        }

        tokens.invalidate(&self.username, &session);
        Ok(ExitCode::SUCCESS)
    }
}

async fn poll<'a>(
    username: &'a str,
    tokens: &TokenManager,
    session: &MemorySessionStore,
    mail: &dyn MailBackend,
) -> anyhow::Result<UnseenReport<'a>> {
    let outcome = tokens.get_valid_access_token(username, session).await;
    let refreshed = matches!(outcome, AccessTokenOutcome::Refreshed(_));
    if let AccessTokenOutcome::RefreshFailed { error, .. } = &outcome {
        warn!(%error, "Using an access token which may have expired");
    }

    let access_token = outcome
        .into_token()
        .context("no access token is held for this identity")?;

    let unseen = mail.unseen_count(username, &access_token).await?;

    Ok(UnseenReport {
        username,
        unseen,
        refreshed,
    })
}
