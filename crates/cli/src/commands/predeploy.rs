// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use clap::Parser;
use ephemera_config::{ConfigurationSection, RootConfig};
use ephemera_stalwart::predeploy::{DiscoveryCredential, DiscoveryRequest};
use figment::Figment;
use tracing::{error, info};

use crate::util::{
    http_client_from_config, keycloak_from_config, mail_provider_from_config,
    predeploy_from_config,
};

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// The username of the identity
    #[arg(long)]
    username: String,

    /// Its email address, defaults to the username at the configured mail
    /// domain
    #[arg(long)]
    email: Option<String>,

    /// Authenticate with this password. Prompted for if no session token is
    /// given either
    #[arg(long, conflicts_with = "session_token")]
    password: Option<String>,

    /// Authenticate by exchanging this access token of an existing session
    #[arg(long)]
    session_token: Option<String>,
}

impl Options {
    #[tracing::instrument(
        name = "cli.predeploy",
        skip_all,
        fields(identity.username = %self.username),
    )]
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;

        let email = super::email_or_default(
            self.email,
            &self.username,
            config.mail.domain.as_deref(),
        )?;

        let credential = match self.session_token {
            Some(token) => DiscoveryCredential::SessionToken(token),
            None => {
                let password = super::password_or_prompt(self.password, false)?;
                DiscoveryCredential::Password(password.to_string())
            }
        };

        let http_client = http_client_from_config(&config.http)?;
        let idp = keycloak_from_config(&config.idp, &http_client)?;
        let mail = mail_provider_from_config(&config.mail, &http_client)?;
        let predeploy = predeploy_from_config(&config, &idp, &mail, &http_client);

        let report = predeploy
            .run(&DiscoveryRequest {
                username: self.username,
                email,
                credential,
            })
            .await;

        let message = report.result.message();
        let discovered = report.result.is_discovered();
        if discovered {
            info!("{message}");
        } else {
            error!("{message}");
        }

        super::print_json(&report)?;

        if discovered {
            Ok(ExitCode::SUCCESS)
        } else {
            Ok(ExitCode::FAILURE)
        }
    }
}
