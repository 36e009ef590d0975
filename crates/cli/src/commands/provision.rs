// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use ephemera_backends::{IdentityProvider, MailBackend, MailboxVerification};
use ephemera_config::{ConfigurationSection, RootConfig};
use ephemera_data_model::NewIdentity;
use ephemera_stalwart::{
    MailProvider,
    predeploy::{DiscoveryCredential, DiscoveryReport, DiscoveryRequest},
};
use figment::Figment;
use serde::Serialize;
use tracing::{error, info, warn};

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

    /// Its password. Prompted for if missing
    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    first_name: Option<String>,

    #[arg(long)]
    last_name: Option<String>,

    /// Keep the identity even if its mailbox could not be set up
    #[arg(long)]
    keep_on_failure: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "provider", rename_all = "kebab-case")]
enum MailboxOutcome {
    Direct { verification: MailboxVerification },
    OidcDirectory { discovery: DiscoveryReport },
}

impl MailboxOutcome {
    fn is_usable(&self) -> bool {
        match self {
            Self::Direct { verification } => verification.is_usable(),
            Self::OidcDirectory { discovery } => discovery.result.is_discovered(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ProvisionReport {
    identity_id: String,
    username: String,
    email: String,
    mailbox: MailboxOutcome,
    rolled_back: bool,
}

impl Options {
    #[tracing::instrument(
        name = "cli.provision",
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
        let password = super::password_or_prompt(self.password, true)?;
        if password.is_empty() {
            anyhow::bail!("the password can't be empty");
        }

        let http_client = http_client_from_config(&config.http)?;
        let idp = keycloak_from_config(&config.idp, &http_client)?;
        let mail = mail_provider_from_config(&config.mail, &http_client)?;

        let identity_id = idp
            .create_identity(&NewIdentity {
                username: self.username.clone(),
                email: email.clone(),
                first_name: self.first_name,
                last_name: self.last_name,
                password: Some(password.to_string()),
            })
            .await
            .context("could not create the identity")?;
        info!(identity.id = %identity_id, "Identity created");

        let mailbox = match &mail {
            MailProvider::Direct(_) => MailboxOutcome::Direct {
                verification: mail.verify_and_enable_mailbox(&email).await,
            },
            MailProvider::OidcDirectory(_) => {
                let predeploy = predeploy_from_config(&config, &idp, &mail, &http_client);
                let discovery = predeploy
                    .run(&DiscoveryRequest {
                        username: self.username.clone(),
                        email: email.clone(),
                        credential: DiscoveryCredential::Password(password.to_string()),
                    })
                    .await;
                MailboxOutcome::OidcDirectory { discovery }
            }
        };

        let usable = mailbox.is_usable();
        let mut rolled_back = false;
        if !usable {
            error!("The mailbox could not be set up");
            if !self.keep_on_failure {
                match idp.delete_identity(&identity_id).await {
                    Ok(_) => {
                        info!(identity.id = %identity_id, "Identity deleted");
                        rolled_back = true;
                    }
                    Err(e) => warn!(
                        error = &*e as &dyn std::error::Error,
                        "Could not delete the identity"
                    ),
                }
            }
        }

        super::print_json(&ProvisionReport {
            identity_id,
            username: self.username,
            email,
            mailbox,
            rolled_back,
        })?;

        if usable {
            Ok(ExitCode::SUCCESS)
        } else {
            Ok(ExitCode::FAILURE)
        }
    }
}
