// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Diagnostic utility to check the health of the backends

use std::process::ExitCode;

use clap::Parser;
use ephemera_backends::{
    ErrorKind, IdentityProvider, MailAdmin, MailProviderKind, WebmailStore,
};
use ephemera_config::{ConfigurationSection, MailProviderConfig, RootConfig};
use figment::Figment;
use tracing::{error, info, info_span, warn};

use crate::util::{
    http_client_from_config, keycloak_from_config, stalwart_from_config, webmail_store_from_config,
};

/// A principal name nobody should ever have, looked up to check the admin API
const PROBE_PRINCIPAL: &str = "ephemera-doctor-probe";

#[derive(Parser, Debug)]
pub(super) struct Options {}

fn hint(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::AuthenticationFailure => "Check the credentials in the config.",
        ErrorKind::NetworkOrTimeout => {
            "Check that the service is running, and reachable from this host."
        }
        ErrorKind::NotFound => "Check the endpoint in the config.",
        ErrorKind::ConfigurationMissing | ErrorKind::PartialFailure | ErrorKind::Unexpected => {
            "See the error details below."
        }
    }
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let _span = info_span!("cli.doctor").entered();
        info!("💡 Running diagnostics, using the same configuration files as the daemon.");

        let config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;
        let http_client = http_client_from_config(&config.http)?;
        let mut healthy = true;

        if config.idp.endpoint.scheme() != "https" {
            warn!(
                r#"⚠️ The identity provider endpoint "{}" (`idp.endpoint`) is not an HTTPS URL.
Tokens and passwords will travel in clear text."#,
                config.idp.endpoint
            );
        }

        if config.expiration.max_session_duration_minutes == 0 {
            warn!(
                "⚠️ Expiration is disabled (`expiration.max_session_duration_minutes` is 0), the daemon won't start."
            );
        }

        if config.secrets.encryption.is_none() {
            info!("💡 No encryption key is configured, one gets generated each time a command runs.");
        }

        // Identity provider
        let idp = keycloak_from_config(&config.idp, &http_client)?;
        match idp.check_connectivity().await {
            Ok(()) => info!(
                r#"✅ The identity provider admin API is reachable for realm "{}""#,
                config.idp.realm
            ),
            Err(e) => {
                healthy = false;
                let kind = ErrorKind::of(&e);
                error!(
                    r#"❌ Can't use the identity provider admin API for realm "{realm}" ({kind}).
{hint}
The admin client (`idp.admin`) needs the `manage-users` role of the `realm-management` client.

Error details: {e:#}"#,
                    realm = config.idp.realm,
                    hint = hint(kind),
                );
            }
        }

        // Mail backend
        let stalwart = stalwart_from_config(&config.mail, &http_client)?;
        let kind = match config.mail.provider {
            MailProviderConfig::Direct => MailProviderKind::Direct,
            MailProviderConfig::OidcDirectory => MailProviderKind::OidcDirectory,
        };
        match stalwart.get_principal(PROBE_PRINCIPAL).await {
            Ok(_) => info!(
                r#"✅ The mail backend management API is reachable at "{}" ({kind:?} provider)"#,
                config.mail.endpoint
            ),
            Err(e) => {
                healthy = false;
                let kind = ErrorKind::of(&e);
                error!(
                    r#"❌ Can't use the mail backend management API at "{endpoint}" ({kind}).
{hint}

Error details: {e:#}"#,
                    endpoint = config.mail.endpoint,
                    hint = hint(kind),
                );
            }
        }

        // Webmail store
        match webmail_store_from_config(&config.webmail).await {
            Ok(store) => match store.check_connectivity().await {
                Ok(()) => info!(
                    r#"✅ The webmail table "{}" is readable"#,
                    config.webmail.table
                ),
                Err(e) => {
                    healthy = false;
                    error!(
                        r#"❌ Can't read the webmail table "{table}" with column "{column}".
Check `webmail.table` and `webmail.column` in the config.

Error details: {e:#}"#,
                        table = config.webmail.table,
                        column = config.webmail.column,
                    );
                }
            },
            Err(e) => {
                healthy = false;
                error!(
                    r"❌ Can't connect to the webmail database.
Check `webmail.uri` in the config, and that the database is reachable from this host.

Error details: {e:#}"
                );
            }
        }

        if healthy {
            info!("✅ All checks passed");
            Ok(ExitCode::SUCCESS)
        } else {
            Ok(ExitCode::FAILURE)
        }
    }
}
