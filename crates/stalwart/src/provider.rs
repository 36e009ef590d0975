// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ephemera_backends::{
    BackendError, ErrorKind, MailAdmin, MailBackend, MailOptions, MailProviderKind,
    MailboxDeletion, MailboxVerification, ProxySettings, SentMail, SettingsUpdate,
};
use ephemera_data_model::Principal;
use tracing::{info, warn};

use crate::{jmap::JmapClient, smtp::SmtpSubmission};

const TRUSTED_NETWORKS_PREFIX: &str = "server.proxy.trusted-networks";

/// The services every flavour of mail backend is reached through.
#[derive(Clone)]
pub struct MailServices {
    pub admin: Arc<dyn MailAdmin>,
    pub smtp: SmtpSubmission,
    pub jmap: JmapClient,
}

/// The mail backend, in one of its two flavours. The flavour is chosen once
/// from the configuration.
#[derive(Clone)]
pub enum MailProvider {
    /// Principals are created through the admin API
    Direct(MailServices),

    /// Principals are only created by the mail backend itself, the first
    /// time it sees the identity authenticate over OIDC
    OidcDirectory(MailServices),
}

impl MailProvider {
    #[must_use]
    pub fn new(kind: MailProviderKind, services: MailServices) -> Self {
        match kind {
            MailProviderKind::Direct => Self::Direct(services),
            MailProviderKind::OidcDirectory => Self::OidcDirectory(services),
        }
    }

    #[must_use]
    pub fn services(&self) -> &MailServices {
        match self {
            Self::Direct(services) | Self::OidcDirectory(services) => services,
        }
    }

    async fn lookup(&self, name: &str) -> MailboxVerification {
        match self.services().admin.get_principal(name).await {
            Ok(Some(principal)) => MailboxVerification::Exists { principal },
            Ok(None) => MailboxVerification::Missing,
            Err(error) => MailboxVerification::Failed {
                kind: ErrorKind::of(&error),
                error: format!("{error:#}"),
            },
        }
    }
}

/// The name of the principal owning a mailbox, when we create it ourselves
fn principal_name(email: &str) -> &str {
    email.split_once('@').map_or(email, |(local, _domain)| local)
}

#[async_trait]
impl MailBackend for MailProvider {
    fn kind(&self) -> MailProviderKind {
        match self {
            Self::Direct(_) => MailProviderKind::Direct,
            Self::OidcDirectory(_) => MailProviderKind::OidcDirectory,
        }
    }

    async fn verify_mailbox_exists(&self, email: &str) -> MailboxVerification {
        self.lookup(email).await
    }

    #[tracing::instrument(
        name = "mail.verify_and_enable_mailbox",
        skip_all,
        fields(mail.provider = ?self.kind(), user.email = email),
    )]
    async fn verify_and_enable_mailbox(&self, email: &str) -> MailboxVerification {
        let verification = self.lookup(email).await;
        if verification != MailboxVerification::Missing {
            return verification;
        }

        match self {
            Self::Direct(services) => {
                let principal =
                    Principal::individual(principal_name(email).to_owned(), email.to_owned());
                match services.admin.create_principal(&principal).await {
                    Ok(principal_id) => {
                        info!(?principal_id, "Created mailbox");
                        MailboxVerification::Created { principal_id }
                    }
                    Err(error) => MailboxVerification::Failed {
                        kind: ErrorKind::of(&error),
                        error: format!("{error:#}"),
                    },
                }
            }

            Self::OidcDirectory(_) => MailboxVerification::PendingDiscovery {
                message: "the mailbox will be created the first time the user authenticates"
                    .to_owned(),
            },
        }
    }

    async fn send_mail(&self, options: &MailOptions) -> Result<SentMail, anyhow::Error> {
        self.services().smtp.send(options).await
    }

    async fn unseen_count(&self, username: &str, access_token: &str) -> Result<u64, anyhow::Error> {
        self.services()
            .jmap
            .unseen_count(username, access_token)
            .await
    }

    #[tracing::instrument(
        name = "mail.delete_mailbox",
        skip_all,
        fields(mail.provider = ?self.kind(), user.email = email),
    )]
    async fn delete_mailbox(&self, email: &str) -> MailboxDeletion {
        let admin = &self.services().admin;

        let principal = match admin.get_principal(email).await {
            Ok(Some(principal)) => principal,
            Ok(None) => return MailboxDeletion::already_deleted(),
            Err(error) => {
                warn!(error = %format!("{error:#}"), "Failed to look up the mailbox");
                return MailboxDeletion {
                    success: false,
                    message: format!("failed to look up the mailbox: {error:#}"),
                    status: BackendError::status_of(&error),
                };
            }
        };

        match admin.delete_principal(&principal.name).await {
            Ok(404) => MailboxDeletion::already_deleted(),
            Ok(status) => MailboxDeletion {
                success: true,
                message: format!("deleted principal {}", principal.name),
                status: Some(status),
            },
            Err(error) => {
                warn!(error = %format!("{error:#}"), "Failed to delete the mailbox");
                MailboxDeletion {
                    success: false,
                    message: format!("failed to delete principal {}: {error:#}", principal.name),
                    status: BackendError::status_of(&error),
                }
            }
        }
    }

    #[tracing::instrument(
        name = "mail.configure_proxy",
        skip_all,
        fields(
            mail.proxy.enabled = settings.proxy_protocol,
            mail.proxy.networks = settings.trusted_networks.len(),
        ),
        err(Debug),
    )]
    async fn configure_proxy(&self, settings: &ProxySettings) -> Result<(), anyhow::Error> {
        let mut updates = vec![SettingsUpdate::Clear {
            prefix: format!("{TRUSTED_NETWORKS_PREFIX}."),
        }];

        // Without trusted networks, the PROXY protocol is never accepted
        if settings.proxy_protocol && !settings.trusted_networks.is_empty() {
            updates.push(SettingsUpdate::Insert {
                prefix: Some(TRUSTED_NETWORKS_PREFIX.to_owned()),
                values: settings
                    .trusted_networks
                    .iter()
                    .enumerate()
                    .map(|(index, network)| (format!("{index:04}"), network.to_string()))
                    .collect(),
                assert_empty: false,
            });
        }

        let admin = &self.services().admin;
        admin
            .update_settings(&updates)
            .await
            .context("Failed to push the proxy settings")?;
        admin
            .reload()
            .await
            .context("Failed to reload the mail backend")?;

        Ok(())
    }
}
