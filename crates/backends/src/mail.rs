// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::Arc;

use ephemera_data_model::Principal;
use ipnetwork::IpNetwork;
use serde::Serialize;

use crate::ErrorKind;

/// Which flavour of mail backend is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MailProviderKind {
    /// Principals are managed through the admin API
    Direct,

    /// Principals come from an OIDC directory, and only exist once the mail
    /// backend has seen the identity authenticate
    OidcDirectory,
}

/// An update to the mail backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SettingsUpdate {
    /// Remove every key starting with the prefix
    Clear { prefix: String },

    /// Insert the values under the prefix
    Insert {
        prefix: Option<String>,
        values: Vec<(String, String)>,
        assert_empty: bool,
    },
}

/// Reverse proxies allowed to use the PROXY protocol in front of the mail
/// backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub proxy_protocol: bool,
    pub trusted_networks: Vec<IpNetwork>,
}

/// How to authenticate against the submission server.
#[derive(Clone, PartialEq, Eq)]
pub enum SmtpAuth {
    /// PLAIN or LOGIN with a password
    Password { username: String, password: String },

    /// XOAUTH2 with an access token
    Bearer {
        username: String,
        access_token: String,
    },
}

impl SmtpAuth {
    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::Password { username, .. } | Self::Bearer { username, .. } => username,
        }
    }
}

impl std::fmt::Debug for SmtpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Bearer { username, .. } => f
                .debug_struct("Bearer")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// A message to send on behalf of a demo identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailOptions {
    pub auth: SmtpAuth,
    /// Defaults to the authenticated username if absent
    pub from: Option<String>,
    pub to: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

/// The submission server's answer to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentMail {
    pub message_id: String,
    pub response: String,
}

/// The result of checking whether a mailbox exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MailboxVerification {
    /// The principal exists
    Exists { principal: Principal },

    /// The principal was just created
    Created { principal_id: Option<u64> },

    /// No principal matches
    Missing,

    /// The mail backend only creates principals when they first
    /// authenticate
    PendingDiscovery { message: String },

    /// The lookup itself failed
    Failed { kind: ErrorKind, error: String },
}

impl MailboxVerification {
    /// Returns `true` if the mailbox can receive mail right now.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Exists { .. } | Self::Created { .. })
    }

    /// The principal, if the lookup found one.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Exists { principal } => Some(principal),
            _ => None,
        }
    }

    /// A short description of why the mailbox isn't usable, if it isn't.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        match self {
            Self::Exists { .. } | Self::Created { .. } => None,
            Self::Missing => Some("mailbox not found".to_owned()),
            Self::PendingDiscovery { message } => Some(message.clone()),
            Self::Failed { kind, error } => Some(format!("{kind}: {error}")),
        }
    }
}

/// The result of deleting a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailboxDeletion {
    pub success: bool,
    pub message: String,
    /// The HTTP status the admin API answered with, if it answered
    pub status: Option<u16>,
}

impl MailboxDeletion {
    pub const ALREADY_DELETED: &'static str = "not found (may already be deleted)";

    #[must_use]
    pub fn already_deleted() -> Self {
        Self {
            success: true,
            message: Self::ALREADY_DELETED.to_owned(),
            status: Some(404),
        }
    }
}

/// The admin API of the mail backend, managing principals and settings.
#[async_trait::async_trait]
pub trait MailAdmin: Send + Sync {
    /// Look up a principal by name or email address.
    ///
    /// Returns `None` if no principal matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail backend is unreachable or the request
    /// failed.
    async fn get_principal(&self, name: &str) -> Result<Option<Principal>, anyhow::Error>;

    /// Create a principal, returning its ID if the backend told us.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail backend is unreachable or refused to
    /// create the principal.
    async fn create_principal(&self, principal: &Principal) -> Result<Option<u64>, anyhow::Error>;

    /// Delete a principal by its canonical name, returning the HTTP status
    /// of the response. A missing principal is reported as a 404 status, not
    /// as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail backend is unreachable or refused to
    /// delete the principal.
    async fn delete_principal(&self, name: &str) -> Result<u16, anyhow::Error>;

    /// Apply updates to the backend settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail backend is unreachable or refused the
    /// updates.
    async fn update_settings(&self, updates: &[SettingsUpdate]) -> Result<(), anyhow::Error>;

    /// Ask the backend to reload its settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail backend is unreachable or failed to
    /// reload.
    async fn reload(&self) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl<T: MailAdmin + ?Sized> MailAdmin for Arc<T> {
    async fn get_principal(&self, name: &str) -> Result<Option<Principal>, anyhow::Error> {
        (**self).get_principal(name).await
    }

    async fn create_principal(&self, principal: &Principal) -> Result<Option<u64>, anyhow::Error> {
        (**self).create_principal(principal).await
    }

    async fn delete_principal(&self, name: &str) -> Result<u16, anyhow::Error> {
        (**self).delete_principal(name).await
    }

    async fn update_settings(&self, updates: &[SettingsUpdate]) -> Result<(), anyhow::Error> {
        (**self).update_settings(updates).await
    }

    async fn reload(&self) -> Result<(), anyhow::Error> {
        (**self).reload().await
    }
}

/// A uniform interface over the flavours of mail backend.
///
/// Lookups and deletions never fail outright: their outcome, including
/// failures, is described by the returned value.
#[async_trait::async_trait]
pub trait MailBackend: Send + Sync {
    /// Which flavour of backend this is.
    fn kind(&self) -> MailProviderKind;

    /// Check whether a mailbox exists for the given email address.
    async fn verify_mailbox_exists(&self, email: &str) -> MailboxVerification;

    /// Check whether a mailbox exists, and create it if the backend allows
    /// it.
    async fn verify_and_enable_mailbox(&self, email: &str) -> MailboxVerification;

    /// Send a message through the submission server.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be built or was rejected.
    async fn send_mail(&self, options: &MailOptions) -> Result<SentMail, anyhow::Error>;

    /// Count the unread messages in the inbox of the user.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail backend is unreachable or rejected the
    /// token.
    async fn unseen_count(&self, username: &str, access_token: &str) -> Result<u64, anyhow::Error>;

    /// Delete the mailbox of the given email address. Deleting a missing
    /// mailbox succeeds.
    async fn delete_mailbox(&self, email: &str) -> MailboxDeletion;

    /// Push the reverse proxy settings to the backend and reload it.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings could not be applied.
    async fn configure_proxy(&self, settings: &ProxySettings) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl<T: MailBackend + ?Sized> MailBackend for Arc<T> {
    fn kind(&self) -> MailProviderKind {
        (**self).kind()
    }

    async fn verify_mailbox_exists(&self, email: &str) -> MailboxVerification {
        (**self).verify_mailbox_exists(email).await
    }

    async fn verify_and_enable_mailbox(&self, email: &str) -> MailboxVerification {
        (**self).verify_and_enable_mailbox(email).await
    }

    async fn send_mail(&self, options: &MailOptions) -> Result<SentMail, anyhow::Error> {
        (**self).send_mail(options).await
    }

    async fn unseen_count(&self, username: &str, access_token: &str) -> Result<u64, anyhow::Error> {
        (**self).unseen_count(username, access_token).await
    }

    async fn delete_mailbox(&self, email: &str) -> MailboxDeletion {
        (**self).delete_mailbox(email).await
    }

    async fn configure_proxy(&self, settings: &ProxySettings) -> Result<(), anyhow::Error> {
        (**self).configure_proxy(settings).await
    }
}
