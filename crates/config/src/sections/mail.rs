// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{num::NonZeroU16, time::Duration};

use ipnetwork::IpNetwork;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error as _};
use serde_with::{serde_as, skip_serializing_none};
use url::Url;

use super::ConfigurationSection;
use crate::schema;

fn default_endpoint() -> Url {
    Url::parse("http://localhost:8081/").unwrap()
}

fn default_discovery_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_smtp_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Which flavour of mail backend is deployed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum MailProviderConfig {
    /// Mailboxes are created through the management API
    #[default]
    Direct,

    /// Mailboxes come from the identity provider, and only exist once the
    /// mail backend has seen the identity authenticate
    OidcDirectory,
}

/// Encryption mode to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EmailSmtpMode {
    /// Plain text
    Plain,

    /// `StartTLS` (starts as plain text then upgrade to TLS)
    #[default]
    StartTls,

    /// TLS
    Tls,
}

/// Configuration of the submission server
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SmtpConfig {
    /// Hostname to connect to
    #[schemars(with = "schema::Hostname")]
    pub hostname: String,

    /// Port to connect to. Default is 25 for plain, 465 for TLS and 587 for
    /// `StartTLS`
    pub port: Option<NonZeroU16>,

    /// Encryption mode to use
    #[serde(default)]
    pub mode: EmailSmtpMode,

    /// Timeout when sending messages, in seconds
    #[schemars(with = "u64", range(min = 1, max = 300))]
    #[serde(default = "default_smtp_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub timeout: Duration,
}

/// Configuration of the discovery of identities by the mail backend
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DiscoveryConfig {
    /// How long to wait after the handshake before looking for the
    /// mailbox, in seconds
    #[schemars(with = "u64", range(min = 2, max = 5))]
    #[serde(default = "default_discovery_delay")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub delay: Duration,

    /// Timeout of the authenticated handshake, TLS negotiation included, in
    /// seconds
    #[schemars(with = "u64", range(min = 1, max = 120))]
    #[serde(default = "default_handshake_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub handshake_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            delay: default_discovery_delay(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

/// Reverse proxies in front of the mail backend
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProxyConfig {
    /// Whether the proxies talk the PROXY protocol
    #[serde(default)]
    pub proxy_protocol: bool,

    /// Networks the proxies connect from
    #[serde(default)]
    pub trusted_networks: Vec<IpNetwork>,
}

/// Configuration related to the mail backend
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MailConfig {
    /// Which flavour of mail backend is deployed
    #[serde(default)]
    pub provider: MailProviderConfig,

    /// The base URL of the management API
    #[serde(default = "default_endpoint")]
    pub endpoint: Url,

    /// Username of an administrator of the management API
    pub username: Option<String>,

    /// Password of the administrator
    pub password: Option<String>,

    /// API key to use instead of an administrator account
    pub api_key: Option<String>,

    /// The base URL of the JMAP server. Defaults to the management API URL
    pub jmap_endpoint: Option<Url>,

    /// The domain of the demo mailboxes
    pub domain: Option<String>,

    /// The submission server
    pub smtp: SmtpConfig,

    /// Discovery of identities by the mail backend
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Reverse proxies in front of the mail backend
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl MailConfig {
    /// The JMAP base URL, falling back to the management API URL
    #[must_use]
    pub fn jmap_endpoint(&self) -> &Url {
        self.jmap_endpoint.as_ref().unwrap_or(&self.endpoint)
    }
}

impl ConfigurationSection for MailConfig {
    const PATH: Option<&'static str> = Some("mail");

    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        let annotate = |mut error: figment::Error| {
            error.metadata = figment.find_metadata(Self::PATH.unwrap()).cloned();
            error.profile = Some(figment::Profile::Default);
            error.path = vec![Self::PATH.unwrap().to_owned()];
            error
        };

        match (&self.username, &self.password, &self.api_key) {
            (Some(_), Some(_), None) | (None, None, Some(_)) => {}
            (None, None, None) => {
                return Err(annotate(figment::Error::custom(
                    "Either `username` and `password` or `api_key` must be set",
                ))
                .into());
            }
            (Some(_), None, _) => {
                return Err(annotate(figment::Error::missing_field("password")).into());
            }
            (None, Some(_), _) => {
                return Err(annotate(figment::Error::missing_field("username")).into());
            }
            (Some(_), Some(_), Some(_)) => {
                return Err(annotate(figment::Error::custom(
                    "`api_key` can't be used together with `username` and `password`",
                ))
                .into());
            }
        }

        if !(2..=5).contains(&self.discovery.delay.as_secs()) {
            return Err(figment::Error::custom(
                "The discovery delay must be between 2 and 5 seconds",
            )
            .with_path("mail.discovery.delay")
            .into());
        }

        if self.discovery.handshake_timeout.is_zero() {
            return Err(figment::Error::custom("The handshake timeout must not be zero")
                .with_path("mail.discovery.handshake_timeout")
                .into());
        }

        if !self.proxy.proxy_protocol && !self.proxy.trusted_networks.is_empty() {
            return Err(figment::Error::custom(
                "`trusted_networks` is only used with the PROXY protocol enabled",
            )
            .with_path("mail.proxy.trusted_networks")
            .into());
        }

        Ok(())
    }
}
