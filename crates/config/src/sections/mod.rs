// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod expiration;
mod http;
mod idp;
mod mail;
mod secrets;
mod telemetry;
mod webmail;

pub use self::{
    expiration::ExpirationConfig,
    http::HttpClientConfig,
    idp::{ClientConfig, IdpConfig, TokenAuthMethod},
    mail::{
        DiscoveryConfig, EmailSmtpMode, MailConfig, MailProviderConfig, ProxyConfig, SmtpConfig,
    },
    secrets::SecretsConfig,
    telemetry::{
        MetricsConfig, MetricsExporterKind, Propagator, TelemetryConfig, TracingConfig,
        TracingExporterKind,
    },
    webmail::WebmailConfig,
};
use crate::util::ConfigurationSection;

/// Application configuration root
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RootConfig {
    /// Configuration related to the identity provider
    pub idp: IdpConfig,

    /// Configuration related to the mail backend
    pub mail: MailConfig,

    /// Configuration of the database the webmail client records its users
    /// in
    pub webmail: WebmailConfig,

    /// Configuration of the removal of aged demo identities
    #[serde(default, skip_serializing_if = "ExpirationConfig::is_default")]
    pub expiration: ExpirationConfig,

    /// Configuration of the HTTP client
    #[serde(default, skip_serializing_if = "HttpClientConfig::is_default")]
    pub http: HttpClientConfig,

    /// Application secrets
    #[serde(default, skip_serializing_if = "SecretsConfig::is_default")]
    pub secrets: SecretsConfig,

    /// Configuration related to sending monitoring data
    #[serde(default, skip_serializing_if = "TelemetryConfig::is_default")]
    pub telemetry: TelemetryConfig,
}

impl ConfigurationSection for RootConfig {
    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        self.idp.validate(figment)?;
        self.mail.validate(figment)?;
        self.webmail.validate(figment)?;
        self.expiration.validate(figment)?;
        self.http.validate(figment)?;
        self.secrets.validate(figment)?;
        self.telemetry.validate(figment)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;
    use crate::util::figment;

    const CONFIG: &str = r"
        idp:
          endpoint: https://sso.demo.test/
          realm: demo
          admin:
            client_id: ephemera-admin
            client_secret: admin-secret
          client:
            client_id: ephemera
            client_secret: app-secret
        mail:
          provider: direct
          endpoint: https://mail.demo.test/
          username: admin
          password: admin-password
          smtp:
            hostname: smtp.demo.test
        webmail:
          uri: postgresql://roundcube@db.demo.test/roundcube
    ";

    #[test]
    fn load_config() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", CONFIG)?;

            let config = RootConfig::extract(&figment(&["config.yaml"])).unwrap();

            assert_eq!(config.idp.realm, "demo");
            assert_eq!(config.mail.provider, MailProviderConfig::Direct);
            assert_eq!(config.webmail.table, "users");
            assert_eq!(config.expiration.max_session_duration_minutes, 0);
            assert!(config.secrets.encryption.is_none());
            assert!(config.telemetry.is_default());

            Ok(())
        });
    }

    #[test]
    fn environment_overrides_files() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", CONFIG)?;
            jail.create_file(
                "override.yaml",
                r"
                    expiration:
                      max_session_duration_minutes: 30
                ",
            )?;
            jail.set_env("EPHEMERA_MAIL__PROVIDER", "oidc-directory");
            jail.set_env("EPHEMERA_IDP__REALM", "other");

            let config =
                RootConfig::extract(&figment(&["config.yaml", "override.yaml"])).unwrap();

            assert_eq!(config.idp.realm, "other");
            assert_eq!(config.mail.provider, MailProviderConfig::OidcDirectory);
            assert_eq!(config.expiration.max_session_duration_minutes, 30);

            Ok(())
        });
    }

    #[test]
    fn missing_section() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    mail:
                      api_key: secret
                      smtp:
                        hostname: localhost
                ",
            )?;

            let error = RootConfig::extract(&figment(&["config.yaml"])).unwrap_err();
            assert!(error.to_string().contains("idp"));

            Ok(())
        });
    }
}
