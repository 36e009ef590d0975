// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error as _};
use url::Url;

use super::ConfigurationSection;

fn default_endpoint() -> Url {
    Url::parse("http://localhost:8080/").unwrap()
}

fn default_mail_client() -> ClientConfig {
    ClientConfig {
        client_id: "stalwart".to_owned(),
        token_endpoint_auth_method: TokenAuthMethod::None,
        client_secret: None,
    }
}

/// Authentication methods used against the token endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenAuthMethod {
    /// `none`: No authentication
    None,

    /// `client_secret_basic`: `client_id` and `client_secret` used as basic
    /// authorization credentials
    ClientSecretBasic,

    /// `client_secret_post`: `client_id` and `client_secret` sent in the
    /// request body
    #[default]
    ClientSecretPost,
}

/// An OAuth 2.0 client registered on the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClientConfig {
    /// The client ID
    pub client_id: String,

    /// How the client authenticates against the token endpoint
    #[serde(default)]
    pub token_endpoint_auth_method: TokenAuthMethod,

    /// The client secret, required by the `client_secret_basic` and
    /// `client_secret_post` authentication methods
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl ClientConfig {
    fn check(&self, path: &str, figment: &figment::Figment) -> Result<(), figment::Error> {
        let annotate = |mut error: figment::Error| {
            error.metadata = figment.find_metadata(path).cloned();
            error.profile = Some(figment::Profile::Default);
            error.path = path.split('.').map(ToOwned::to_owned).collect();
            Err(error)
        };

        if self.client_id.is_empty() {
            return annotate(figment::Error::custom("`client_id` must not be empty"));
        }

        match self.token_endpoint_auth_method {
            TokenAuthMethod::None => {
                if self.client_secret.is_some() {
                    return annotate(figment::Error::custom(
                        "Unexpected field `client_secret` for the selected authentication method",
                    ));
                }
            }
            TokenAuthMethod::ClientSecretBasic | TokenAuthMethod::ClientSecretPost => {
                if self.client_secret.as_deref().is_none_or(str::is_empty) {
                    return annotate(figment::Error::missing_field("client_secret"));
                }
            }
        }

        Ok(())
    }
}

/// Configuration related to the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IdpConfig {
    /// The base URL of the Keycloak server
    #[serde(default = "default_endpoint")]
    pub endpoint: Url,

    /// The realm the demo identities live in
    pub realm: String,

    /// Confidential client allowed to manage the users of the realm, used
    /// with the client credentials grant
    pub admin: ClientConfig,

    /// Client used to sign in the demo identities and to exchange their
    /// tokens
    pub client: ClientConfig,

    /// Client the mail backend validates tokens for. Tokens are exchanged
    /// with this client as the audience.
    #[serde(default = "default_mail_client")]
    pub mail_client: ClientConfig,
}

impl ConfigurationSection for IdpConfig {
    const PATH: Option<&'static str> = Some("idp");

    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        if self.realm.is_empty() {
            return Err(figment::Error::custom("`realm` must not be empty")
                .with_path("idp.realm")
                .into());
        }

        if self.admin.token_endpoint_auth_method == TokenAuthMethod::None {
            return Err(figment::Error::custom(
                "The admin client must be a confidential client",
            )
            .with_path("idp.admin.token_endpoint_auth_method")
            .into());
        }

        self.admin.check("idp.admin", figment)?;
        self.client.check("idp.client", figment)?;
        self.mail_client.check("idp.mail_client", figment)?;

        Ok(())
    }
}
