// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error as _};
use serde_with::serde_as;

use super::ConfigurationSection;

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Configuration of the HTTP client used to reach the identity provider and
/// the mail backend
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HttpClientConfig {
    /// Total time allowed for a request, in seconds
    #[schemars(with = "u64", range(min = 1, max = 300))]
    #[serde(default = "default_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub timeout: Duration,

    /// Time allowed to establish a connection, in seconds
    #[schemars(with = "u64", range(min = 1, max = 300))]
    #[serde(default = "default_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub connect_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_timeout(),
        }
    }
}

impl HttpClientConfig {
    pub(crate) fn is_default(&self) -> bool {
        self.timeout == default_timeout() && self.connect_timeout == default_timeout()
    }
}

impl ConfigurationSection for HttpClientConfig {
    const PATH: Option<&'static str> = Some("http");

    fn validate(
        &self,
        _figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        if self.timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(figment::Error::custom("HTTP timeouts must not be zero")
                .with_path("http")
                .into());
        }

        Ok(())
    }
}
