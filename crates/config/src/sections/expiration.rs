// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use camino::Utf8PathBuf;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error as _};
use serde_with::serde_as;

use super::ConfigurationSection;

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_pid_file() -> Utf8PathBuf {
    "ephemera.pid".into()
}

/// Configuration of the removal of aged demo identities
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExpirationConfig {
    /// How long a demo identity lives, in minutes. `0` disables the removal
    #[serde(default)]
    pub max_session_duration_minutes: u64,

    /// How often to look for aged identities, in seconds
    #[schemars(with = "u64", range(min = 1))]
    #[serde(default = "default_cleanup_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub cleanup_interval: Duration,

    /// Where the daemon writes its PID
    #[schemars(with = "String")]
    #[serde(default = "default_pid_file")]
    pub pid_file: Utf8PathBuf,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            max_session_duration_minutes: 0,
            cleanup_interval: default_cleanup_interval(),
            pid_file: default_pid_file(),
        }
    }
}

impl ExpirationConfig {
    pub(crate) fn is_default(&self) -> bool {
        self.max_session_duration_minutes == 0
            && self.cleanup_interval == default_cleanup_interval()
            && self.pid_file == default_pid_file()
    }
}

impl ConfigurationSection for ExpirationConfig {
    const PATH: Option<&'static str> = Some("expiration");

    fn validate(
        &self,
        _figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        if self.cleanup_interval.is_zero() {
            return Err(figment::Error::custom("The cleanup interval must not be zero")
                .with_path("expiration.cleanup_interval")
                .into());
        }

        Ok(())
    }
}
