// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{num::NonZeroU32, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error as _};
use serde_with::serde_as;

use super::ConfigurationSection;
use crate::schema;

fn default_table() -> String {
    "users".to_owned()
}

fn default_column() -> String {
    "username".to_owned()
}

fn default_max_connections() -> NonZeroU32 {
    NonZeroU32::new(4).unwrap()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Configuration of the database the webmail client records its users in
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WebmailConfig {
    /// Connection URI of the database
    #[schemars(with = "schema::PostgresUri")]
    pub uri: String,

    /// Table the webmail client records its users in. May be qualified with
    /// a schema
    #[serde(default = "default_table")]
    pub table: String,

    /// Column of the table holding the email or username of the user
    #[serde(default = "default_column")]
    pub column: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: NonZeroU32,

    /// Timeout when acquiring a connection, in seconds
    #[schemars(with = "u64", range(min = 1))]
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub connect_timeout: Duration,
}

impl ConfigurationSection for WebmailConfig {
    const PATH: Option<&'static str> = Some("webmail");

    fn validate(
        &self,
        _figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        if !(self.uri.starts_with("postgres://") || self.uri.starts_with("postgresql://")) {
            return Err(figment::Error::custom("Expected a PostgreSQL connection URI")
                .with_path("webmail.uri")
                .into());
        }

        if self.table.is_empty() {
            return Err(figment::Error::custom("`table` must not be empty")
                .with_path("webmail.table")
                .into());
        }

        if self.column.is_empty() {
            return Err(figment::Error::custom("`column` must not be empty")
                .with_path("webmail.column")
                .into());
        }

        Ok(())
    }
}
