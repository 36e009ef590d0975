// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use ephemera_keystore::Encrypter;
use rand::{CryptoRng, RngCore};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use super::ConfigurationSection;

fn example_secret() -> &'static str {
    "0000111122223333444455556666777788889999aaaabbbbccccddddeeeeffff"
}

/// Application secrets
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SecretsConfig {
    /// Key used to encrypt the refresh tokens held in memory
    ///
    /// A random key is generated at startup if not set, in which case the
    /// refresh tokens don't outlive the process.
    #[schemars(
        with = "Option<String>",
        regex(pattern = r"[0-9a-fA-F]{64}"),
        example = "example_secret"
    )]
    #[serde_as(as = "Option<serde_with::hex::Hex>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<[u8; 32]>,
}

impl SecretsConfig {
    /// Derive an [`Encrypter`] out of the config, generating a key if none
    /// was set
    #[must_use]
    pub fn encrypter<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Encrypter {
        match &self.encryption {
            Some(key) => Encrypter::new(key),
            None => Encrypter::generate(rng),
        }
    }

    pub(crate) fn is_default(&self) -> bool {
        self.encryption.is_none()
    }
}

impl ConfigurationSection for SecretsConfig {
    const PATH: Option<&'static str> = Some("secrets");
}
