// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::{DateTime, Duration, Utc};
use oauth2_types::requests::AccessTokenResponse;

/// Lifetime assumed for access tokens when the identity provider doesn't say.
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::seconds(300);

/// Access tokens with less remaining validity than this are refreshed.
pub const REFRESH_BUFFER: Duration = Duration::seconds(60);

/// The set of tokens issued to an identity by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    /// Build a token pair out of a token endpoint response received at `now`.
    #[must_use]
    pub fn from_response(response: AccessTokenResponse, now: DateTime<Utc>) -> Self {
        let ttl = response.expires_in.unwrap_or(DEFAULT_ACCESS_TOKEN_TTL);
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            issued_at: now,
            expires_at: now + ttl,
        }
    }

    /// How long the access token is still valid for. Negative once expired.
    #[must_use]
    pub fn remaining_validity(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Returns `true` if the access token should be refreshed before use.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.remaining_validity(now) <= REFRESH_BUFFER
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
