// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// A demo identity, as known by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// The identity provider's ID for this identity
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// How long ago this identity was created
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// The key under which the webmail store records this identity: the email
    /// if known, the username otherwise.
    #[must_use]
    pub fn webmail_key(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.username)
    }

    #[doc(hidden)]
    #[must_use]
    pub fn samples(now: DateTime<Utc>) -> Vec<Self> {
        vec![
            Identity {
                id: "b4c5a1e2-0000-4000-8000-000000000001".to_owned(),
                username: "demo-alice".to_owned(),
                email: Some("demo-alice@demo.test".to_owned()),
                enabled: true,
                created_at: now - Duration::hours(2),
            },
            Identity {
                id: "b4c5a1e2-0000-4000-8000-000000000002".to_owned(),
                username: "demo-bob".to_owned(),
                email: Some("demo-bob@demo.test".to_owned()),
                enabled: true,
                created_at: now - Duration::minutes(5),
            },
        ]
    }
}

/// The data needed to create an identity at the identity provider.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,

    /// Initial password, if any. It is set as non-temporary so that the demo
    /// user can sign in right away.
    #[serde(skip)]
    pub password: Option<String>,
}

impl std::fmt::Debug for NewIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewIdentity")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .finish_non_exhaustive()
    }
}
