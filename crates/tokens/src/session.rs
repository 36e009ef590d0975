// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use ephemera_data_model::TokenPair;

/// The short-lived tokens kept in the session of an identity
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub access_token: String,
    pub id_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl From<&TokenPair> for SessionTokens {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access_token: pair.access_token.clone(),
            id_token: pair.id_token.clone(),
            expires_at: pair.expires_at,
        }
    }
}

impl SessionTokens {
    /// The tokens after a refresh. Identity providers don't always send a new
    /// ID token, the previous one is kept then.
    #[must_use]
    pub fn refreshed(self, pair: &TokenPair) -> Self {
        Self {
            access_token: pair.access_token.clone(),
            id_token: pair.id_token.clone().or(self.id_token),
            expires_at: pair.expires_at,
        }
    }
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("has_id_token", &self.id_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Where the tokens of a session live. Refresh tokens never go there.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<SessionTokens>;
    fn set(&self, key: &str, tokens: SessionTokens);
    fn remove(&self, key: &str);
}

/// A [`SessionStore`] living in memory
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, SessionTokens>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionTokens>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<SessionTokens> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, tokens: SessionTokens) {
        self.entries().insert(key.to_owned(), tokens);
    }

    fn remove(&self, key: &str) {
        self.entries().remove(key);
    }
}
