// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use ephemera_data_model::{BoxClock, REFRESH_BUFFER, TokenPair};
use ephemera_keystore::Encrypter;
use ephemera_oidc_client::error::TokenRequestError;
use futures_util::{
    FutureExt as _,
    future::{BoxFuture, Shared},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    refresher::TokenRefresher,
    session::{SessionStore, SessionTokens},
};

#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("no refresh token is stored for this identity")]
    NoRefreshToken,

    #[error("the stored refresh token could not be decrypted")]
    Decryption,

    #[error("the identity provider refused to refresh the token")]
    Request(#[source] Arc<TokenRequestError>),

    #[error("the tokens of this identity were invalidated during the refresh")]
    Invalidated,
}

/// What [`TokenManager::get_valid_access_token`] found.
#[derive(Debug, Clone)]
pub enum AccessTokenOutcome {
    /// Nothing is cached for this identity
    Missing,

    /// The cached access token is still valid for a while
    Cached(String),

    /// The access token was refreshed
    Refreshed(String),

    /// The access token needed a refresh, which failed. The old token is
    /// handed back, it may already be expired.
    RefreshFailed {
        stale_access_token: String,
        error: RefreshError,
    },
}

impl AccessTokenOutcome {
    /// The token to use, if any
    #[must_use]
    pub fn into_token(self) -> Option<String> {
        match self {
            Self::Missing => None,
            Self::Cached(token) | Self::Refreshed(token) => Some(token),
            Self::RefreshFailed {
                stale_access_token, ..
            } => Some(stale_access_token),
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenPair, RefreshError>>>;

struct Inner {
    encrypter: Encrypter,
    refresher: Arc<dyn TokenRefresher>,
    clock: BoxClock,

    /// The generation of the tokens of each identity. Bumped by
    /// [`TokenManager::initialize`], dropped by [`TokenManager::invalidate`].
    ///
    /// Lock it before `refresh_tokens` when both are needed.
    generations: Mutex<HashMap<String, u64>>,
    next_generation: AtomicU64,

    /// Encrypted refresh tokens, by identity
    refresh_tokens: Mutex<HashMap<String, String>>,

    /// Refreshes in progress, by identity, with the generation they started
    /// from
    in_flight: Mutex<HashMap<String, (u64, RefreshFuture)>>,
}

impl Inner {
    fn generations(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.generations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_tokens(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.refresh_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, (u64, RefreshFuture)>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_refresh_token(&self, key: &str, refresh_token: &str) {
        match self.encrypter.encrypt_to_string(refresh_token) {
            Ok(encrypted) => {
                self.refresh_tokens().insert(key.to_owned(), encrypted);
            }
            Err(error) => {
                warn!(identity.key = key, %error, "Failed to encrypt refresh token");
                self.refresh_tokens().remove(key);
            }
        }
    }

    async fn refresh(&self, key: &str, generation: u64) -> Result<TokenPair, RefreshError> {
        let encrypted = self
            .refresh_tokens()
            .get(key)
            .cloned()
            .ok_or(RefreshError::NoRefreshToken)?;

        let refresh_token = self
            .encrypter
            .decrypt_string(&encrypted)
            .map_err(|_| RefreshError::Decryption)?;

        let response = self
            .refresher
            .refresh(&refresh_token)
            .await
            .map_err(|error| RefreshError::Request(Arc::new(error)))?;

        let pair = TokenPair::from_response(response, self.clock.now());

        let generations = self.generations();
        if generations.get(key) != Some(&generation) {
            return Err(RefreshError::Invalidated);
        }

        // Identity providers may or may not rotate refresh tokens
        if let Some(refresh_token) = &pair.refresh_token {
            self.store_refresh_token(key, refresh_token);
        }
        drop(generations);

        Ok(pair)
    }
}

/// Holds the tokens of every identity and refreshes them before they expire.
///
/// This is a cheap handle, clones share the same state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    #[must_use]
    pub fn new(encrypter: Encrypter, refresher: Arc<dyn TokenRefresher>, clock: BoxClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                encrypter,
                refresher,
                clock,
                generations: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                refresh_tokens: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Store a fresh set of tokens for an identity.
    ///
    /// Returns `false`, without touching anything, if the key or the access
    /// token is empty.
    #[tracing::instrument(name = "tokens.initialize", skip_all, fields(identity.key = key))]
    pub fn initialize(&self, key: &str, pair: &TokenPair, session: &dyn SessionStore) -> bool {
        if key.is_empty() || pair.access_token.is_empty() {
            warn!("Refusing to store tokens without a key or an access token");
            return false;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut generations = self.inner.generations();
        generations.insert(key.to_owned(), generation);

        session.set(key, SessionTokens::from(pair));

        match &pair.refresh_token {
            Some(refresh_token) => self.inner.store_refresh_token(key, refresh_token),
            None => {
                self.inner.refresh_tokens().remove(key);
            }
        }
        drop(generations);

        debug!(expires_at = %pair.expires_at, "Stored tokens");
        true
    }

    /// Get an access token for the identity, refreshing it if it is about to
    /// expire.
    ///
    /// Concurrent callers for the same identity share a single refresh.
    #[tracing::instrument(
        name = "tokens.get_valid_access_token",
        skip_all,
        fields(identity.key = key),
    )]
    pub async fn get_valid_access_token(
        &self,
        key: &str,
        session: &dyn SessionStore,
    ) -> AccessTokenOutcome {
        let Some(tokens) = session.get(key) else {
            return AccessTokenOutcome::Missing;
        };

        if tokens.expires_at - self.inner.clock.now() > REFRESH_BUFFER {
            return AccessTokenOutcome::Cached(tokens.access_token);
        }

        // A session this manager never initialized has no refresh token here
        let Some(generation) = self.inner.generations().get(key).copied() else {
            return AccessTokenOutcome::RefreshFailed {
                stale_access_token: tokens.access_token,
                error: RefreshError::NoRefreshToken,
            };
        };

        match self.shared_refresh(key, generation).await {
            Ok(pair) => {
                let generations = self.inner.generations();
                if generations.get(key) != Some(&generation) {
                    debug!("Tokens were invalidated during the refresh");
                    return AccessTokenOutcome::Missing;
                }
                session.set(key, tokens.refreshed(&pair));
                drop(generations);

                info!(expires_at = %pair.expires_at, "Refreshed access token");
                AccessTokenOutcome::Refreshed(pair.access_token)
            }
            Err(RefreshError::Invalidated) => {
                debug!("Tokens were invalidated during the refresh");
                AccessTokenOutcome::Missing
            }
            Err(error) => {
                warn!(%error, "Failed to refresh access token");
                AccessTokenOutcome::RefreshFailed {
                    stale_access_token: tokens.access_token,
                    error,
                }
            }
        }
    }

    fn shared_refresh(&self, key: &str, generation: u64) -> RefreshFuture {
        let mut in_flight = self.inner.in_flight();
        if let Some((_, future)) = in_flight.get(key).filter(|(g, _)| *g == generation) {
            debug!("Joining refresh in progress");
            return future.clone();
        }

        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_owned();
        let future = async move {
            let result = inner.refresh(&owned_key, generation).await;

            let mut in_flight = inner.in_flight();
            if in_flight
                .get(&owned_key)
                .is_some_and(|(g, _)| *g == generation)
            {
                in_flight.remove(&owned_key);
            }
            drop(in_flight);

            result
        }
        .boxed()
        .shared();

        in_flight.insert(key.to_owned(), (generation, future.clone()));
        future
    }

    /// Forget everything about an identity. Does nothing if nothing is cached.
    ///
    /// A refresh in progress for the identity completes without storing
    /// anything.
    #[tracing::instrument(name = "tokens.invalidate", skip_all, fields(identity.key = key))]
    pub fn invalidate(&self, key: &str, session: &dyn SessionStore) {
        let mut generations = self.inner.generations();
        generations.remove(key);
        session.remove(key);
        self.inner.refresh_tokens().remove(key);
        drop(generations);

        self.inner.in_flight().remove(key);
    }

    /// Returns `true` if a refresh token is held for the identity
    #[must_use]
    pub fn has_refresh_token(&self, key: &str) -> bool {
        self.inner.refresh_tokens().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use ephemera_data_model::{Clock, MockClock};
    use oauth2_types::requests::AccessTokenResponse;
    use rand_chacha::rand_core::SeedableRng;
    use reqwest::StatusCode;

    use super::*;
    use crate::session::MemorySessionStore;

    /// Counts the refreshes and hands out numbered tokens
    #[derive(Default)]
    struct CountingRefresher {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
        rotate: bool,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(
            &self,
            refresh_token: &str,
        ) -> Result<AccessTokenResponse, TokenRequestError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            if self.fail {
                return Err(TokenRequestError::Endpoint {
                    status: StatusCode::BAD_REQUEST,
                    error: None,
                });
            }

            assert!(refresh_token.starts_with("rt"));
            let mut response = AccessTokenResponse::new(format!("at{call}"))
                .with_expires_in(ChronoDuration::seconds(300));
            if self.rotate {
                response = response.with_refresh_token(format!("rt{call}"));
            }
            Ok(response)
        }
    }

    fn manager(
        refresher: CountingRefresher,
    ) -> (TokenManager, Arc<CountingRefresher>, Arc<MockClock>) {
        let mut rng = rand_chacha::ChaChaRng::seed_from_u64(42);
        let refresher = Arc::new(refresher);
        let clock = Arc::new(MockClock::default());
        let manager = TokenManager::new(
            Encrypter::generate(&mut rng),
            refresher.clone(),
            Box::new(clock.clone()),
        );

        (manager, refresher, clock)
    }

    fn pair(clock: &MockClock, ttl_seconds: i64) -> TokenPair {
        let response = AccessTokenResponse::new("at0".to_owned())
            .with_refresh_token("rt0".to_owned())
            .with_expires_in(ChronoDuration::seconds(ttl_seconds));
        TokenPair::from_response(response, clock.now())
    }

    #[test]
    fn test_initialize_rejects_empty_values() {
        let (manager, _refresher, clock) = manager(CountingRefresher::default());
        let session = MemorySessionStore::new();

        assert!(!manager.initialize("", &pair(&clock, 300), &session));

        let mut empty = pair(&clock, 300);
        empty.access_token = String::new();
        assert!(!manager.initialize("demo", &empty, &session));

        assert!(session.get("demo").is_none());
        assert!(!manager.has_refresh_token("demo"));
    }

    #[tokio::test]
    async fn test_missing() {
        let (manager, refresher, _clock) = manager(CountingRefresher::default());
        let session = MemorySessionStore::new();

        assert_matches!(
            manager.get_valid_access_token("demo", &session).await,
            AccessTokenOutcome::Missing
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cached_token_makes_no_call() {
        let (manager, refresher, clock) = manager(CountingRefresher::default());
        let session = MemorySessionStore::new();
        assert!(manager.initialize("demo", &pair(&clock, 300), &session));

        for _ in 0..3 {
            assert_matches!(
                manager.get_valid_access_token("demo", &session).await,
                AccessTokenOutcome::Cached(token) if token == "at0"
            );
        }

        // 61 seconds left is still enough
        clock.advance(ChronoDuration::seconds(239));
        assert_matches!(
            manager.get_valid_access_token("demo", &session).await,
            AccessTokenOutcome::Cached(_)
        );

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_near_expiry() {
        let (manager, refresher, clock) = manager(CountingRefresher {
            rotate: true,
            ..CountingRefresher::default()
        });
        let session = MemorySessionStore::new();
        assert!(manager.initialize("demo", &pair(&clock, 300), &session));

        clock.advance(ChronoDuration::seconds(250));
        assert_matches!(
            manager.get_valid_access_token("demo", &session).await,
            AccessTokenOutcome::Refreshed(token) if token == "at1"
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        // The session now holds the new token
        let tokens = session.get("demo").unwrap();
        assert_eq!(tokens.access_token, "at1");
        assert_eq!(tokens.expires_at, clock.now() + ChronoDuration::seconds(300));

        // And it is served from the cache
        assert_matches!(
            manager.get_valid_access_token("demo", &session).await,
            AccessTokenOutcome::Cached(token) if token == "at1"
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert!(manager.inner.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_failure_returns_stale_token() {
        let (manager, _refresher, clock) = manager(CountingRefresher {
            fail: true,
            ..CountingRefresher::default()
        });
        let session = MemorySessionStore::new();
        assert!(manager.initialize("demo", &pair(&clock, 300), &session));

        clock.advance(ChronoDuration::seconds(400));
        let outcome = manager.get_valid_access_token("demo", &session).await;
        assert_matches!(
            &outcome,
            AccessTokenOutcome::RefreshFailed {
                stale_access_token,
                error: RefreshError::Request(_),
            } if stale_access_token == "at0"
        );
        assert_eq!(outcome.into_token().as_deref(), Some("at0"));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let (manager, refresher, clock) = manager(CountingRefresher::default());
        let session = MemorySessionStore::new();

        let mut pair = pair(&clock, 30);
        pair.refresh_token = None;
        assert!(manager.initialize("demo", &pair, &session));

        assert_matches!(
            manager.get_valid_access_token("demo", &session).await,
            AccessTokenOutcome::RefreshFailed {
                error: RefreshError::NoRefreshToken,
                ..
            }
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tampered_refresh_token() {
        let (manager, refresher, clock) = manager(CountingRefresher::default());
        let session = MemorySessionStore::new();
        assert!(manager.initialize("demo", &pair(&clock, 30), &session));

        manager
            .inner
            .refresh_tokens()
            .insert("demo".to_owned(), "00:00:00".to_owned());

        assert_matches!(
            manager.get_valid_access_token("demo", &session).await,
            AccessTokenOutcome::RefreshFailed {
                error: RefreshError::Decryption,
                ..
            }
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_call() {
        let (manager, refresher, clock) = manager(CountingRefresher {
            delay: Duration::from_millis(100),
            ..CountingRefresher::default()
        });
        let session = MemorySessionStore::new();
        assert!(manager.initialize("demo", &pair(&clock, 30), &session));

        let (a, b, c) = tokio::join!(
            manager.get_valid_access_token("demo", &session),
            manager.get_valid_access_token("demo", &session),
            manager.get_valid_access_token("demo", &session),
        );

        for outcome in [a, b, c] {
            assert_matches!(outcome, AccessTokenOutcome::Refreshed(token) if token == "at1");
        }
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert!(manager.inner.in_flight().is_empty());

        // The refresh token was not rotated, so the old one is kept
        assert!(manager.has_refresh_token("demo"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_id_token() {
        let (manager, _refresher, clock) = manager(CountingRefresher::default());
        let session = MemorySessionStore::new();

        let mut pair = pair(&clock, 30);
        pair.id_token = Some("idt0".to_owned());
        assert!(manager.initialize("demo", &pair, &session));

        assert_matches!(
            manager.get_valid_access_token("demo", &session).await,
            AccessTokenOutcome::Refreshed(token) if token == "at1"
        );

        let tokens = session.get("demo").unwrap();
        assert_eq!(tokens.access_token, "at1");
        assert_eq!(tokens.id_token.as_deref(), Some("idt0"));
    }

    #[tokio::test]
    async fn test_invalidate_during_refresh() {
        let (manager, refresher, clock) = manager(CountingRefresher {
            delay: Duration::from_millis(100),
            rotate: true,
            ..CountingRefresher::default()
        });
        let session = MemorySessionStore::new();
        assert!(manager.initialize("demo", &pair(&clock, 30), &session));

        let (outcome, ()) = tokio::join!(manager.get_valid_access_token("demo", &session), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            manager.invalidate("demo", &session);
        });

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_matches!(outcome, AccessTokenOutcome::Missing);

        // Neither the rotated refresh token nor the session came back
        assert!(!manager.has_refresh_token("demo"));
        assert!(session.get("demo").is_none());
        assert!(manager.inner.in_flight().is_empty());

        // Logging in again starts from a clean slate
        assert!(manager.initialize("demo", &pair(&clock, 300), &session));
        assert_matches!(
            manager.get_valid_access_token("demo", &session).await,
            AccessTokenOutcome::Cached(token) if token == "at0"
        );
    }

    #[tokio::test]
    async fn test_invalidate() {
        let (manager, _refresher, clock) = manager(CountingRefresher::default());
        let session = MemorySessionStore::new();

        // Nothing to forget yet
        manager.invalidate("demo", &session);

        assert!(manager.initialize("demo", &pair(&clock, 300), &session));
        assert!(manager.has_refresh_token("demo"));

        manager.invalidate("demo", &session);
        assert!(!manager.has_refresh_token("demo"));
        assert_matches!(
            manager.get_valid_access_token("demo", &session).await,
            AccessTokenOutcome::Missing
        );
    }
}
