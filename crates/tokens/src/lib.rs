// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Keeps the tokens of demo identities, and refreshes them transparently.
//!
//! Access and ID tokens live in the session of the identity, through a
//! [`SessionStore`]. Refresh tokens are kept encrypted by the
//! [`TokenManager`], independently of the session lifetime.

mod manager;
mod refresher;
mod session;

pub use self::{
    manager::{AccessTokenOutcome, RefreshError, TokenManager},
    refresher::{OidcTokenRefresher, TokenRefresher},
    session::{MemorySessionStore, SessionStore, SessionTokens},
};
