// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use serde::Serialize;

use crate::InvalidTransitionError;

/// The steps of the mailbox discovery protocol.
///
/// ```text
/// TokenExchangeRequested -> TokenExchanged -> HandshakeAttempted
///     -> DiscoveryPending -> Discovered | DiscoveryFailed
/// ```
///
/// `DiscoveryFailed` can be reached from any non-terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryState {
    #[default]
    TokenExchangeRequested,
    TokenExchanged,
    HandshakeAttempted,
    DiscoveryPending,
    Discovered,
    DiscoveryFailed,
}

impl DiscoveryState {
    /// Returns `true` if no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Discovered | Self::DiscoveryFailed)
    }

    /// Mark the token exchange as done.
    ///
    /// # Errors
    ///
    /// Returns an error unless the exchange was requested.
    pub fn exchanged(self) -> Result<Self, InvalidTransitionError> {
        match self {
            Self::TokenExchangeRequested => Ok(Self::TokenExchanged),
            _ => Err(InvalidTransitionError),
        }
    }

    /// Mark the authenticated handshake as attempted.
    ///
    /// # Errors
    ///
    /// Returns an error unless a token was obtained.
    pub fn handshake_attempted(self) -> Result<Self, InvalidTransitionError> {
        match self {
            Self::TokenExchanged => Ok(Self::HandshakeAttempted),
            _ => Err(InvalidTransitionError),
        }
    }

    /// Start waiting for the mail backend to materialize the principal.
    ///
    /// # Errors
    ///
    /// Returns an error unless the handshake was attempted.
    pub fn pending(self) -> Result<Self, InvalidTransitionError> {
        match self {
            Self::HandshakeAttempted => Ok(Self::DiscoveryPending),
            _ => Err(InvalidTransitionError),
        }
    }

    /// Mark the mailbox as discovered.
    ///
    /// # Errors
    ///
    /// Returns an error unless discovery was pending.
    pub fn discovered(self) -> Result<Self, InvalidTransitionError> {
        match self {
            Self::DiscoveryPending => Ok(Self::Discovered),
            _ => Err(InvalidTransitionError),
        }
    }

    /// Mark the discovery as failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the protocol already finished.
    pub fn failed(self) -> Result<Self, InvalidTransitionError> {
        if self.is_terminal() {
            Err(InvalidTransitionError)
        } else {
            Ok(Self::DiscoveryFailed)
        }
    }
}
