// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

#![allow(clippy::module_name_repetitions)]

use thiserror::Error;

pub mod clock;
pub(crate) mod discovery;
pub(crate) mod identity;
pub(crate) mod policy;
pub(crate) mod principal;
pub(crate) mod tokens;

/// Error when an invalid state transition is attempted.
#[derive(Debug, Error)]
#[error("invalid state transition")]
pub struct InvalidTransitionError;

pub use self::{
    clock::{BoxClock, Clock, MockClock, SystemClock},
    discovery::DiscoveryState,
    identity::{Identity, NewIdentity},
    policy::{Eligibility, EligibilityMode, ExpirationPolicy},
    principal::{Principal, PrincipalType},
    tokens::{DEFAULT_ACCESS_TOKEN_TTL, REFRESH_BUFFER, TokenPair},
};
