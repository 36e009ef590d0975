// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::Identity;

/// How long demo identities are allowed to live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpirationPolicy {
    /// Maximum age of an identity, in minutes. `0` disables expiration
    /// entirely.
    pub max_session_duration_minutes: u64,
}

impl ExpirationPolicy {
    #[must_use]
    pub const fn new(max_session_duration_minutes: u64) -> Self {
        Self {
            max_session_duration_minutes,
        }
    }

    /// Returns `true` if expiration is enabled by this policy.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.max_session_duration_minutes > 0
    }

    /// The maximum age of an identity under this policy.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        let minutes = i64::try_from(self.max_session_duration_minutes).unwrap_or(i64::MAX);
        Duration::try_minutes(minutes).unwrap_or(Duration::MAX)
    }

    /// Decide whether an identity should be expired.
    ///
    /// `has_webmail_record` tells whether the webmail store has a record for
    /// the identity's email.
    #[must_use]
    pub fn evaluate(
        &self,
        identity: &Identity,
        has_webmail_record: bool,
        now: DateTime<Utc>,
        mode: EligibilityMode,
    ) -> Eligibility {
        if !identity.enabled {
            return Eligibility::Disabled;
        }

        if identity.email.is_none() {
            return Eligibility::MissingEmail;
        }

        if !has_webmail_record {
            return Eligibility::NoWebmailRecord;
        }

        let age = identity.age(now);
        match mode {
            EligibilityMode::Forced => Eligibility::Eligible { age },
            EligibilityMode::Aged if age > self.max_age() => Eligibility::Eligible { age },
            EligibilityMode::Aged => Eligibility::TooYoung { age },
        }
    }
}

/// Whether the age of an identity is taken into account when evaluating its
/// eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityMode {
    /// Regular reconciliation: only identities older than the policy allows
    Aged,

    /// Shutdown pass: the age condition is ignored
    Forced,
}

/// The outcome of an eligibility evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Eligibility {
    Eligible {
        #[serde(skip)]
        age: Duration,
    },
    Disabled,
    MissingEmail,
    NoWebmailRecord,
    TooYoung {
        #[serde(skip)]
        age: Duration,
    },
}

impl Eligibility {
    /// Returns `true` if the identity should be deleted.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible { .. })
    }
}
