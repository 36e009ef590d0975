// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use serde::{Deserialize, Serialize};
use serde_with::{OneOrMany, formats::PreferMany, serde_as, skip_serializing_none};

/// The kind of a mail principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrincipalType {
    Individual,
    Group,
    List,
    Domain,
    Tenant,
    #[serde(other)]
    Other,
}

/// A mailbox account, as represented by the mail backend.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Option<u64>,

    #[serde(rename = "type")]
    pub kind: PrincipalType,

    /// The canonical name of the principal, used to address it in the admin
    /// API
    pub name: String,

    #[serde(default)]
    #[serde_as(as = "OneOrMany<_, PreferMany>")]
    pub emails: Vec<String>,

    pub description: Option<String>,
}

impl Principal {
    /// An individual account for the given mailbox.
    #[must_use]
    pub fn individual(name: String, email: String) -> Self {
        Self {
            id: None,
            kind: PrincipalType::Individual,
            name,
            emails: vec![email],
            description: Some("Ephemera demo mailbox".to_owned()),
        }
    }

    /// Returns `true` if this principal receives mail for the given address.
    #[must_use]
    pub fn has_email(&self, email: &str) -> bool {
        self.emails.iter().any(|e| e.eq_ignore_ascii_case(email))
    }
}
