// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::Arc;

use serde::Serialize;

/// The result of deleting a webmail session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebmailDeletion {
    /// `false` if no record matched the key
    pub deleted: bool,
}

/// The store of the webmail client, which records the users who logged in at
/// least once.
#[async_trait::async_trait]
pub trait WebmailStore: Send + Sync {
    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    async fn check_connectivity(&self) -> Result<(), anyhow::Error>;

    /// Check whether a record exists for the given key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error>;

    /// Delete the records for the given key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    async fn delete(&self, key: &str) -> Result<WebmailDeletion, anyhow::Error>;
}

#[async_trait::async_trait]
impl<T: WebmailStore + ?Sized> WebmailStore for Arc<T> {
    async fn check_connectivity(&self) -> Result<(), anyhow::Error> {
        (**self).check_connectivity().await
    }

    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
        (**self).exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<WebmailDeletion, anyhow::Error> {
        (**self).delete(key).await
    }
}
