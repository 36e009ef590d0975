// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::Arc;

use ephemera_data_model::{Identity, NewIdentity};

/// The admin API of the identity provider owning the demo identities.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Check that the identity provider is reachable and accepts our admin
    /// credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity provider is unreachable or rejects the
    /// credentials.
    async fn check_connectivity(&self) -> Result<(), anyhow::Error>;

    /// List all the identities. The entries may be brief representations,
    /// use [`IdentityProvider::get_identity`] to get the full details.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity provider is unreachable.
    async fn list_identities(&self) -> Result<Vec<Identity>, anyhow::Error>;

    /// Get the full details of an identity.
    ///
    /// Returns `None` if the identity does not exist.
    ///
    /// # Parameters
    ///
    /// * `id` - The identity provider's ID of the identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity provider is unreachable.
    async fn get_identity(&self, id: &str) -> Result<Option<Identity>, anyhow::Error>;

    /// Create an identity, returning its ID.
    ///
    /// # Parameters
    ///
    /// * `identity` - The identity to create.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity provider is unreachable or the
    /// identity could not be created.
    async fn create_identity(&self, identity: &NewIdentity) -> Result<String, anyhow::Error>;

    /// Delete an identity.
    ///
    /// Returns `false` if the identity was already gone.
    ///
    /// # Parameters
    ///
    /// * `id` - The identity provider's ID of the identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity provider is unreachable or the
    /// identity could not be deleted.
    async fn delete_identity(&self, id: &str) -> Result<bool, anyhow::Error>;

    /// End all the sessions of an identity.
    ///
    /// # Parameters
    ///
    /// * `id` - The identity provider's ID of the identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity provider is unreachable or the
    /// sessions could not be ended.
    async fn logout_sessions(&self, id: &str) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl<T: IdentityProvider + Send + Sync + ?Sized> IdentityProvider for &T {
    async fn check_connectivity(&self) -> Result<(), anyhow::Error> {
        (**self).check_connectivity().await
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, anyhow::Error> {
        (**self).list_identities().await
    }

    async fn get_identity(&self, id: &str) -> Result<Option<Identity>, anyhow::Error> {
        (**self).get_identity(id).await
    }

    async fn create_identity(&self, identity: &NewIdentity) -> Result<String, anyhow::Error> {
        (**self).create_identity(identity).await
    }

    async fn delete_identity(&self, id: &str) -> Result<bool, anyhow::Error> {
        (**self).delete_identity(id).await
    }

    async fn logout_sessions(&self, id: &str) -> Result<(), anyhow::Error> {
        (**self).logout_sessions(id).await
    }
}

// Implement for Arc<T> where T: IdentityProvider
#[async_trait::async_trait]
impl<T: IdentityProvider + ?Sized> IdentityProvider for Arc<T> {
    async fn check_connectivity(&self) -> Result<(), anyhow::Error> {
        (**self).check_connectivity().await
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, anyhow::Error> {
        (**self).list_identities().await
    }

    async fn get_identity(&self, id: &str) -> Result<Option<Identity>, anyhow::Error> {
        (**self).get_identity(id).await
    }

    async fn create_identity(&self, identity: &NewIdentity) -> Result<String, anyhow::Error> {
        (**self).create_identity(identity).await
    }

    async fn delete_identity(&self, id: &str) -> Result<bool, anyhow::Error> {
        (**self).delete_identity(id).await
    }

    async fn logout_sessions(&self, id: &str) -> Result<(), anyhow::Error> {
        (**self).logout_sessions(id).await
    }
}
