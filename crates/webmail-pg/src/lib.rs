// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A [`WebmailStore`] backed by the Postgres database of the webmail client.

mod execute;
mod table;

use anyhow::Context;
use async_trait::async_trait;
use ephemera_backends::{BackendError, ErrorKind, WebmailDeletion, WebmailStore};
use sqlx::PgPool;

pub use self::table::{InvalidIdentifier, WebmailTable};
use self::execute::ExecuteExt as _;

/// Attach a classification to database errors which mean the store could not
/// be reached
fn classify(error: sqlx::Error) -> anyhow::Error {
    let unreachable = matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_)
    );

    let error = anyhow::Error::new(error);
    if unreachable {
        error.context(BackendError::new(
            ErrorKind::NetworkOrTimeout,
            "the webmail database is unreachable",
        ))
    } else {
        error
    }
}

pub struct PgWebmailStore {
    pool: PgPool,
    exists_query: String,
    delete_query: String,
}

impl PgWebmailStore {
    #[must_use]
    pub fn new(pool: PgPool, table: &WebmailTable) -> Self {
        Self {
            pool,
            exists_query: table.exists_query(),
            delete_query: table.delete_query(),
        }
    }
}

#[async_trait]
impl WebmailStore for PgWebmailStore {
    #[tracing::instrument(name = "db.webmail.check_connectivity", skip_all, err(Debug))]
    async fn check_connectivity(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(classify)
            .context("Failed to reach the webmail database")?;

        Ok(())
    }

    #[tracing::instrument(
        name = "db.webmail.exists",
        skip_all,
        fields(webmail.key = key, db.query.text),
        err(Debug),
    )]
    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
        let exists: bool = sqlx::query_scalar(&self.exists_query)
            .bind(key)
            .traced()
            .fetch_one(&self.pool)
            .await
            .map_err(classify)
            .context("Failed to look up the webmail record")?;

        Ok(exists)
    }

    #[tracing::instrument(
        name = "db.webmail.delete",
        skip_all,
        fields(webmail.key = key, db.query.text),
        err(Debug),
    )]
    async fn delete(&self, key: &str) -> Result<WebmailDeletion, anyhow::Error> {
        let res = sqlx::query(&self.delete_query)
            .bind(key)
            .traced()
            .execute(&self.pool)
            .await
            .map_err(classify)
            .context("Failed to delete the webmail record")?;

        Ok(WebmailDeletion {
            deleted: res.rows_affected() > 0,
        })
    }
}
