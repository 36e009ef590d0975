// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Deletion of one identity across the three backends.
//!
//! The mail backend goes first, then the identity provider, then the webmail
//! store. Each step is recorded independently, and a failed step never
//! prevents the next ones from running.

use ephemera_backends::{IdentityProvider, MailBackend, MailboxDeletion, WebmailStore};
use ephemera_data_model::Identity;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub success: bool,
    pub message: String,
}

impl StepResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(error: &anyhow::Error) -> Self {
        Self {
            success: false,
            message: format!("{error:#}"),
        }
    }
}

/// What happened to one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub identity_id: String,
    pub username: String,
    pub email: Option<String>,
    pub mail: MailboxDeletion,
    pub logout: StepResult,
    pub idp: StepResult,
    pub webmail: StepResult,

    /// The mailbox and the identity are both gone. The webmail record is
    /// not taken into account.
    pub success: bool,
}

#[tracing::instrument(
    name = "reconciler.delete_identity",
    skip_all,
    fields(
        user.id = identity.id,
        user.username = identity.username,
    ),
)]
pub(crate) async fn delete_identity(
    identity: &Identity,
    idp: &dyn IdentityProvider,
    mail: &dyn MailBackend,
    webmail: &dyn WebmailStore,
) -> DeletionReport {
    let mail_result = match &identity.email {
        Some(email) => mail.delete_mailbox(email).await,
        None => MailboxDeletion {
            success: true,
            message: "no email, no mailbox".to_owned(),
            status: None,
        },
    };
    if !mail_result.success {
        warn!(mail.message = %mail_result.message, "Failed to delete the mailbox");
    }

    // Ending the sessions is best effort, the identity is deleted anyway
    let logout = match idp.logout_sessions(&identity.id).await {
        Ok(()) => StepResult::ok("sessions ended"),
        Err(error) => {
            warn!(error = %format!("{error:#}"), "Failed to end the sessions");
            StepResult::failed(&error)
        }
    };

    let idp_result = match idp.delete_identity(&identity.id).await {
        Ok(true) => StepResult::ok("deleted"),
        Ok(false) => StepResult::ok(MailboxDeletion::ALREADY_DELETED),
        Err(error) => {
            warn!(error = %format!("{error:#}"), "Failed to delete the identity");
            StepResult::failed(&error)
        }
    };

    let webmail_result = delete_webmail_record(identity, webmail).await;

    let success = mail_result.success && idp_result.success;
    if success {
        info!("Identity deleted");
    }

    DeletionReport {
        identity_id: identity.id.clone(),
        username: identity.username.clone(),
        email: identity.email.clone(),
        mail: mail_result,
        logout,
        idp: idp_result,
        webmail: webmail_result,
        success,
    }
}

/// The webmail client may have recorded the identity by email or by
/// username, depending on how the user logged in.
async fn delete_webmail_record(identity: &Identity, webmail: &dyn WebmailStore) -> StepResult {
    let primary = identity.webmail_key();
    match webmail.delete(primary).await {
        Ok(deletion) if deletion.deleted => return StepResult::ok("deleted"),
        Ok(_) => {}
        Err(error) => {
            warn!(error = %format!("{error:#}"), "Failed to delete the webmail record");
            return StepResult::failed(&error);
        }
    }

    if primary == identity.username {
        return StepResult::ok("no webmail record");
    }

    match webmail.delete(&identity.username).await {
        Ok(deletion) if deletion.deleted => StepResult::ok("deleted by username"),
        Ok(_) => StepResult::ok("no webmail record"),
        Err(error) => {
            warn!(error = %format!("{error:#}"), "Failed to delete the webmail record");
            StepResult::failed(&error)
        }
    }
}
