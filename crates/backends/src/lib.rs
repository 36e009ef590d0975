// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! The contracts of the three backends a demo identity spans: the identity
//! provider, the mail system and the webmail session store.
//!
//! Each backend is reduced to the handful of operations the provisioning and
//! reaping logic needs. Concrete implementations live in their own crates,
//! and the [`mock`] module has in-memory implementations recording every
//! call they receive in a shared [`mock::CallLog`].

#![allow(clippy::module_name_repetitions)]

mod error;
mod idp;
mod mail;
pub mod mock;
mod webmail;

pub use self::{
    error::{BackendError, ErrorKind},
    idp::IdentityProvider,
    mail::{
        MailAdmin, MailBackend, MailOptions, MailProviderKind, MailboxDeletion,
        MailboxVerification, ProxySettings, SentMail, SettingsUpdate, SmtpAuth,
    },
    webmail::{WebmailDeletion, WebmailStore},
};
