// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Integration with a Stalwart mail server.
//!
//! The management API is reached through [`StalwartConnection`], which
//! implements [`ephemera_backends::MailAdmin`]. [`MailProvider`] builds the
//! [`ephemera_backends::MailBackend`] contract on top of it, in one of the two
//! flavours of deployment. The [`predeploy`] module makes the mail backend
//! discover an identity when it cannot be created through the API.

#![allow(clippy::module_name_repetitions)]

mod connection;
mod jmap;
pub mod predeploy;
mod provider;
mod smtp;

pub use self::{
    connection::{StalwartAuth, StalwartConnection},
    jmap::JmapClient,
    provider::{MailProvider, MailServices},
    smtp::{Handshake, HandshakeOutcome, SmtpMode, SmtpSubmission},
};
