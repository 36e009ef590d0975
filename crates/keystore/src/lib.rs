// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Symmetric encryption of secrets held in memory, like refresh tokens.

mod encrypter;

pub use self::encrypter::{DecryptError, Encrypter};
