// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! [OAuth 2.0] token endpoint types.
//!
//! Only the grants needed to manage demo identities are modelled here: the
//! resource owner password grant, the refresh token grant, the client
//! credentials grant and the [token exchange] grant.
//!
//! [OAuth 2.0]: https://oauth.net/2/
//! [token exchange]: https://www.rfc-editor.org/rfc/rfc8693

#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod errors;
pub mod requests;

#[cfg(test)]
mod test_utils;
