// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A client for the [OAuth 2.0] Token endpoint of an identity provider.
//!
//! # Features
//!
//! - Grant Types:
//!   - [Resource Owner Password Credentials](https://www.rfc-editor.org/rfc/rfc6749#section-4.3)
//!   - [Client Credentials](https://www.rfc-editor.org/rfc/rfc6749#section-4.4)
//!   - [Refresh Token](https://openid.net/specs/openid-connect-core-1_0.html#RefreshTokens)
//!   - [Token Exchange](https://www.rfc-editor.org/rfc/rfc8693)
//! - Client authentication with `none`, `client_secret_basic` and
//!   `client_secret_post`
//!
//! [OAuth 2.0]: https://oauth.net/2/

#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod requests;
pub mod types;
