// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Methods to interact with the Token endpoint.

pub mod client_credentials;
pub mod password;
pub mod refresh_token;
pub mod token;
pub mod token_exchange;
