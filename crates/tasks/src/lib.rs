// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Background tasks. For now, only the reconciler which deletes demo
//! identities once they outlived the expiration policy.

use std::sync::LazyLock;

use opentelemetry::metrics::Meter;

mod deletion;
mod reconciler;
mod report;

pub use self::{
    deletion::{DeletionReport, StepResult},
    reconciler::{ExpirationReconciler, ReconcilerPhase, ReconcilerStatus},
    report::{ReconcilerStats, TickReport},
};

static METER: LazyLock<Meter> = LazyLock::new(|| {
    let scope = opentelemetry::InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(opentelemetry_semantic_conventions::SCHEMA_URL)
        .build();

    opentelemetry::global::meter_with_scope(scope)
});
