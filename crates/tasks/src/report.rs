// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use ephemera_data_model::EligibilityMode;
use opentelemetry::{Key, KeyValue, metrics::Counter};
use serde::Serialize;

use crate::{METER, deletion::DeletionReport};

static SCANNED_COUNTER: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("ephemera.reconciler.identities_scanned")
        .with_description("Number of identities looked at by the reconciler")
        .with_unit("{identity}")
        .build()
});

static EXPIRED_COUNTER: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("ephemera.reconciler.identities_expired")
        .with_description("Number of identities found eligible for deletion")
        .with_unit("{identity}")
        .build()
});

static DELETED_COUNTER: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("ephemera.reconciler.identities_deleted")
        .with_description(
            "Number of identities deleted from the mail backend and the identity provider",
        )
        .with_unit("{identity}")
        .build()
});

static ERROR_COUNTER: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("ephemera.reconciler.errors")
        .with_description("Number of errors encountered by the reconciler")
        .with_unit("{error}")
        .build()
});

pub(crate) static TICK_COUNTER: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("ephemera.reconciler.ticks")
        .with_description("Number of reconciler ticks, run or skipped")
        .with_unit("{tick}")
        .build()
});

pub(crate) const MODE: Key = Key::from_static_str("mode");
pub(crate) const RESULT: Key = Key::from_static_str("result");

pub(crate) fn mode_attribute(mode: EligibilityMode) -> KeyValue {
    KeyValue::new(
        MODE,
        match mode {
            EligibilityMode::Aged => "aged",
            EligibilityMode::Forced => "forced",
        },
    )
}

/// What a single pass of the reconciler did.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub mode: EligibilityMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scanned: u64,
    pub expired: u64,
    pub deleted: u64,
    pub errors: u64,
    pub deletions: Vec<DeletionReport>,
}

impl TickReport {
    pub(crate) fn new(mode: EligibilityMode, started_at: DateTime<Utc>) -> Self {
        Self {
            mode,
            started_at,
            finished_at: started_at,
            scanned: 0,
            expired: 0,
            deleted: 0,
            errors: 0,
            deletions: Vec::new(),
        }
    }

    pub(crate) fn record_deletion(&mut self, report: DeletionReport) {
        if report.success {
            self.deleted += 1;
        } else {
            self.errors += 1;
        }
        self.deletions.push(report);
    }

    pub(crate) fn export(&self) {
        let attributes = [mode_attribute(self.mode)];
        SCANNED_COUNTER.add(self.scanned, &attributes);
        EXPIRED_COUNTER.add(self.expired, &attributes);
        DELETED_COUNTER.add(self.deleted, &attributes);
        ERROR_COUNTER.add(self.errors, &attributes);
    }
}

/// Counters accumulated since the reconciler was created.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcilerStats {
    pub runs: u64,
    pub skipped_ticks: u64,
    pub failed_runs: u64,
    pub scanned: u64,
    pub expired: u64,
    pub deleted: u64,
    pub errors: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
}

impl ReconcilerStats {
    pub(crate) fn accumulate(&mut self, report: &TickReport) {
        self.runs += 1;
        self.scanned += report.scanned;
        self.expired += report.expired;
        self.deleted += report.deleted;
        self.errors += report.errors;
        self.last_run_at = Some(report.finished_at);
        self.last_report = Some(report.clone());
    }

    pub(crate) fn record_failure(&mut self, at: DateTime<Utc>) {
        self.runs += 1;
        self.failed_runs += 1;
        self.errors += 1;
        self.last_run_at = Some(at);
    }
}
