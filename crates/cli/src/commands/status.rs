// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use ephemera_config::{ConfigurationSectionExt, ExpirationConfig};
use ephemera_data_model::ExpirationPolicy;
use figment::Figment;
use serde::Serialize;

use crate::{
    pidfile::{DaemonState, daemon_state},
    util::expiration_policy_from_config,
};

#[derive(Parser, Debug)]
pub(super) struct Options {}

#[derive(Debug, Serialize)]
struct StatusReport {
    daemon: DaemonState,
    pid_file: Utf8PathBuf,
    policy: ExpirationPolicy,
    expiration_enabled: bool,
    cleanup_interval_seconds: u64,
}

impl StatusReport {
    /// Exit codes in the fashion of init scripts
    fn exit_code(&self) -> ExitCode {
        match self.daemon {
            DaemonState::Running(_) => ExitCode::SUCCESS,
            DaemonState::Stale(_) => ExitCode::from(1),
            DaemonState::Stopped => ExitCode::from(3),
        }
    }
}

impl Options {
    #[allow(clippy::unused_async)]
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let config =
            ExpirationConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;

        let policy = expiration_policy_from_config(&config);
        let report = StatusReport {
            daemon: daemon_state(&config.pid_file)?,
            pid_file: config.pid_file,
            expiration_enabled: policy.is_enabled(),
            policy,
            cleanup_interval_seconds: config.cleanup_interval.as_secs(),
        };

        super::print_json(&report)?;
        Ok(report.exit_code())
    }
}
