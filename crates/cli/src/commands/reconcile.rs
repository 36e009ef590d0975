// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use clap::Parser;
use ephemera_config::{ConfigurationSection, RootConfig};
use ephemera_data_model::EligibilityMode;
use figment::Figment;
use tracing::{info, warn};

use crate::{
    pidfile::{DaemonState, daemon_state},
    util::{http_client_from_config, reconciler_from_config},
};

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// Delete every identity having a webmail record, whatever its age
    #[arg(long)]
    expire_all: bool,
}

impl Options {
    #[tracing::instrument(name = "cli.reconcile", skip_all)]
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;

        if let DaemonState::Running(pid) = daemon_state(&config.expiration.pid_file)? {
            warn!(pid, "The daemon is running, its passes may overlap with this one");
        }

        let mode = if self.expire_all {
            EligibilityMode::Forced
        } else if config.expiration.max_session_duration_minutes == 0 {
            info!("Expiration is disabled, nothing to do");
            return Ok(ExitCode::SUCCESS);
        } else {
            EligibilityMode::Aged
        };

        let http_client = http_client_from_config(&config.http)?;
        let reconciler = reconciler_from_config(&config, &http_client).await?;

        let Some(report) = reconciler.run_once(mode).await? else {
            warn!("The pass got skipped");
            return Ok(ExitCode::FAILURE);
        };

        super::print_json(&report)?;

        if report.errors > 0 {
            return Ok(ExitCode::FAILURE);
        }

        Ok(ExitCode::SUCCESS)
    }
}
