// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{process::ExitCode, time::Duration};

use anyhow::Context;
use clap::Parser;
use ephemera_backends::MailBackend;
use ephemera_config::{ConfigurationSection, RootConfig};
use figment::Figment;
use tracing::{error, info, warn};

use crate::{
    pidfile::PidFile,
    shutdown::ShutdownManager,
    util::{
        http_client_from_config, mail_provider_from_config, proxy_settings_from_config,
        reconciler_from_config,
    },
};

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// Push the PROXY protocol settings to the mail backend before starting
    #[arg(long)]
    configure_proxy: bool,

    /// How long to wait for the final expiration pass on shutdown, in
    /// seconds
    #[arg(long, default_value_t = 60)]
    shutdown_timeout: u64,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;

        // Only one daemon at a time against the same backends
        let pidfile = PidFile::acquire(&config.expiration.pid_file)?;

        let http_client = http_client_from_config(&config.http)?;

        if self.configure_proxy {
            let mail = mail_provider_from_config(&config.mail, &http_client)?;
            mail.configure_proxy(&proxy_settings_from_config(&config.mail))
                .await
                .context("could not configure the PROXY protocol on the mail backend")?;
        }

        let reconciler = reconciler_from_config(&config, &http_client).await?;
        let shutdown = ShutdownManager::new(Duration::from_secs(self.shutdown_timeout))?;

        if !reconciler.start().await {
            error!("The expiration reconciler did not start, check the logs above");
            return Ok(ExitCode::FAILURE);
        }

        info!(
            max_session_duration_minutes = config.expiration.max_session_duration_minutes,
            cleanup_interval = ?config.expiration.cleanup_interval,
            "Expiration reconciler running"
        );

        let graceful = shutdown.graceful_token();
        let abort = shutdown.abort_token();
        let final_pass = reconciler.clone();
        shutdown.task_tracker().spawn(async move {
            graceful.cancelled().await;

            tokio::select! {
                result = final_pass.shutdown() => match result {
                    Ok(report) => info!(
                        scanned = report.scanned,
                        deleted = report.deleted,
                        errors = report.errors,
                        "Final expiration pass done"
                    ),
                    Err(e) => error!(
                        error = &*e as &dyn std::error::Error,
                        "Final expiration pass failed"
                    ),
                },
                () = abort.cancelled() => {
                    warn!("Final expiration pass aborted");
                },
            }
        });

        shutdown.run().await;

        let stats = reconciler.status().stats;
        info!(
            runs = stats.runs,
            deleted = stats.deleted,
            errors = stats.errors,
            "Expiration reconciler stopped"
        );

        drop(pidfile);
        Ok(ExitCode::SUCCESS)
    }
}
