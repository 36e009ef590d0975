// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use tokio::signal::unix::{Signal, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Listens for SIGTERM and SIGINT and drives the shutdown of the daemon.
///
/// The first signal triggers the graceful shutdown, in which the daemon runs
/// its final expiration pass. A second signal, or the timeout expiring,
/// aborts it.
///
/// Work that must finish before the process exits is spawned on the
/// [`TaskTracker`].
pub struct ShutdownManager {
    abort_token: CancellationToken,
    graceful_token: CancellationToken,
    task_tracker: TaskTracker,
    sigterm: Signal,
    sigint: Signal,
    timeout: Duration,
}

impl ShutdownManager {
    /// Create a new shutdown manager, installing the signal handlers
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler could not be installed
    pub fn new(timeout: Duration) -> Result<Self, std::io::Error> {
        let abort_token = CancellationToken::new();
        let graceful_token = abort_token.child_token();
        let sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
        let sigint = tokio::signal::unix::signal(SignalKind::interrupt())?;

        Ok(Self {
            abort_token,
            graceful_token,
            task_tracker: TaskTracker::new(),
            sigterm,
            sigint,
            timeout,
        })
    }

    #[must_use]
    pub fn task_tracker(&self) -> &TaskTracker {
        &self.task_tracker
    }

    /// Cancelled when the shutdown is aborted
    #[must_use]
    pub fn abort_token(&self) -> CancellationToken {
        self.abort_token.clone()
    }

    /// Cancelled on the first signal, or when the shutdown is aborted
    #[must_use]
    pub fn graceful_token(&self) -> CancellationToken {
        self.graceful_token.clone()
    }

    /// Run until the tracked tasks are done, or the shutdown got aborted.
    pub async fn run(mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Shutdown signal received (SIGTERM), shutting down");
            },
            _ = self.sigint.recv() => {
                tracing::info!("Shutdown signal received (SIGINT), shutting down");
            },
            () = self.graceful_token.cancelled() => {
                tracing::info!("Shutting down");
            },
        };

        self.graceful_token.cancel();
        self.task_tracker.close();

        let timeout = tokio::time::sleep(self.timeout);
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::warn!("Second shutdown signal received (SIGTERM), abort");
            },
            _ = self.sigint.recv() => {
                tracing::warn!("Second shutdown signal received (SIGINT), abort");
            },
            () = timeout => {
                tracing::warn!("Shutdown timeout reached, abort");
            },
            () = self.task_tracker.wait() => {
                tracing::info!("All tasks are done, exiting");
                return;
            },
        }

        self.abort_token.cancel();
        self.task_tracker.wait().await;
        tracing::info!("Shutdown aborted");
    }
}
