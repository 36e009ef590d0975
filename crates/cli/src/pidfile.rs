// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A PID file, so that only one daemon runs against the same backends.

use anyhow::{Context, bail};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

/// What the PID file says about the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "pid", rename_all = "snake_case")]
pub enum DaemonState {
    /// No PID file
    Stopped,

    /// The process in the PID file is alive
    Running(u32),

    /// The PID file is left over from a process which is gone
    Stale(u32),
}

fn is_alive(pid: u32) -> bool {
    Utf8Path::new("/proc").join(pid.to_string()).exists()
}

fn read_pid(path: &Utf8Path) -> anyhow::Result<Option<u32>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("could not read PID file {path}")),
    };

    Ok(content.trim().parse().ok())
}

/// Look at the PID file without touching it
pub fn daemon_state(path: &Utf8Path) -> anyhow::Result<DaemonState> {
    let state = match read_pid(path)? {
        None if path.exists() => DaemonState::Stale(0),
        None => DaemonState::Stopped,
        Some(pid) if is_alive(pid) => DaemonState::Running(pid),
        Some(pid) => DaemonState::Stale(pid),
    };

    Ok(state)
}

/// A PID file owned by this process, removed when dropped
#[derive(Debug)]
pub struct PidFile {
    path: Utf8PathBuf,
    pid: u32,
}

impl PidFile {
    /// Write the PID of this process to the file.
    ///
    /// A file left over by a process which is gone gets replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if another live process owns the file, or if it
    /// could not be written.
    pub fn acquire(path: &Utf8Path) -> anyhow::Result<Self> {
        match daemon_state(path)? {
            DaemonState::Running(pid) => {
                bail!("another daemon is already running with PID {pid} (from {path})");
            }
            DaemonState::Stale(pid) => {
                warn!(%path, pid, "Replacing a stale PID file");
            }
            DaemonState::Stopped => {}
        }

        let pid = std::process::id();
        std::fs::write(path, format!("{pid}\n"))
            .with_context(|| format!("could not write PID file {path}"))?;
        info!(%path, pid, "Wrote PID file");

        Ok(Self {
            path: path.to_owned(),
            pid,
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Leave the file alone if someone else took it over
        match read_pid(&self.path) {
            Ok(Some(pid)) if pid == self.pid => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(
                        path = %self.path,
                        error = &e as &dyn std::error::Error,
                        "Failed to remove the PID file"
                    );
                }
            }
            _ => {}
        }
    }
}
