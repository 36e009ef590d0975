// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use figment::Figment;
use zeroize::Zeroizing;

mod config;
mod daemon;
mod doctor;
mod predeploy;
mod provision;
mod reconcile;
mod status;
mod unseen;

/// The environment variable holding the default list of configuration files
const CONFIG_ENV: &str = "EPHEMERA_CONFIG";

#[derive(Parser, Debug)]
enum Subcommand {
    /// Configuration-related commands
    Config(self::config::Options),

    /// Run the expiration reconciler until a shutdown signal is received
    Daemon(self::daemon::Options),

    /// Run a single expiration pass and print its report
    Reconcile(self::reconcile::Options),

    /// Create a demo identity and its mailbox
    Provision(self::provision::Options),

    /// Make the mail backend discover an existing identity
    Predeploy(self::predeploy::Options),

    /// Count the unseen messages of an identity
    Unseen(self::unseen::Options),

    /// Show the state of the reconciler daemon
    Status(self::status::Options),

    /// Run diagnostics on the backends
    Doctor(self::doctor::Options),
}

#[derive(Parser, Debug)]
#[command(version = crate::VERSION)]
pub struct Options {
    /// Path to the configuration file
    #[arg(short, long, global = true, action = clap::ArgAction::Append)]
    config: Vec<Utf8PathBuf>,

    #[command(subcommand)]
    subcommand: Subcommand,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        use Subcommand as S;
        // We Box::pin the futures so that they don't all end up on the stack
        match self.subcommand {
            S::Config(c) => Box::pin(c.run(figment)).await,
            S::Daemon(c) => Box::pin(c.run(figment)).await,
            S::Reconcile(c) => Box::pin(c.run(figment)).await,
            S::Provision(c) => Box::pin(c.run(figment)).await,
            S::Predeploy(c) => Box::pin(c.run(figment)).await,
            S::Unseen(c) => Box::pin(c.run(figment)).await,
            S::Status(c) => Box::pin(c.run(figment)).await,
            S::Doctor(c) => Box::pin(c.run(figment)).await,
        }
    }

    /// Get a [`Figment`] instance with the configuration loaded
    pub fn figment(&self) -> Figment {
        let configs = if self.config.is_empty() {
            // Read the EPHEMERA_CONFIG environment variable
            std::env::var(CONFIG_ENV)
                // Default to "config.yaml"
                .unwrap_or_else(|_| "config.yaml".to_owned())
                // Split the file list on `:`
                .split(':')
                .map(Utf8PathBuf::from)
                .collect()
        } else {
            self.config.clone()
        };

        ephemera_config::figment(&configs)
    }
}

/// Print a serializable value as pretty JSON on the standard output
fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let output = serde_json::to_string_pretty(value)?;
    println!("{output}");
    Ok(())
}

/// Use the password given on the command line, or prompt for one
fn password_or_prompt(
    provided: Option<String>,
    confirm: bool,
) -> anyhow::Result<Zeroizing<String>> {
    if let Some(password) = provided {
        return Ok(Zeroizing::new(password));
    }

    let mut prompt = dialoguer::Password::new().with_prompt("Password");
    if confirm {
        prompt = prompt.with_confirmation("Confirm password", "Passwords mismatching");
    }

    let password = prompt.interact()?;
    Ok(Zeroizing::new(password))
}

/// The email given on the command line, or the username at the mail domain
fn email_or_default(
    email: Option<String>,
    username: &str,
    domain: Option<&str>,
) -> anyhow::Result<String> {
    if let Some(email) = email {
        return Ok(email);
    }

    let domain = domain.context("no --email given, and no mail domain configured")?;
    Ok(format!("{username}@{domain}"))
}
