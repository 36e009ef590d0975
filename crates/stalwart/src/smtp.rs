// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Message submission over SMTP, authenticated either with a password or
//! with an OAuth 2.0 access token.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use ephemera_backends::{MailOptions, SentMail, SmtpAuth};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        AsyncSmtpTransportBuilder,
        authentication::{Credentials, Mechanism},
    },
};
use serde::Serialize;

/// Encryption mode to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpMode {
    /// Plain text
    Plain,
    /// `StartTLS` (starts as plain text then upgrade to TLS)
    StartTls,
    /// TLS
    Tls,
}

/// The outcome of an authenticated handshake with the submission server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum HandshakeOutcome {
    /// The server accepted the credentials
    Succeeded,

    /// The TLS negotiation failed. The server may still have seen the
    /// connection attempt.
    TlsFailure(String),

    /// The server answered, but rejected the credentials. It had to
    /// introspect the token to do so, so it did see the identity.
    CredentialsRejected(String),

    /// The server could not be reached, or not in time
    Unreachable(String),
}

impl HandshakeOutcome {
    /// Returns `true` if the server could not have observed the identity.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// The error, if the handshake did not succeed
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::TlsFailure(error)
            | Self::CredentialsRejected(error)
            | Self::Unreachable(error) => Some(error),
        }
    }

    fn classify(error: &lettre::transport::smtp::Error) -> Self {
        let message = error.to_string();
        if error.is_tls() {
            Self::TlsFailure(message)
        } else if error.is_permanent() || error.is_transient() {
            Self::CredentialsRejected(message)
        } else {
            Self::Unreachable(message)
        }
    }
}

/// Something able to attempt an authenticated handshake with the mail
/// backend using an access token.
#[async_trait]
pub trait Handshake: Send + Sync {
    async fn handshake(&self, username: &str, access_token: &str) -> HandshakeOutcome;
}

/// A submission server.
#[derive(Debug, Clone)]
pub struct SmtpSubmission {
    hostname: String,
    port: Option<u16>,
    mode: SmtpMode,
    timeout: Duration,
    handshake_timeout: Duration,
}

impl SmtpSubmission {
    #[must_use]
    pub fn new(hostname: String, port: Option<u16>, mode: SmtpMode) -> Self {
        Self {
            hostname,
            port,
            mode,
            timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(15),
        }
    }

    /// Set the timeout used when sending messages
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the timeout of the whole discovery handshake, TLS negotiation
    /// included
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn builder(&self) -> Result<AsyncSmtpTransportBuilder, lettre::transport::smtp::Error> {
        let mut builder = match self.mode {
            SmtpMode::Plain => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.hostname)
            }
            SmtpMode::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.hostname)?
            }
            SmtpMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&self.hostname)?,
        };

        if let Some(port) = self.port {
            builder = builder.port(port);
        }

        Ok(builder)
    }

    /// Build a transport authenticating with the given credentials
    fn transport(
        &self,
        auth: &SmtpAuth,
        timeout: Duration,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, lettre::transport::smtp::Error> {
        let (credentials, mechanisms) = match auth {
            SmtpAuth::Password { username, password } => (
                Credentials::new(username.clone(), password.clone()),
                vec![Mechanism::Plain, Mechanism::Login],
            ),
            SmtpAuth::Bearer {
                username,
                access_token,
            } => (
                Credentials::new(username.clone(), access_token.clone()),
                vec![Mechanism::Xoauth2],
            ),
        };

        Ok(self
            .builder()?
            .credentials(credentials)
            .authentication(mechanisms)
            .timeout(Some(timeout))
            .build())
    }

    /// Send a message
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be built, or if the server
    /// rejected it.
    #[tracing::instrument(
        name = "mail.send",
        skip_all,
        fields(
            smtp.hostname = self.hostname,
            smtp.username = options.auth.username(),
            smtp.recipients = options.to.len(),
        ),
        err(Debug),
    )]
    pub async fn send(&self, options: &MailOptions) -> Result<SentMail, anyhow::Error> {
        let message = build_message(options)?;
        let message_id = message
            .headers()
            .get_raw("Message-ID")
            .map(str::to_owned)
            .unwrap_or_default();

        let transport = self
            .transport(&options.auth, self.timeout)
            .context("Failed to build the SMTP transport")?;

        let response = transport
            .send(message)
            .await
            .context("The submission server rejected the message")?;

        let text = response.message().collect::<Vec<_>>().join(" ");
        Ok(SentMail {
            message_id,
            response: format!("{} {text}", response.code()),
        })
    }
}

fn build_message(options: &MailOptions) -> Result<Message, anyhow::Error> {
    let from = options
        .from
        .as_deref()
        .unwrap_or_else(|| options.auth.username());

    let mut builder = Message::builder()
        .from(from.parse().context("Invalid sender address")?)
        .subject(options.subject.clone());

    for to in &options.to {
        builder = builder.to(to
            .parse()
            .with_context(|| format!("Invalid recipient address {to:?}"))?);
    }

    let message = if let Some(html) = &options.html_body {
        builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(options.text_body.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.clone()),
                ),
        )
    } else {
        builder
            .header(ContentType::TEXT_PLAIN)
            .body(options.text_body.clone())
    };

    message.context("Failed to build the message")
}

#[async_trait]
impl Handshake for SmtpSubmission {
    #[tracing::instrument(
        name = "mail.handshake",
        skip_all,
        fields(smtp.hostname = self.hostname, smtp.username = username),
    )]
    async fn handshake(&self, username: &str, access_token: &str) -> HandshakeOutcome {
        let auth = SmtpAuth::Bearer {
            username: username.to_owned(),
            access_token: access_token.to_owned(),
        };

        let transport = match self.transport(&auth, self.handshake_timeout) {
            Ok(transport) => transport,
            Err(error) => return HandshakeOutcome::Unreachable(error.to_string()),
        };

        let outcome =
            match tokio::time::timeout(self.handshake_timeout, transport.test_connection()).await {
                Ok(Ok(true)) => HandshakeOutcome::Succeeded,
                Ok(Ok(false)) => {
                    HandshakeOutcome::Unreachable("the server ended the connection".to_owned())
                }
                Ok(Err(error)) => HandshakeOutcome::classify(&error),
                Err(_elapsed) => HandshakeOutcome::Unreachable(format!(
                    "no answer within {}s",
                    self.handshake_timeout.as_secs()
                )),
            };

        tracing::info!(?outcome, "Authenticated handshake attempted");
        outcome
    }
}
