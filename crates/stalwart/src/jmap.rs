// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::collections::HashMap;

use anyhow::Context;
use ephemera_http::RequestBuilderExt as _;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

const CORE_CAPABILITY: &str = "urn:ietf:params:jmap:core";
const MAIL_CAPABILITY: &str = "urn:ietf:params:jmap:mail";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    api_url: Url,
    primary_accounts: HashMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    method_responses: Vec<(String, Value, String)>,
}

#[derive(Deserialize)]
struct MailboxGetResponse {
    list: Vec<Mailbox>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Mailbox {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    unread_emails: u64,
}

/// A minimal JMAP client, acting on behalf of a user with their access token.
#[derive(Debug, Clone)]
pub struct JmapClient {
    session_url: Url,
    http_client: reqwest::Client,
}

impl JmapClient {
    /// Create a client for the given JMAP server. The session resource is
    /// expected at `/.well-known/jmap`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session URL can't be derived from the base URL
    pub fn new(base_url: &Url, http_client: reqwest::Client) -> Result<Self, url::ParseError> {
        Ok(Self {
            session_url: base_url.join("/.well-known/jmap")?,
            http_client,
        })
    }

    /// Count the unread messages in the inbox of the user owning the token
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable, rejected the token, or
    /// answered with something unexpected.
    #[tracing::instrument(
        name = "mail.unseen_count",
        skip_all,
        fields(jmap.username = username),
        err(Debug),
    )]
    pub async fn unseen_count(&self, username: &str, access_token: &str) -> Result<u64, anyhow::Error> {
        let session: Session = self
            .http_client
            .get(self.session_url.clone())
            .bearer_auth(access_token)
            .send_traced()
            .await
            .context("Failed to fetch the JMAP session")?
            .error_for_status()
            .context("Unexpected HTTP response while fetching the JMAP session")?
            .json()
            .await
            .context("Failed to deserialize the JMAP session")?;

        let account_id = session
            .primary_accounts
            .get(MAIL_CAPABILITY)
            .context("The JMAP session has no primary mail account")?;

        let request = json!({
            "using": [CORE_CAPABILITY, MAIL_CAPABILITY],
            "methodCalls": [[
                "Mailbox/get",
                {
                    "accountId": account_id,
                    "ids": null,
                    "properties": ["role", "unreadEmails"],
                },
                "0",
            ]],
        });

        let response: ApiResponse = self
            .http_client
            .post(session.api_url)
            .bearer_auth(access_token)
            .json(&request)
            .send_traced()
            .await
            .context("Failed to query mailboxes over JMAP")?
            .error_for_status()
            .context("Unexpected HTTP response while querying mailboxes over JMAP")?
            .json()
            .await
            .context("Failed to deserialize JMAP response")?;

        let (name, arguments, _call_id) = response
            .method_responses
            .into_iter()
            .next()
            .context("Empty JMAP response")?;

        if name != "Mailbox/get" {
            anyhow::bail!("JMAP method call failed: {name} {arguments}");
        }

        let mailboxes: MailboxGetResponse =
            serde_json::from_value(arguments).context("Failed to deserialize the mailboxes")?;

        let unseen = mailboxes
            .list
            .iter()
            .filter(|mailbox| mailbox.role.as_deref() == Some("inbox"))
            .map(|mailbox| mailbox.unread_emails)
            .sum();

        Ok(unseen)
    }
}
