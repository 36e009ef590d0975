// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! In-memory backends, for tests and dry runs.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::bail;
use chrono::Utc;
use ephemera_data_model::{Identity, NewIdentity, Principal};

use crate::{
    BackendError, ErrorKind, IdentityProvider, MailAdmin, MailBackend, MailOptions,
    MailProviderKind, MailboxDeletion, MailboxVerification, ProxySettings, SentMail,
    SettingsUpdate, WebmailDeletion, WebmailStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A call received by one of the mock backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListIdentities,
    GetIdentity(String),
    CreateIdentity(String),
    DeleteIdentity(String),
    LogoutSessions(String),
    GetPrincipal(String),
    CreatePrincipal(String),
    DeletePrincipal(String),
    VerifyMailbox(String),
    EnableMailbox(String),
    SendMail(String),
    DeleteMailbox(String),
    ConfigureProxy,
    WebmailExists(String),
    WebmailDelete(String),
}

/// A log of calls, shared between mock backends so that tests can assert on
/// the order in which backends were called.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    /// A snapshot of the calls received so far
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// The index of the first occurrence of the given call
    #[must_use]
    pub fn position(&self, call: &Call) -> Option<usize> {
        lock(&self.calls).iter().position(|c| c == call)
    }

    /// How many times the given call was received
    #[must_use]
    pub fn count(&self, call: &Call) -> usize {
        lock(&self.calls).iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }
}

/// An identity provider keeping its identities in memory.
pub struct MockIdentityProvider {
    log: CallLog,
    identities: Mutex<Vec<Identity>>,
    reachable: AtomicBool,
    list_delay: Mutex<Option<Duration>>,
    list_calls: AtomicUsize,
    next_id: AtomicU64,
    failing_deletions: Mutex<HashSet<String>>,
    failing_logouts: Mutex<HashSet<String>>,
}

impl MockIdentityProvider {
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            identities: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            list_delay: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            failing_deletions: Mutex::new(HashSet::new()),
            failing_logouts: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn with_identities(self, identities: impl IntoIterator<Item = Identity>) -> Self {
        lock(&self.identities).extend(identities);
        self
    }

    pub fn insert(&self, identity: Identity) {
        lock(&self.identities).push(identity);
    }

    /// A snapshot of the identities currently held
    #[must_use]
    pub fn identities(&self) -> Vec<Identity> {
        lock(&self.identities).clone()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }

    /// Make listing identities take some time
    pub fn set_list_delay(&self, delay: Duration) {
        *lock(&self.list_delay) = Some(delay);
    }

    /// How many times the identities were listed
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Make the deletion of the given identity fail
    pub fn fail_deletion_of(&self, id: &str) {
        lock(&self.failing_deletions).insert(id.to_owned());
    }

    /// Make ending the sessions of the given identity fail
    pub fn fail_logout_of(&self, id: &str) {
        lock(&self.failing_logouts).insert(id.to_owned());
    }

    fn ensure_reachable(&self) -> Result<(), BackendError> {
        if self.reachable.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BackendError::new(
                ErrorKind::NetworkOrTimeout,
                "identity provider is unreachable",
            ))
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn check_connectivity(&self) -> Result<(), anyhow::Error> {
        self.ensure_reachable()?;
        Ok(())
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, anyhow::Error> {
        self.log.record(Call::ListIdentities);
        self.list_calls.fetch_add(1, Ordering::Relaxed);

        let delay = *lock(&self.list_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.ensure_reachable()?;
        Ok(self.identities())
    }

    async fn get_identity(&self, id: &str) -> Result<Option<Identity>, anyhow::Error> {
        self.log.record(Call::GetIdentity(id.to_owned()));
        self.ensure_reachable()?;
        Ok(lock(&self.identities).iter().find(|i| i.id == id).cloned())
    }

    async fn create_identity(&self, identity: &NewIdentity) -> Result<String, anyhow::Error> {
        self.log.record(Call::CreateIdentity(identity.username.clone()));
        self.ensure_reachable()?;

        let mut identities = lock(&self.identities);
        if identities.iter().any(|i| i.username == identity.username) {
            return Err(BackendError::from_status(409, "username already taken").into());
        }

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        identities.push(Identity {
            id: id.clone(),
            username: identity.username.clone(),
            email: Some(identity.email.clone()),
            enabled: true,
            created_at: Utc::now(),
        });

        Ok(id)
    }

    async fn delete_identity(&self, id: &str) -> Result<bool, anyhow::Error> {
        self.log.record(Call::DeleteIdentity(id.to_owned()));
        self.ensure_reachable()?;

        if lock(&self.failing_deletions).contains(id) {
            return Err(BackendError::from_status(500, "failed to delete identity").into());
        }

        let mut identities = lock(&self.identities);
        let before = identities.len();
        identities.retain(|i| i.id != id);
        Ok(identities.len() != before)
    }

    async fn logout_sessions(&self, id: &str) -> Result<(), anyhow::Error> {
        self.log.record(Call::LogoutSessions(id.to_owned()));
        self.ensure_reachable()?;

        if lock(&self.failing_logouts).contains(id) {
            bail!("failed to end the sessions of {id}");
        }

        Ok(())
    }
}

/// A mail backend admin API keeping its principals and settings in memory.
pub struct MockMailAdmin {
    log: CallLog,
    principals: Mutex<BTreeMap<String, Principal>>,
    settings: Mutex<Vec<SettingsUpdate>>,
    reloads: AtomicUsize,
    next_id: AtomicU64,
    reject_creation: AtomicBool,
    reachable: AtomicBool,
}

impl MockMailAdmin {
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            principals: Mutex::new(BTreeMap::new()),
            settings: Mutex::new(Vec::new()),
            reloads: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            reject_creation: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn insert(&self, principal: Principal) {
        lock(&self.principals).insert(principal.name.clone(), principal);
    }

    #[must_use]
    pub fn principals(&self) -> Vec<Principal> {
        lock(&self.principals).values().cloned().collect()
    }

    /// The settings updates received so far
    #[must_use]
    pub fn settings(&self) -> Vec<SettingsUpdate> {
        lock(&self.settings).clone()
    }

    #[must_use]
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::Relaxed)
    }

    pub fn set_reject_creation(&self, reject: bool) {
        self.reject_creation.store(reject, Ordering::Relaxed);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }

    fn ensure_reachable(&self) -> Result<(), BackendError> {
        if self.reachable.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BackendError::new(
                ErrorKind::NetworkOrTimeout,
                "mail backend is unreachable",
            ))
        }
    }
}

#[async_trait::async_trait]
impl MailAdmin for MockMailAdmin {
    async fn get_principal(&self, name: &str) -> Result<Option<Principal>, anyhow::Error> {
        self.log.record(Call::GetPrincipal(name.to_owned()));
        self.ensure_reachable()?;

        let principals = lock(&self.principals);
        let principal = principals
            .get(name)
            .or_else(|| principals.values().find(|p| p.has_email(name)))
            .cloned();
        Ok(principal)
    }

    async fn create_principal(&self, principal: &Principal) -> Result<Option<u64>, anyhow::Error> {
        self.log.record(Call::CreatePrincipal(principal.name.clone()));
        self.ensure_reachable()?;

        if self.reject_creation.load(Ordering::Relaxed) {
            return Err(BackendError::from_status(403, "principal creation is disabled").into());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut principal = principal.clone();
        principal.id = Some(id);
        lock(&self.principals).insert(principal.name.clone(), principal);
        Ok(Some(id))
    }

    async fn delete_principal(&self, name: &str) -> Result<u16, anyhow::Error> {
        self.log.record(Call::DeletePrincipal(name.to_owned()));
        self.ensure_reachable()?;

        if lock(&self.principals).remove(name).is_some() {
            Ok(200)
        } else {
            Ok(404)
        }
    }

    async fn update_settings(&self, updates: &[SettingsUpdate]) -> Result<(), anyhow::Error> {
        self.ensure_reachable()?;
        lock(&self.settings).extend_from_slice(updates);
        Ok(())
    }

    async fn reload(&self) -> Result<(), anyhow::Error> {
        self.ensure_reachable()?;
        self.reloads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A mail backend keeping its mailboxes in memory.
pub struct MockMailBackend {
    log: CallLog,
    kind: MailProviderKind,
    mailboxes: Mutex<BTreeSet<String>>,
    unseen: Mutex<HashMap<String, u64>>,
    sent: Mutex<Vec<MailOptions>>,
    proxy: Mutex<Option<ProxySettings>>,
    failing: AtomicBool,
}

impl MockMailBackend {
    #[must_use]
    pub fn new(log: CallLog, kind: MailProviderKind) -> Self {
        Self {
            log,
            kind,
            mailboxes: Mutex::new(BTreeSet::new()),
            unseen: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            proxy: Mutex::new(None),
            failing: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_mailboxes<I, S>(self, emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.mailboxes).extend(emails.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn has_mailbox(&self, email: &str) -> bool {
        lock(&self.mailboxes).contains(email)
    }

    pub fn set_unseen(&self, username: &str, count: u64) {
        lock(&self.unseen).insert(username.to_owned(), count);
    }

    /// Make every deletion fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    #[must_use]
    pub fn sent(&self) -> Vec<MailOptions> {
        lock(&self.sent).clone()
    }

    #[must_use]
    pub fn proxy(&self) -> Option<ProxySettings> {
        lock(&self.proxy).clone()
    }

    fn principal_for(email: &str) -> Principal {
        let name = email.split('@').next().unwrap_or(email);
        Principal::individual(name.to_owned(), email.to_owned())
    }
}

#[async_trait::async_trait]
impl MailBackend for MockMailBackend {
    fn kind(&self) -> MailProviderKind {
        self.kind
    }

    async fn verify_mailbox_exists(&self, email: &str) -> MailboxVerification {
        self.log.record(Call::VerifyMailbox(email.to_owned()));

        if self.has_mailbox(email) {
            MailboxVerification::Exists {
                principal: Self::principal_for(email),
            }
        } else {
            MailboxVerification::Missing
        }
    }

    async fn verify_and_enable_mailbox(&self, email: &str) -> MailboxVerification {
        self.log.record(Call::EnableMailbox(email.to_owned()));

        if self.has_mailbox(email) {
            return MailboxVerification::Exists {
                principal: Self::principal_for(email),
            };
        }

        match self.kind {
            MailProviderKind::Direct => {
                let mut mailboxes = lock(&self.mailboxes);
                mailboxes.insert(email.to_owned());
                MailboxVerification::Created {
                    principal_id: u64::try_from(mailboxes.len()).ok(),
                }
            }
            MailProviderKind::OidcDirectory => MailboxVerification::PendingDiscovery {
                message: "the mailbox will be created on first sign-in".to_owned(),
            },
        }
    }

    async fn send_mail(&self, options: &MailOptions) -> Result<SentMail, anyhow::Error> {
        self.log.record(Call::SendMail(options.auth.username().to_owned()));
        if self.failing.load(Ordering::Relaxed) {
            bail!("submission server rejected the message");
        }

        let mut sent = lock(&self.sent);
        sent.push(options.clone());
        Ok(SentMail {
            message_id: format!("<mock-{}@ephemera.test>", sent.len()),
            response: "250 2.0.0 Message queued".to_owned(),
        })
    }

    async fn unseen_count(&self, username: &str, _access_token: &str) -> Result<u64, anyhow::Error> {
        Ok(lock(&self.unseen).get(username).copied().unwrap_or(0))
    }

    async fn delete_mailbox(&self, email: &str) -> MailboxDeletion {
        self.log.record(Call::DeleteMailbox(email.to_owned()));

        if self.failing.load(Ordering::Relaxed) {
            return MailboxDeletion {
                success: false,
                message: "mail backend refused the deletion".to_owned(),
                status: Some(500),
            };
        }

        if lock(&self.mailboxes).remove(email) {
            MailboxDeletion {
                success: true,
                message: "deleted".to_owned(),
                status: Some(200),
            }
        } else {
            MailboxDeletion::already_deleted()
        }
    }

    async fn configure_proxy(&self, settings: &ProxySettings) -> Result<(), anyhow::Error> {
        self.log.record(Call::ConfigureProxy);
        *lock(&self.proxy) = Some(settings.clone());
        Ok(())
    }
}

/// A webmail store keeping its records in memory.
pub struct MockWebmailStore {
    log: CallLog,
    keys: Mutex<BTreeSet<String>>,
    reachable: AtomicBool,
}

impl MockWebmailStore {
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            keys: Mutex::new(BTreeSet::new()),
            reachable: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn with_keys<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.keys).extend(keys.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.keys).contains(key)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }

    fn ensure_reachable(&self) -> Result<(), BackendError> {
        if self.reachable.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BackendError::new(
                ErrorKind::NetworkOrTimeout,
                "webmail store is unreachable",
            ))
        }
    }
}

#[async_trait::async_trait]
impl WebmailStore for MockWebmailStore {
    async fn check_connectivity(&self) -> Result<(), anyhow::Error> {
        self.ensure_reachable()?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
        self.log.record(Call::WebmailExists(key.to_owned()));
        self.ensure_reachable()?;
        Ok(self.contains(key))
    }

    async fn delete(&self, key: &str) -> Result<WebmailDeletion, anyhow::Error> {
        self.log.record(Call::WebmailDelete(key.to_owned()));
        self.ensure_reachable()?;
        let deleted = lock(&self.keys).remove(key);
        Ok(WebmailDeletion { deleted })
    }
}
