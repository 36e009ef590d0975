// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::Context;
use ephemera_backends::{IdentityProvider, MailBackend, WebmailStore};
use ephemera_data_model::{BoxClock, EligibilityMode, ExpirationPolicy, Identity};
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    deletion::delete_identity,
    report::{RESULT, ReconcilerStats, TICK_COUNTER, TickReport, mode_attribute},
};

/// What the reconciler is busy with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilerPhase {
    #[default]
    Idle,
    Scanning,
    Evaluating,
    Deleting,
    ShuttingDown,
}

/// A snapshot of the reconciler, as returned by
/// [`ExpirationReconciler::status`].
#[derive(Debug, Clone, Serialize)]
pub struct ReconcilerStatus {
    pub running: bool,
    pub phase: ReconcilerPhase,
    pub max_session_duration_minutes: u64,
    pub cleanup_interval_seconds: u64,
    pub stats: ReconcilerStats,
}

#[derive(Default)]
struct State {
    phase: ReconcilerPhase,
    shutting_down: bool,
    stats: ReconcilerStats,
}

struct Timer {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,

    /// The passes spawned by the timer
    passes: TaskTracker,
}

struct Inner {
    idp: Arc<dyn IdentityProvider>,
    mail: Arc<dyn MailBackend>,
    webmail: Arc<dyn WebmailStore>,
    clock: BoxClock,
    policy: ExpirationPolicy,
    interval: Duration,

    /// Held for the whole duration of a pass
    pass_guard: tokio::sync::Mutex<()>,

    state: Mutex<State>,
    timer: Mutex<Option<Timer>>,
}

/// Periodically deletes the demo identities which outlived the expiration
/// policy, from the mail backend, the identity provider and the webmail
/// store, in that order.
///
/// This is a cheap handle, clones share the same state.
#[derive(Clone)]
pub struct ExpirationReconciler {
    inner: Arc<Inner>,
}

impl ExpirationReconciler {
    #[must_use]
    pub fn new(
        idp: Arc<dyn IdentityProvider>,
        mail: Arc<dyn MailBackend>,
        webmail: Arc<dyn WebmailStore>,
        clock: BoxClock,
        policy: ExpirationPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                idp,
                mail,
                webmail,
                clock,
                policy,
                interval,
                pass_guard: tokio::sync::Mutex::new(()),
                state: Mutex::new(State::default()),
                timer: Mutex::new(None),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timer(&self) -> MutexGuard<'_, Option<Timer>> {
        self.inner.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: ReconcilerPhase) {
        self.state().phase = phase;
    }

    /// Returns `true` if the timer is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer().is_some()
    }

    /// Start the timer. The first pass runs right away.
    ///
    /// Returns `false` if expiration is disabled by the policy, or if the
    /// identity provider is unreachable. Starting an already running
    /// reconciler does nothing.
    #[tracing::instrument(
        name = "reconciler.start",
        skip_all,
        fields(
            reconciler.max_session_duration_minutes = self.inner.policy.max_session_duration_minutes,
            reconciler.interval_seconds = self.inner.interval.as_secs(),
        ),
    )]
    pub async fn start(&self) -> bool {
        if !self.inner.policy.is_enabled() {
            info!("Expiration is disabled, not starting the reconciler");
            return false;
        }

        if self.is_running() {
            return true;
        }

        if let Err(error) = self.inner.idp.check_connectivity().await {
            error!(
                error = %format!("{error:#}"),
                "The identity provider is unreachable, not starting the reconciler"
            );
            return false;
        }

        let mut timer = self.timer();
        if timer.is_some() {
            return true;
        }

        let cancellation_token = CancellationToken::new();
        let passes = TaskTracker::new();
        let handle = tokio::spawn(self.clone().run(cancellation_token.clone(), passes.clone()));
        *timer = Some(Timer {
            cancellation_token,
            handle,
            passes,
        });

        info!("Reconciler started");
        true
    }

    async fn run(self, cancellation_token: CancellationToken, passes: TaskTracker) {
        let mut interval = tokio::time::interval(self.inner.interval.max(Duration::from_secs(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                () = cancellation_token.cancelled() => break,
                _ = interval.tick() => {}
            }

            // Ticks run on their own, so that a slow pass makes the next
            // ones skip instead of delaying them
            let this = self.clone();
            passes.spawn(async move {
                if let Err(error) = this.tick().await {
                    error!(error = %format!("{error:#}"), "Reconciler pass failed");
                }
            });
        }

        debug!("Reconciler timer stopped");
    }

    /// Run a regular pass, unless one is already running.
    ///
    /// Returns `None` if the pass was skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the identities could not be listed.
    pub async fn tick(&self) -> Result<Option<TickReport>, anyhow::Error> {
        self.run_once(EligibilityMode::Aged).await
    }

    /// Run a single pass in the given mode, unless one is already running.
    ///
    /// Returns `None` if the pass was skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the identities could not be listed.
    pub async fn run_once(
        &self,
        mode: EligibilityMode,
    ) -> Result<Option<TickReport>, anyhow::Error> {
        let Ok(_guard) = self.inner.pass_guard.try_lock() else {
            self.state().stats.skipped_ticks += 1;
            TICK_COUNTER.add(
                1,
                &[mode_attribute(mode), KeyValue::new(RESULT, "skipped")],
            );
            info!("A pass is already running, skipping this one");
            return Ok(None);
        };

        self.pass(mode).await.map(Some)
    }

    #[tracing::instrument(name = "reconciler.pass", skip(self), err(Debug))]
    async fn pass(&self, mode: EligibilityMode) -> Result<TickReport, anyhow::Error> {
        let mut report = TickReport::new(mode, self.inner.clock.now());

        self.set_phase(ReconcilerPhase::Scanning);
        let identities = match self.inner.idp.list_identities().await {
            Ok(identities) => identities,
            Err(error) => {
                let mut state = self.state();
                state.phase = ReconcilerPhase::Idle;
                state.stats.record_failure(self.inner.clock.now());
                TICK_COUNTER.add(1, &[mode_attribute(mode), KeyValue::new(RESULT, "error")]);
                return Err(error.context("Failed to list identities"));
            }
        };

        report.scanned = u64::try_from(identities.len()).unwrap_or(u64::MAX);

        self.set_phase(ReconcilerPhase::Evaluating);
        for summary in identities.iter().filter(|identity| identity.enabled) {
            match self.evaluate(summary, mode).await {
                Ok(Some(identity)) => {
                    report.expired += 1;
                    self.set_phase(ReconcilerPhase::Deleting);
                    let deletion = delete_identity(
                        &identity,
                        &*self.inner.idp,
                        &*self.inner.mail,
                        &*self.inner.webmail,
                    )
                    .await;
                    report.record_deletion(deletion);
                    self.set_phase(ReconcilerPhase::Evaluating);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        user.id = summary.id,
                        error = %format!("{error:#}"),
                        "Failed to evaluate identity"
                    );
                    report.errors += 1;
                }
            }
        }

        report.finished_at = self.inner.clock.now();
        {
            let mut state = self.state();
            state.phase = ReconcilerPhase::Idle;
            state.stats.accumulate(&report);
        }
        report.export();
        TICK_COUNTER.add(1, &[mode_attribute(mode), KeyValue::new(RESULT, "success")]);

        info!(
            reconciler.scanned = report.scanned,
            reconciler.expired = report.expired,
            reconciler.deleted = report.deleted,
            reconciler.errors = report.errors,
            "Reconciler pass finished"
        );

        Ok(report)
    }

    /// Fetch the full identity and decide whether it should go.
    async fn evaluate(
        &self,
        summary: &Identity,
        mode: EligibilityMode,
    ) -> Result<Option<Identity>, anyhow::Error> {
        let Some(identity) = self
            .inner
            .idp
            .get_identity(&summary.id)
            .await
            .context("Failed to fetch the identity")?
        else {
            debug!(user.id = summary.id, "Identity vanished before evaluation");
            return Ok(None);
        };

        let has_webmail_record = match identity.email.as_deref() {
            Some(email) => self
                .inner
                .webmail
                .exists(email)
                .await
                .context("Failed to look up the webmail record")?,
            None => false,
        };

        let eligibility = self.inner.policy.evaluate(
            &identity,
            has_webmail_record,
            self.inner.clock.now(),
            mode,
        );
        debug!(user.id = identity.id, ?eligibility, "Identity evaluated");

        Ok(eligibility.is_eligible().then_some(identity))
    }

    fn take_timer(&self) -> Option<Timer> {
        let timer = self.timer().take()?;
        timer.cancellation_token.cancel();
        timer.passes.close();
        Some(timer)
    }

    /// Stop the timer. A pass already running still finishes.
    ///
    /// Returns `false` if the timer was not running.
    pub fn stop(&self) -> bool {
        let stopped = self.take_timer().is_some();
        if stopped {
            info!("Reconciler stopped");
        }
        stopped
    }

    /// Stop the timer, wait for the passes it spawned to finish, then delete
    /// every remaining identity which has a webmail record, regardless of its
    /// age.
    ///
    /// # Errors
    ///
    /// Returns an error if the identities could not be listed.
    #[tracing::instrument(name = "reconciler.shutdown", skip_all)]
    pub async fn shutdown(&self) -> Result<TickReport, anyhow::Error> {
        self.state().shutting_down = true;

        if let Some(timer) = self.take_timer() {
            if let Err(error) = timer.handle.await {
                warn!(%error, "Reconciler timer task failed");
            }
            timer.passes.wait().await;
        }

        let result = {
            let _guard = self.inner.pass_guard.lock().await;
            info!("Running the final forced pass");
            self.pass(EligibilityMode::Forced).await
        };

        self.state().shutting_down = false;
        result
    }

    #[must_use]
    pub fn status(&self) -> ReconcilerStatus {
        let state = self.state();
        let phase = if state.shutting_down {
            ReconcilerPhase::ShuttingDown
        } else {
            state.phase
        };

        ReconcilerStatus {
            running: self.is_running(),
            phase,
            max_session_duration_minutes: self.inner.policy.max_session_duration_minutes,
            cleanup_interval_seconds: self.inner.interval.as_secs(),
            stats: state.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration as ChronoDuration;
    use ephemera_backends::{
        MailProviderKind, MailboxDeletion,
        mock::{Call, CallLog, MockIdentityProvider, MockMailBackend, MockWebmailStore},
    };
    use ephemera_data_model::{Clock, MockClock};

    use super::*;

    struct Fixture {
        log: CallLog,
        idp: Arc<MockIdentityProvider>,
        mail: Arc<MockMailBackend>,
        webmail: Arc<MockWebmailStore>,
        reconciler: ExpirationReconciler,
    }

    fn identity(clock: &MockClock, name: &str, age: ChronoDuration) -> Identity {
        Identity {
            id: format!("id-{name}"),
            username: name.to_owned(),
            email: Some(format!("{name}@demo.test")),
            enabled: true,
            created_at: clock.now() - age,
        }
    }

    /// Sets up:
    ///  - alice, old and with a webmail record
    ///  - bob, young and with a webmail record
    ///  - carol, old but without a webmail record
    ///  - dave, old, with a webmail record, but disabled
    ///  - erin, old, but without an email
    fn fixture(max_session_duration_minutes: u64) -> Fixture {
        fixture_with_interval(max_session_duration_minutes, Duration::from_secs(3600))
    }

    fn fixture_with_interval(max_session_duration_minutes: u64, interval: Duration) -> Fixture {
        let clock = Arc::new(MockClock::default());
        let log = CallLog::new();

        let mut dave = identity(&clock, "dave", ChronoDuration::hours(3));
        dave.enabled = false;
        let mut erin = identity(&clock, "erin", ChronoDuration::hours(3));
        erin.email = None;

        let idp = Arc::new(MockIdentityProvider::new(log.clone()).with_identities([
            identity(&clock, "alice", ChronoDuration::hours(2)),
            identity(&clock, "bob", ChronoDuration::minutes(5)),
            identity(&clock, "carol", ChronoDuration::hours(3)),
            dave,
            erin,
        ]));

        let mail = Arc::new(
            MockMailBackend::new(log.clone(), MailProviderKind::Direct).with_mailboxes([
                "alice@demo.test",
                "bob@demo.test",
                "carol@demo.test",
                "dave@demo.test",
            ]),
        );

        let webmail = Arc::new(MockWebmailStore::new(log.clone()).with_keys([
            "alice@demo.test",
            "bob@demo.test",
            "dave@demo.test",
            "erin",
        ]));

        let reconciler = ExpirationReconciler::new(
            idp.clone(),
            mail.clone(),
            webmail.clone(),
            Box::new(clock),
            ExpirationPolicy::new(max_session_duration_minutes),
            interval,
        );

        Fixture {
            log,
            idp,
            mail,
            webmail,
            reconciler,
        }
    }

    fn usernames(idp: &MockIdentityProvider) -> Vec<String> {
        idp.identities()
            .into_iter()
            .map(|identity| identity.username)
            .collect()
    }

    #[tokio::test]
    async fn test_disabled_policy_never_starts() {
        let fixture = fixture(0);

        assert!(!fixture.reconciler.start().await);
        assert!(!fixture.reconciler.is_running());
        assert!(!fixture.reconciler.status().running);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fixture.log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_idp_never_starts() {
        let fixture = fixture(60);
        fixture.idp.set_reachable(false);

        assert!(!fixture.reconciler.start().await);
        assert!(!fixture.reconciler.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_then_stop() {
        let fixture = fixture(60);

        assert!(fixture.reconciler.start().await);
        assert!(fixture.reconciler.start().await);
        assert!(fixture.reconciler.is_running());

        assert!(fixture.reconciler.stop());
        assert!(!fixture.reconciler.stop());
        assert!(!fixture.reconciler.is_running());
    }

    #[tokio::test]
    async fn test_timer_runs_a_pass_right_away() {
        let fixture = fixture(60);
        assert!(fixture.reconciler.start().await);

        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = fixture.reconciler.status().stats;
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.deleted, 1);
        assert!(!fixture.webmail.contains("alice@demo.test"));

        assert!(fixture.reconciler.stop());
    }

    #[tokio::test]
    async fn test_slow_pass_skips_the_next_tick() {
        let fixture = fixture_with_interval(60, Duration::from_secs(1));
        fixture.idp.set_list_delay(Duration::from_millis(1500));
        assert!(fixture.reconciler.start().await);

        // The first pass runs from 0 to 1.5s, the tick at 1s finds it busy
        tokio::time::sleep(Duration::from_millis(1750)).await;
        assert!(fixture.reconciler.stop());

        let stats = fixture.reconciler.status().stats;
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.skipped_ticks, 1);
        assert_eq!(fixture.idp.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_aged_pass() {
        let fixture = fixture(60);

        let report = fixture.reconciler.tick().await.unwrap().unwrap();
        assert_eq!(report.mode, EligibilityMode::Aged);
        assert_eq!(report.scanned, 5);
        assert_eq!(report.expired, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.errors, 0);

        let deletion = &report.deletions[0];
        assert_eq!(deletion.username, "alice");
        assert!(deletion.success);

        assert_eq!(
            usernames(&fixture.idp),
            vec!["bob", "carol", "dave", "erin"]
        );
        assert!(!fixture.mail.has_mailbox("alice@demo.test"));
        assert!(!fixture.webmail.contains("alice@demo.test"));

        // Disabled identities are not even fetched
        assert_eq!(
            fixture.log.count(&Call::GetIdentity("id-dave".to_owned())),
            0
        );

        let status = fixture.reconciler.status();
        assert_eq!(status.phase, ReconcilerPhase::Idle);
        assert_eq!(status.stats.runs, 1);
        assert_eq!(status.stats.deleted, 1);
        assert_eq!(status.stats.scanned, 5);
        assert!(status.stats.last_report.is_some());

        // Nothing left to do on the next pass
        let report = fixture.reconciler.tick().await.unwrap().unwrap();
        assert_eq!(report.expired, 0);
        assert_eq!(fixture.reconciler.status().stats.runs, 2);
    }

    #[tokio::test]
    async fn test_deletion_order() {
        let fixture = fixture(60);
        fixture.reconciler.tick().await.unwrap();

        let mail = fixture
            .log
            .position(&Call::DeleteMailbox("alice@demo.test".to_owned()))
            .unwrap();
        let idp = fixture
            .log
            .position(&Call::DeleteIdentity("id-alice".to_owned()))
            .unwrap();
        let webmail = fixture
            .log
            .position(&Call::WebmailDelete("alice@demo.test".to_owned()))
            .unwrap();

        assert!(mail < idp);
        assert!(idp < webmail);
    }

    #[tokio::test]
    async fn test_missing_mailbox_counts_as_deleted() {
        let fixture = fixture(60);
        let mail = fixture.mail.delete_mailbox("alice@demo.test").await;
        assert!(mail.success);

        let report = fixture.reconciler.tick().await.unwrap().unwrap();
        let deletion = &report.deletions[0];
        assert!(deletion.success);
        assert!(deletion.mail.success);
        assert_eq!(deletion.mail.message, MailboxDeletion::ALREADY_DELETED);
    }

    #[tokio::test]
    async fn test_overlapping_ticks_are_skipped() {
        let fixture = fixture(60);
        fixture.idp.set_list_delay(Duration::from_millis(200));

        let (first, second) = tokio::join!(fixture.reconciler.tick(), fixture.reconciler.tick());
        let first = first.unwrap();
        let second = second.unwrap();

        // Exactly one of them ran
        assert!(first.is_some() != second.is_some());
        assert_eq!(fixture.idp.list_calls(), 1);

        let stats = fixture.reconciler.status().stats;
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.skipped_ticks, 1);
    }

    #[tokio::test]
    async fn test_listing_failure_fails_the_pass() {
        let fixture = fixture(60);
        fixture.idp.set_reachable(false);

        assert!(fixture.reconciler.tick().await.is_err());

        let status = fixture.reconciler.status();
        assert_eq!(status.phase, ReconcilerPhase::Idle);
        assert_eq!(status.stats.failed_runs, 1);
        assert_eq!(status.stats.errors, 1);
    }

    #[tokio::test]
    async fn test_identity_errors_do_not_stop_the_pass() {
        let fixture = fixture(60);
        fixture.webmail.set_reachable(false);

        let report = fixture.reconciler.tick().await.unwrap().unwrap();

        // alice, bob and carol could not be evaluated, erin has no email
        assert_eq!(report.errors, 3);
        assert_eq!(report.expired, 0);
        assert_eq!(fixture.idp.identities().len(), 5);
    }

    #[tokio::test]
    async fn test_shutdown_forces_expiration() {
        let fixture = fixture(60);
        assert!(fixture.reconciler.start().await);

        let report = fixture.reconciler.shutdown().await.unwrap();
        assert_eq!(report.mode, EligibilityMode::Forced);
        assert!(!fixture.reconciler.is_running());

        // Age no longer matters, the other conditions still do
        assert_eq!(usernames(&fixture.idp), vec!["carol", "dave", "erin"]);
        assert!(!fixture.webmail.contains("bob@demo.test"));
        assert!(fixture.webmail.contains("dave@demo.test"));
        assert!(fixture.mail.has_mailbox("carol@demo.test"));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_pass() {
        let fixture = fixture(60);
        fixture.idp.set_list_delay(Duration::from_millis(100));

        let (tick, shutdown) = tokio::join!(fixture.reconciler.tick(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            fixture.reconciler.shutdown().await
        });

        assert_matches!(tick, Ok(Some(_)));
        assert_matches!(shutdown, Ok(report) if report.mode == EligibilityMode::Forced);

        // Both passes ran, one after the other
        assert_eq!(fixture.idp.list_calls(), 2);
        assert_eq!(fixture.reconciler.status().stats.skipped_ticks, 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_timer_passes() {
        let fixture = fixture(60);
        fixture.idp.set_list_delay(Duration::from_millis(100));
        assert!(fixture.reconciler.start().await);

        // Let the timer spawn its first pass
        tokio::time::sleep(Duration::from_millis(10)).await;
        let report = fixture.reconciler.shutdown().await.unwrap();
        assert_eq!(report.mode, EligibilityMode::Forced);

        // The aged pass finished before the forced one, nothing runs after
        let stats = fixture.reconciler.status().stats;
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.skipped_ticks, 0);
        assert_eq!(
            stats.last_report.map(|report| report.mode),
            Some(EligibilityMode::Forced)
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fixture.idp.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_phase_is_visible() {
        let fixture = fixture(60);
        fixture.idp.set_list_delay(Duration::from_millis(100));

        let (shutdown, phase) = tokio::join!(fixture.reconciler.shutdown(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fixture.reconciler.status().phase
        });

        assert!(shutdown.is_ok());
        assert_eq!(phase, ReconcilerPhase::ShuttingDown);
        assert_eq!(fixture.reconciler.status().phase, ReconcilerPhase::Idle);
    }
}
