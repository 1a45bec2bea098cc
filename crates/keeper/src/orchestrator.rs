//! The orchestrator: a single actor owning the session state machine.
//!
//! All triggers (periodic timer, manual login, pause toggle, credential
//! change, delayed retries) arrive as commands on one mpsc channel, so at
//! most one probe-or-login cycle is ever in flight and two triggers can
//! never race on the persisted state or double-submit to the portal.
//! Manual requests queue behind an in-flight cycle and still get their
//! reply. Scheduled retries carry a generation counter; any success, pause
//! or credential change bumps the generation so a stale retry firing later
//! is dropped instead of replaying outdated conditions.

use crate::backoff::BackoffSchedule;
use crate::config::KeeperConfig;
use crate::error::KeeperError;
use crate::notify::{Notification, Notify};
use crate::state::{PersistedState, SessionState, SessionStatus};
use crate::store::StateStore;
use crate::vault::{CredentialVault, Credentials};
use async_trait::async_trait;
use chrono::Utc;
use portal_client::{LoginOutcome, PortalClient, PortalError, ProbeOutcome, Prober};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Seam for the reachability prober, so the state machine is testable
/// without a network.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> ProbeOutcome;
}

#[async_trait]
impl ConnectivityProbe for Prober {
    async fn probe(&self) -> ProbeOutcome {
        Prober::probe(self).await
    }
}

/// Seam for the portal login client.
#[async_trait]
pub trait PortalLogin: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome, PortalError>;
}

#[async_trait]
impl PortalLogin for PortalClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome, PortalError> {
        PortalClient::login(self, &credentials.username, &credentials.password).await
    }
}

enum Command {
    Tick,
    ForceLogin {
        reply: oneshot::Sender<SessionState>,
    },
    SetPaused {
        paused: bool,
        reply: oneshot::Sender<SessionState>,
    },
    QueryState {
        reply: oneshot::Sender<SessionState>,
    },
    CredentialsChanged,
    RetryDue {
        generation: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Timer,
    Manual,
    Retry,
}

/// Cloneable handle for sending commands to a running orchestrator.
#[derive(Clone)]
pub struct KeeperHandle {
    tx: mpsc::Sender<Command>,
}

impl KeeperHandle {
    /// Current session snapshot. Queued behind any in-flight cycle, so the
    /// answer always reflects a settled state.
    pub async fn state(&self) -> Result<SessionState, KeeperError> {
        self.request(|reply| Command::QueryState { reply }).await
    }

    /// Attempt a login immediately, regardless of the renewal deadline or
    /// pause flag, and report the resulting state.
    pub async fn force_login(&self) -> Result<SessionState, KeeperError> {
        self.request(|reply| Command::ForceLogin { reply }).await
    }

    /// Toggle the pause flag. Unpausing triggers an immediate cycle.
    pub async fn set_paused(&self, paused: bool) -> Result<SessionState, KeeperError> {
        self.request(move |reply| Command::SetPaused { paused, reply })
            .await
    }

    /// Request an ordinary connectivity-check cycle.
    pub async fn tick(&self) {
        let _ = self.tx.send(Command::Tick).await;
    }

    /// Tell the orchestrator the stored credentials changed.
    pub async fn credentials_changed(&self) {
        let _ = self.tx.send(Command::CredentialsChanged).await;
    }

    /// Spawn the periodic timer driving connectivity checks. The first tick
    /// fires immediately, which doubles as the startup check.
    pub fn spawn_ticker(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(Command::Tick).await.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn request<F>(&self, make: F) -> Result<SessionState, KeeperError>
    where
        F: FnOnce(oneshot::Sender<SessionState>) -> Command,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| KeeperError::Shutdown)?;
        reply_rx.await.map_err(|_| KeeperError::Shutdown)
    }
}

/// The state machine actor. Construct with [`Orchestrator::new`], then drive
/// it with [`run`](Orchestrator::run) on its own task.
pub struct Orchestrator {
    config: KeeperConfig,
    backoff: BackoffSchedule,
    prober: Arc<dyn ConnectivityProbe>,
    portal: Arc<dyn PortalLogin>,
    notifier: Arc<dyn Notify>,
    vault: CredentialVault,
    store: StateStore,
    state: PersistedState,
    /// Bumped on success, pause and credential change; a scheduled retry
    /// carrying an older generation is stale and gets dropped.
    retry_generation: u64,
    /// Set once a credential-error notification has been raised, so the
    /// terminal error does not storm the user on every subsequent cycle.
    credential_alerted: bool,
    cmd_tx: mpsc::Sender<Command>,
    cmd_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Rehydrate persisted state and build the actor plus its handle.
    ///
    /// Volatile fields are normalized on startup: a fresh process cannot
    /// know whether it is connected, so only the login/renewal timestamps,
    /// pause flag and credential blob survive the restart.
    pub fn new(
        config: KeeperConfig,
        prober: Arc<dyn ConnectivityProbe>,
        portal: Arc<dyn PortalLogin>,
        notifier: Arc<dyn Notify>,
        vault: CredentialVault,
        store: StateStore,
        cancel: CancellationToken,
    ) -> Result<(Self, KeeperHandle), KeeperError> {
        let mut state = store.load()?;
        state.session.status = SessionStatus::Idle;
        state.session.is_connected = false;
        state.session.last_error = None;
        state.session.retry_count = 0;

        let backoff = config.backoff();
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let handle = KeeperHandle {
            tx: cmd_tx.clone(),
        };

        Ok((
            Self {
                config,
                backoff,
                prober,
                portal,
                notifier,
                vault,
                store,
                state,
                retry_generation: 0,
                credential_alerted: false,
                cmd_tx,
                cmd_rx,
                cancel,
            },
            handle,
        ))
    }

    /// Process commands until cancelled. In-flight cycles run to completion;
    /// cancellation only stops future triggers.
    pub async fn run(mut self) {
        info!("keeper orchestrator started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("keeper orchestrator stopping");
                    break;
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Tick => {
                self.run_cycle(Trigger::Timer).await;
            }
            Command::ForceLogin { reply } => {
                let snapshot = self.run_cycle(Trigger::Manual).await;
                let _ = reply.send(snapshot);
            }
            Command::SetPaused { paused, reply } => {
                let snapshot = self.set_paused(paused).await;
                let _ = reply.send(snapshot);
            }
            Command::QueryState { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::CredentialsChanged => {
                self.on_credentials_changed().await;
            }
            Command::RetryDue { generation } => {
                if generation != self.retry_generation {
                    debug!(generation, current = self.retry_generation, "dropping stale retry");
                } else {
                    self.run_cycle(Trigger::Retry).await;
                }
            }
        }
    }

    /// One probe-or-login cycle. Entry is serialized by the command loop;
    /// preconditions (pause flag, credential presence) are re-read from the
    /// store every time so a delayed retry never acts on stale parameters.
    async fn run_cycle(&mut self, trigger: Trigger) -> SessionState {
        self.refresh_external();
        if self.state.paused && trigger != Trigger::Manual {
            debug!(?trigger, "paused; skipping cycle");
            return self.snapshot();
        }

        self.transition(|s| s.status = SessionStatus::Checking);

        let now = Utc::now();
        let login_due = trigger == Trigger::Manual || self.state.session.renewal_due(now);

        if !login_due {
            match self.prober.probe().await {
                ProbeOutcome::Reachable => {
                    self.mark_reachable();
                    return self.snapshot();
                }
                ProbeOutcome::Unreachable => {
                    self.enter_network_down();
                    return self.snapshot();
                }
                ProbeOutcome::Intercepted => {
                    self.transition(|s| {
                        s.status = SessionStatus::NeedsLogin;
                        s.is_connected = false;
                    });
                }
            }
        } else {
            debug!(?trigger, "login due; skipping probe");
        }

        self.perform_login().await;
        self.snapshot()
    }

    async fn perform_login(&mut self) {
        let credentials = match self.load_credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                self.enter_failure(e);
                return;
            }
        };

        debug!("submitting portal login");
        match self.portal.login(&credentials).await {
            Ok(LoginOutcome::Success) => self.mark_logged_in(),
            Ok(LoginOutcome::InvalidCredentials) => {
                self.enter_failure(KeeperError::CredentialsRejected);
            }
            Err(e) => self.enter_failure(KeeperError::from(e)),
        }
    }

    /// Route a login failure to the right error state: credential problems
    /// wait for user input, everything else follows the backoff schedule.
    fn enter_failure(&mut self, err: KeeperError) {
        if err.is_credential_error() {
            self.enter_credential_error(err);
        } else {
            self.enter_transient_failure(err);
        }
    }

    fn load_credentials(&self) -> Result<Credentials, KeeperError> {
        let blob = self
            .state
            .encrypted_credentials
            .as_deref()
            .ok_or(KeeperError::CredentialsMissing)?;
        self.vault.open(blob)
    }

    fn mark_logged_in(&mut self) {
        let now = Utc::now();
        let timeout = self.config.session_timeout();
        let margin = self.config.renew_margin();
        self.retry_generation += 1;
        self.credential_alerted = false;
        self.transition(|s| s.record_login_success(now, timeout, margin));
        info!("portal login succeeded; session renewed");
    }

    fn mark_reachable(&mut self) {
        self.retry_generation += 1;
        self.credential_alerted = false;
        self.transition(|s| s.record_probe_success());
        debug!("connectivity confirmed");
    }

    fn enter_network_down(&mut self) {
        let err = KeeperError::NetworkDown;
        let retry_count = self.state.session.retry_count;
        match self.backoff.delay_for(retry_count) {
            Some(delay) => {
                self.transition(|s| {
                    s.status = SessionStatus::NetworkDown;
                    s.is_connected = false;
                    s.last_error = Some(err.to_string());
                    s.retry_count = retry_count + 1;
                });
                warn!(
                    retry = retry_count + 1,
                    delay_secs = delay.as_secs(),
                    "network unreachable; retry scheduled"
                );
                self.schedule_retry(delay);
            }
            None => {
                self.transition(|s| {
                    s.status = SessionStatus::NetworkDown;
                    s.is_connected = false;
                    s.last_error = Some(format!("{err} (retries exhausted)"));
                });
                warn!("network unreachable; automatic retries exhausted");
            }
        }
    }

    fn enter_transient_failure(&mut self, err: KeeperError) {
        let retry_count = self.state.session.retry_count;
        match self.backoff.delay_for(retry_count) {
            Some(delay) => {
                let message = err.to_string();
                self.transition(|s| {
                    s.status = SessionStatus::Error;
                    s.is_connected = false;
                    s.last_error = Some(message);
                    s.retry_count = retry_count + 1;
                });
                warn!(
                    error = %err,
                    retry = retry_count + 1,
                    delay_secs = delay.as_secs(),
                    "login failed; retry scheduled"
                );
                self.schedule_retry(delay);
            }
            None => {
                self.transition(|s| {
                    s.status = SessionStatus::Error;
                    s.is_connected = false;
                    s.last_error = Some(format!("portal unreachable: {err} (retries exhausted)"));
                });
                warn!(error = %err, "login failed; automatic retries exhausted");
            }
        }
    }

    fn enter_credential_error(&mut self, err: KeeperError) {
        // No automatic retry with the same secret; only a credential change
        // or a manual login leaves this state.
        self.retry_generation += 1;
        let message = err.to_string();
        self.transition(|s| {
            s.status = SessionStatus::Error;
            s.is_connected = false;
            s.last_error = Some(message);
        });

        let notification = if matches!(err, KeeperError::CredentialsRejected) {
            Notification::CredentialsRejected
        } else {
            Notification::CredentialsMissing
        };
        if !self.credential_alerted {
            self.notifier.notify(notification);
            self.credential_alerted = true;
        }
        warn!(error = %err, "login blocked on credentials");
    }

    async fn set_paused(&mut self, paused: bool) -> SessionState {
        self.refresh_external();
        if self.state.paused == paused {
            return self.snapshot();
        }
        self.state.paused = paused;
        if paused {
            // Invalidate any pending scheduled retry.
            self.retry_generation += 1;
        }
        self.persist();
        info!(paused, "pause flag changed");

        if !paused {
            return self.run_cycle(Trigger::Timer).await;
        }
        self.snapshot()
    }

    async fn on_credentials_changed(&mut self) {
        let was_blocked = self.blocked_on_credentials();
        self.refresh_external();
        if was_blocked {
            self.run_cycle(Trigger::Timer).await;
        }
    }

    fn blocked_on_credentials(&self) -> bool {
        self.state.session.status == SessionStatus::Error && self.credential_alerted
    }

    fn schedule_retry(&self, delay: Duration) {
        let tx = self.cmd_tx.clone();
        let generation = self.retry_generation;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Command::RetryDue { generation }).await;
                }
            }
        });
    }

    /// Pick up out-of-process edits to the pause flag and credential blob
    /// (the CLI writes both directly to the store). Session fields stay
    /// canonical in memory; this actor is their only writer.
    ///
    /// A changed blob counts as a credential change wherever it comes from:
    /// the notification latch is re-armed so a later rejection of the new
    /// secret is surfaced, and a terminal credential error is cleared so the
    /// current cycle attempts a login with the new pair.
    fn refresh_external(&mut self) {
        match self.store.load() {
            Ok(disk) => {
                let credentials_changed =
                    disk.encrypted_credentials != self.state.encrypted_credentials;
                self.state.paused = disk.paused;
                self.state.encrypted_credentials = disk.encrypted_credentials;
                if credentials_changed {
                    self.apply_credential_change();
                }
            }
            Err(e) => {
                debug!(error = %e, "could not re-read state store; keeping in-memory view");
            }
        }
    }

    fn apply_credential_change(&mut self) {
        debug!("stored credentials changed");
        let blocked = self.blocked_on_credentials();
        self.credential_alerted = false;
        if blocked {
            info!("credentials changed; clearing terminal error");
            self.retry_generation += 1;
            self.transition(|s| {
                s.status = SessionStatus::Idle;
                s.last_error = None;
                s.retry_count = 0;
            });
        }
    }

    fn transition<F: FnOnce(&mut SessionState)>(&mut self, mutate: F) {
        mutate(&mut self.state.session);
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.state) {
            warn!(error = %e, "failed to persist session state");
        }
    }

    fn snapshot(&self) -> SessionState {
        self.state.session.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct FakeProbe {
        script: Mutex<VecDeque<ProbeOutcome>>,
        fallback: Option<ProbeOutcome>,
        calls: AtomicU32,
    }

    impl FakeProbe {
        fn always(outcome: ProbeOutcome) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Some(outcome),
                calls: AtomicU32::new(0),
            })
        }

        fn scripted(outcomes: &[ProbeOutcome], fallback: ProbeOutcome) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(outcomes.iter().copied().collect()),
                fallback: Some(fallback),
                calls: AtomicU32::new(0),
            })
        }

        fn unreachable_code() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                fallback: None,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConnectivityProbe for FakeProbe {
        async fn probe(&self) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.script.lock().pop_front();
            match scripted.or(self.fallback) {
                Some(outcome) => outcome,
                None => panic!("probe must not run in this scenario"),
            }
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum LoginScript {
        Success,
        Invalid,
        TokenMissing,
    }

    struct FakeLogin {
        script: Mutex<VecDeque<LoginScript>>,
        fallback: LoginScript,
        calls: AtomicU32,
    }

    impl FakeLogin {
        fn always(outcome: LoginScript) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                fallback: outcome,
                calls: AtomicU32::new(0),
            })
        }

        fn scripted(outcomes: &[LoginScript], fallback: LoginScript) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(outcomes.iter().copied().collect()),
                fallback,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PortalLogin for FakeLogin {
        async fn login(&self, _credentials: &Credentials) -> Result<LoginOutcome, PortalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front().unwrap_or(self.fallback);
            match next {
                LoginScript::Success => Ok(LoginOutcome::Success),
                LoginScript::Invalid => Ok(LoginOutcome::InvalidCredentials),
                LoginScript::TokenMissing => Err(PortalError::TokenNotFound),
            }
        }
    }

    struct RecordingNotifier {
        events: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<Notification> {
            self.events.lock().clone()
        }
    }

    impl Notify for RecordingNotifier {
        fn notify(&self, notification: Notification) {
            self.events.lock().push(notification);
        }
    }

    struct Harness {
        handle: KeeperHandle,
        notifier: Arc<RecordingNotifier>,
        cancel: CancellationToken,
        dir: TempDir,
        _task: JoinHandle<()>,
    }

    impl Harness {
        fn store(&self) -> StateStore {
            StateStore::new(self.dir.path().join("state.json"))
        }

        fn vault(&self) -> CredentialVault {
            CredentialVault::new(self.dir.path().join("vault.key"))
        }

        /// Seal fresh credentials into the on-disk document, the way the
        /// CLI does from another process.
        fn write_credentials(&self, username: &str, password: &str) {
            let store = self.store();
            let mut state = store.load().unwrap();
            state.encrypted_credentials = Some(
                self.vault()
                    .seal(&Credentials {
                        username: username.to_string(),
                        password: password.to_string(),
                    })
                    .unwrap(),
            );
            store.save(&state).unwrap();
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    fn spawn_keeper(
        probe: Arc<FakeProbe>,
        login: Arc<FakeLogin>,
        seed: impl FnOnce(&StateStore, &CredentialVault),
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let vault = CredentialVault::new(dir.path().join("vault.key"));
        seed(&store, &vault);

        let notifier = RecordingNotifier::new();
        let cancel = CancellationToken::new();
        let (orchestrator, handle) = Orchestrator::new(
            KeeperConfig::default(),
            probe,
            login,
            notifier.clone(),
            CredentialVault::new(dir.path().join("vault.key")),
            StateStore::new(dir.path().join("state.json")),
            cancel.clone(),
        )
        .unwrap();
        let task = tokio::spawn(orchestrator.run());

        Harness {
            handle,
            notifier,
            cancel,
            dir,
            _task: task,
        }
    }

    fn seed_credentials(store: &StateStore, vault: &CredentialVault) {
        let state = PersistedState {
            encrypted_credentials: Some(
                vault
                    .seal(&Credentials {
                        username: "student01".to_string(),
                        password: "hunter2!".to_string(),
                    })
                    .unwrap(),
            ),
            ..Default::default()
        };
        store.save(&state).unwrap();
    }

    /// Poll under the paused clock until the predicate holds. The budget has
    /// to outlast the whole 5+15+45s backoff schedule in virtual time.
    async fn wait_for(
        handle: &KeeperHandle,
        pred: impl Fn(&SessionState) -> bool,
    ) -> SessionState {
        for _ in 0..5000 {
            let state = handle.state().await.unwrap();
            if pred(&state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "condition not reached; last state: {:?}",
            handle.state().await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reachable_probe_marks_connected_without_login() {
        let probe = FakeProbe::always(ProbeOutcome::Reachable);
        let login = FakeLogin::always(LoginScript::Success);
        let harness = spawn_keeper(probe.clone(), login.clone(), |_, _| {});

        harness.handle.tick().await;
        let state = wait_for(&harness.handle, |s| s.status == SessionStatus::Connected).await;

        assert!(state.is_connected);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.last_error, None);
        assert_eq!(login.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn intercepted_probe_logs_in_and_sets_renewal_window() {
        let probe = FakeProbe::always(ProbeOutcome::Intercepted);
        let login = FakeLogin::always(LoginScript::Success);
        let harness = spawn_keeper(probe, login.clone(), seed_credentials);

        harness.handle.tick().await;
        let state = wait_for(&harness.handle, |s| s.status == SessionStatus::Connected).await;

        assert!(state.is_connected);
        assert_eq!(state.retry_count, 0);
        assert_eq!(login.calls(), 1);

        let last_login = state.last_login_at.expect("login timestamp");
        let next_renew = state.next_renew_at.expect("renewal deadline");
        // 1200s session minus 120s margin.
        assert_eq!(next_renew - last_login, chrono::Duration::seconds(1080));
    }

    #[tokio::test(start_paused = true)]
    async fn force_login_skips_probe_and_reports_outcome() {
        let probe = FakeProbe::unreachable_code();
        let login = FakeLogin::always(LoginScript::Success);
        let harness = spawn_keeper(probe, login.clone(), seed_credentials);

        let state = harness.handle.force_login().await.unwrap();

        assert_eq!(state.status, SessionStatus::Connected);
        assert!(state.is_connected);
        assert_eq!(login.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_due_skips_probe_on_timer_tick() {
        let probe = FakeProbe::unreachable_code();
        let login = FakeLogin::always(LoginScript::Success);
        let harness = spawn_keeper(probe, login.clone(), |store, vault| {
            seed_credentials(store, vault);
            let mut state = store.load().unwrap();
            state.session.last_login_at = Some(Utc::now() - chrono::Duration::seconds(2000));
            state.session.next_renew_at = Some(Utc::now() - chrono::Duration::seconds(920));
            store.save(&state).unwrap();
        });

        harness.handle.tick().await;
        wait_for(&harness.handle, |s| s.status == SessionStatus::Connected).await;
        assert_eq!(login.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credentials_is_terminal_and_notifies_once() {
        let probe = FakeProbe::always(ProbeOutcome::Intercepted);
        let login = FakeLogin::always(LoginScript::Success);
        let harness = spawn_keeper(probe, login.clone(), |_, _| {});

        harness.handle.tick().await;
        let state = wait_for(&harness.handle, |s| s.status == SessionStatus::Error).await;

        assert_eq!(state.last_error.as_deref(), Some("credentials not configured"));
        assert_eq!(state.retry_count, 0);
        assert_eq!(login.calls(), 0);

        // A second tick re-attempts but must not notify again.
        harness.handle.tick().await;
        wait_for(&harness.handle, |s| s.status == SessionStatus::Error).await;
        assert_eq!(
            harness.notifier.events(),
            vec![Notification::CredentialsMissing]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_credentials_notifies_once_without_auto_retry() {
        let probe = FakeProbe::always(ProbeOutcome::Intercepted);
        let login = FakeLogin::always(LoginScript::Invalid);
        let harness = spawn_keeper(probe, login.clone(), seed_credentials);

        harness.handle.tick().await;
        let state = wait_for(&harness.handle, |s| s.status == SessionStatus::Error).await;
        assert_eq!(state.last_error.as_deref(), Some("invalid credentials"));
        assert_eq!(login.calls(), 1);

        // No backoff retry may fire for a rejected credential set.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(login.calls(), 1);

        // The next periodic tick re-attempts, but the notification is not
        // repeated while the terminal error persists.
        harness.handle.tick().await;
        wait_for(&harness.handle, |s| s.status == SessionStatus::Error).await;
        assert_eq!(login.calls(), 2);
        assert_eq!(
            harness.notifier.events(),
            vec![Notification::CredentialsRejected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_then_recovers() {
        let probe = FakeProbe::always(ProbeOutcome::Intercepted);
        let login = FakeLogin::scripted(&[LoginScript::TokenMissing], LoginScript::Success);
        let harness = spawn_keeper(probe, login.clone(), seed_credentials);

        harness.handle.tick().await;
        let state = wait_for(&harness.handle, |s| s.status == SessionStatus::Connected).await;

        assert_eq!(state.retry_count, 0);
        assert_eq!(login.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_the_schedule() {
        let probe = FakeProbe::always(ProbeOutcome::Intercepted);
        let login = FakeLogin::always(LoginScript::TokenMissing);
        let harness = spawn_keeper(probe, login.clone(), seed_credentials);

        harness.handle.tick().await;
        let state = wait_for(&harness.handle, |s| {
            s.last_error
                .as_deref()
                .is_some_and(|e| e.contains("retries exhausted"))
        })
        .await;

        assert_eq!(state.status, SessionStatus::Error);
        assert!(!state.is_connected);
        // retry_count is capped by the schedule length.
        assert_eq!(state.retry_count, 3);
        // Initial attempt plus one per schedule entry.
        assert_eq!(login.calls(), 4);

        // Terminal: no more automatic attempts.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(login.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn token_failure_message_names_the_token() {
        let probe = FakeProbe::always(ProbeOutcome::Intercepted);
        let login = FakeLogin::always(LoginScript::TokenMissing);
        let harness = spawn_keeper(probe, login, seed_credentials);

        harness.handle.tick().await;
        let state = wait_for(&harness.handle, |s| s.status == SessionStatus::Error).await;
        assert!(
            state
                .last_error
                .as_deref()
                .is_some_and(|e| e.contains("magic token"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn network_down_retries_on_schedule_and_recovers() {
        let probe = FakeProbe::scripted(
            &[ProbeOutcome::Unreachable, ProbeOutcome::Unreachable],
            ProbeOutcome::Reachable,
        );
        let login = FakeLogin::always(LoginScript::Success);
        let harness = spawn_keeper(probe.clone(), login.clone(), |_, _| {});

        harness.handle.tick().await;
        let down = wait_for(&harness.handle, |s| s.status == SessionStatus::NetworkDown).await;
        assert_eq!(down.last_error.as_deref(), Some("network unreachable"));

        let state = wait_for(&harness.handle, |s| s.status == SessionStatus::Connected).await;
        assert_eq!(state.retry_count, 0);
        assert_eq!(login.calls(), 0);
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn network_down_exhausts_the_schedule() {
        let probe = FakeProbe::always(ProbeOutcome::Unreachable);
        let login = FakeLogin::always(LoginScript::Success);
        let harness = spawn_keeper(probe.clone(), login, |_, _| {});

        harness.handle.tick().await;
        let state = wait_for(&harness.handle, |s| {
            s.last_error
                .as_deref()
                .is_some_and(|e| e.contains("retries exhausted"))
        })
        .await;

        assert_eq!(state.status, SessionStatus::NetworkDown);
        assert_eq!(state.retry_count, 3);
        assert_eq!(probe.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_ticks_are_no_ops() {
        let probe = FakeProbe::always(ProbeOutcome::Reachable);
        let login = FakeLogin::always(LoginScript::Success);
        let harness = spawn_keeper(probe.clone(), login, |_, _| {});

        let state = harness.handle.set_paused(true).await.unwrap();
        assert_eq!(state.status, SessionStatus::Idle);

        harness.handle.tick().await;
        harness.handle.tick().await;
        let state = harness.handle.state().await.unwrap();
        assert_eq!(state.status, SessionStatus::Idle);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pausing_mid_backoff_stops_scheduled_retries() {
        let probe = FakeProbe::always(ProbeOutcome::Unreachable);
        let login = FakeLogin::always(LoginScript::Success);
        let harness = spawn_keeper(probe.clone(), login, |_, _| {});

        harness.handle.tick().await;
        wait_for(&harness.handle, |s| s.status == SessionStatus::NetworkDown).await;
        let calls_before = probe.calls();

        harness.handle.set_paused(true).await.unwrap();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(probe.calls(), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn unpausing_triggers_an_immediate_cycle() {
        let probe = FakeProbe::always(ProbeOutcome::Reachable);
        let login = FakeLogin::always(LoginScript::Success);
        let harness = spawn_keeper(probe.clone(), login, |store, _| {
            let state = PersistedState {
                paused: true,
                ..Default::default()
            };
            store.save(&state).unwrap();
        });

        let state = harness.handle.set_paused(false).await.unwrap();
        assert_eq!(state.status, SessionStatus::Connected);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn query_state_is_idempotent() {
        let probe = FakeProbe::always(ProbeOutcome::Reachable);
        let login = FakeLogin::always(LoginScript::Success);
        let harness = spawn_keeper(probe, login, |_, _| {});

        harness.handle.tick().await;
        wait_for(&harness.handle, |s| s.status == SessionStatus::Connected).await;

        let first = harness.handle.state().await.unwrap();
        let second = harness.handle.state().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_change_clears_rejection_and_relogins() {
        let probe = FakeProbe::always(ProbeOutcome::Intercepted);
        let login = FakeLogin::scripted(&[LoginScript::Invalid], LoginScript::Success);
        let harness = spawn_keeper(probe, login.clone(), seed_credentials);

        harness.handle.tick().await;
        wait_for(&harness.handle, |s| {
            s.last_error.as_deref() == Some("invalid credentials")
        })
        .await;

        harness.write_credentials("student01", "corrected-secret");
        harness.handle.credentials_changed().await;

        let state = wait_for(&harness.handle, |s| s.status == SessionStatus::Connected).await;
        assert_eq!(state.retry_count, 0);
        assert_eq!(login.calls(), 2);
        assert_eq!(
            harness.notifier.events(),
            vec![Notification::CredentialsRejected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn credentials_written_by_another_process_rearm_notifications() {
        let probe = FakeProbe::always(ProbeOutcome::Intercepted);
        let login = FakeLogin::always(LoginScript::Invalid);
        let harness = spawn_keeper(probe, login.clone(), |_, _| {});

        harness.handle.tick().await;
        wait_for(&harness.handle, |s| {
            s.last_error.as_deref() == Some("credentials not configured")
        })
        .await;

        // The CLI stores credentials straight into the state document; the
        // daemon only notices on its next cycle.
        harness.write_credentials("student01", "wrong-secret");
        harness.handle.tick().await;
        let state = wait_for(&harness.handle, |s| {
            s.last_error.as_deref() == Some("invalid credentials")
        })
        .await;

        assert_eq!(state.status, SessionStatus::Error);
        assert_eq!(login.calls(), 1);
        assert_eq!(
            harness.notifier.events(),
            vec![
                Notification::CredentialsMissing,
                Notification::CredentialsRejected
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn startup_normalizes_volatile_fields() {
        let probe = FakeProbe::unreachable_code();
        let login = FakeLogin::always(LoginScript::Success);
        let last_login = Utc::now() - chrono::Duration::seconds(60);
        let harness = spawn_keeper(probe, login, |store, _| {
            let mut state = PersistedState::default();
            state.session.status = SessionStatus::Checking;
            state.session.is_connected = true;
            state.session.retry_count = 2;
            state.session.last_error = Some("stale".to_string());
            state.session.last_login_at = Some(last_login);
            state.session.next_renew_at = Some(last_login + chrono::Duration::seconds(1080));
            store.save(&state).unwrap();
        });

        let state = harness.handle.state().await.unwrap();
        assert_eq!(state.status, SessionStatus::Idle);
        assert!(!state.is_connected);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.last_error, None);
        assert_eq!(state.last_login_at, Some(last_login));
        assert_eq!(
            state.next_renew_at,
            Some(last_login + chrono::Duration::seconds(1080))
        );
    }
}
