//! Session & activity lifecycle controller.
//!
//! Owns the logical session between a successful login and its end (manual
//! sign-out, wall-clock expiry, or inactivity). Timers are tokio tasks whose
//! handles live on the controller; a generation counter tags each inactivity
//! and warning pair so a callback from a superseded pair is ignored.
//! Background tasks only hold a `Weak` back-reference, so dropping the
//! controller ends them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::lifecycle::{Notice, Phase, SessionSnapshot, SignOutReason};
use super::principal::{AuthSession, Profile, User};
use super::provider::{AuthChange, AuthEvent, IdentityBackend, ProfileStore};
use super::ui::SessionUi;
use crate::clock::Clock;
use crate::config::ControllerOptions;
use crate::error::{AppError, AppResult};
use crate::settings::{SessionConfig, SettingsStore};
use crate::storage::{encode_stamp, parse_stamp, KeyValueStore};

use chrono::{DateTime, Utc};

const TARGET: &str = "portal_session::session";

/// Deadline used when `now + delay` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Collaborators the controller is wired to; all shared, none owned.
#[derive(Clone)]
pub struct SessionDeps {
    pub identity: Arc<dyn IdentityBackend>,
    pub profiles: Arc<dyn ProfileStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub ui: Arc<dyn SessionUi>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct Timers {
    generation: u64,
    inactivity: Option<JoinHandle<()>>,
    warning: Option<JoinHandle<()>>,
    expiry_check: Option<JoinHandle<()>>,
    settings_refresh: Option<JoinHandle<()>>,
    auth_feed: Option<JoinHandle<()>>,
}

impl Timers {
    /// Cancel the inactivity/warning pair and invalidate any callback already running.
    fn cancel_inactivity(&mut self) {
        self.generation += 1;
        if let Some(h) = self.inactivity.take() { h.abort(); }
        if let Some(h) = self.warning.take() { h.abort(); }
    }

    fn cancel_session(&mut self) {
        self.cancel_inactivity();
        if let Some(h) = self.expiry_check.take() { h.abort(); }
    }

    fn cancel_all(&mut self) {
        self.cancel_session();
        if let Some(h) = self.settings_refresh.take() { h.abort(); }
        if let Some(h) = self.auth_feed.take() { h.abort(); }
    }
}

struct SessionState {
    phase: Phase,
    user: Option<User>,
    session_id: Option<String>,
    profile: Option<Profile>,
    loading: bool,
    /// User id whose profile fetch has been started for the current login.
    profile_fetched_for: Option<String>,
    config: SessionConfig,
    settings_loaded: bool,
    warning_shown: bool,
    timers: Timers,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: Phase::Unauthenticated,
            user: None,
            session_id: None,
            profile: None,
            loading: true,
            profile_fetched_for: None,
            config: SessionConfig::default(),
            settings_loaded: false,
            warning_shown: false,
            timers: Timers::default(),
        }
    }

    /// Drop every per-login field; returns the ended user and session id.
    fn clear_login(&mut self) -> (Option<User>, Option<String>) {
        self.timers.cancel_session();
        self.profile = None;
        self.profile_fetched_for = None;
        self.warning_shown = false;
        self.loading = false;
        self.phase = Phase::Unauthenticated;
        (self.user.take(), self.session_id.take())
    }
}

enum Claim {
    Ignored,
    Expired,
    Accepted { fresh_login: bool, fetch: bool },
}

pub struct SessionController {
    identity: Arc<dyn IdentityBackend>,
    profiles: Arc<dyn ProfileStore>,
    settings: Arc<dyn SettingsStore>,
    kv: Arc<dyn KeyValueStore>,
    ui: Arc<dyn SessionUi>,
    clock: Arc<dyn Clock>,
    options: ControllerOptions,
    runtime: Handle,
    me: Weak<SessionController>,
    state: Mutex<SessionState>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    /// Build an unauthenticated controller. Must be called inside a tokio
    /// runtime; timers are spawned onto that runtime from any thread afterwards.
    pub fn new(deps: SessionDeps, options: ControllerOptions) -> AppResult<Arc<Self>> {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::config("no_runtime".to_string(), format!("session controller needs a tokio runtime: {}", e)))?;
        let (snapshot, _) = watch::channel(SessionSnapshot { loading: true, ..Default::default() });
        Ok(Arc::new_cyclic(|me| Self {
            identity: deps.identity,
            profiles: deps.profiles,
            settings: deps.settings,
            kv: deps.kv,
            ui: deps.ui,
            clock: deps.clock,
            options,
            runtime,
            me: me.clone(),
            state: Mutex::new(SessionState::new()),
            snapshot,
        }))
    }

    // ---- read side -------------------------------------------------------

    pub fn current_user(&self) -> Option<User> { self.state.lock().user.clone() }
    pub fn profile(&self) -> Option<Profile> { self.state.lock().profile.clone() }
    pub fn is_loading(&self) -> bool { self.state.lock().loading }
    pub fn phase(&self) -> Phase { self.state.lock().phase }
    pub fn config(&self) -> SessionConfig { self.state.lock().config }
    pub fn options(&self) -> &ControllerOptions { &self.options }

    /// True while an inactivity logout timer is outstanding.
    pub fn inactivity_armed(&self) -> bool { self.state.lock().timers.inactivity.is_some() }
    pub fn warning_armed(&self) -> bool { self.state.lock().timers.warning.is_some() }

    /// Login timestamp as persisted, if any.
    pub fn session_started_at(&self) -> Option<DateTime<Utc>> { self.login_stamp() }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionSnapshot> { self.snapshot.subscribe() }

    fn publish(&self) {
        let snap = {
            let st = self.state.lock();
            SessionSnapshot { phase: st.phase, user: st.user.clone(), profile: st.profile.clone(), loading: st.loading }
        };
        self.snapshot.send_if_modified(|cur| {
            if *cur == snap { return false; }
            *cur = snap;
            true
        });
    }

    // ---- lifecycle -------------------------------------------------------

    /// Load settings, start the background feeds, and adopt whatever session
    /// the Identity Backend already holds. Safe to call again after a sign-out.
    pub async fn initialize(&self) {
        self.refresh_settings().await;
        self.ensure_background();
        match self.identity.get_current_session().await {
            Ok(Some(session)) => {
                debug!(target: TARGET, user_id = %session.user.id, "existing session found");
                self.on_session_present(session, false).await;
            }
            Ok(None) => {
                debug!(target: TARGET, "no existing session");
                self.on_session_absent();
            }
            Err(e) => log_failure("session lookup", &e),
        }
        self.state.lock().loading = false;
        self.publish();
    }

    /// Sign in with credentials. Credential errors are returned for the login form.
    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<User> {
        if self.phase() == Phase::TransitioningOut {
            return Err(AppError::conflict("signing_out", "a sign-out is still in progress"));
        }
        let session = self.identity.sign_in_with_password(email, password).await?;
        let user = session.user.clone();
        self.kv_remove(&self.options.revoked_key);
        self.on_session_present(session, true).await;
        Ok(user)
    }

    /// End the session on the user's request. Concurrent calls collapse into one.
    pub async fn sign_out(&self) {
        self.end_session(SignOutReason::Manual).await;
    }

    /// Reset the inactivity cycle. Cheap and synchronous: it only re-arms timers.
    pub fn record_activity(&self) {
        let left_warning = {
            let mut st = self.state.lock();
            if !st.config.auto_logout_enabled || st.user.is_none() || !st.phase.is_authenticated() {
                return;
            }
            let was_warning = st.phase == Phase::WarningShown;
            st.warning_shown = false;
            st.phase = Phase::Active;
            self.arm_inactivity(&mut st);
            was_warning
        };
        if left_warning {
            debug!(target: TARGET, "activity after warning; timers re-armed");
            self.publish();
        }
    }

    /// Compare the persisted login stamp with the configured session lifetime.
    /// When expired, the session is torn down and `true` is returned; callers
    /// must stop whatever they were about to do.
    pub async fn check_session_expiry(&self) -> bool {
        let Some(started) = self.login_stamp() else { return false; };
        let limit = self.state.lock().config.session_duration;
        if !self.lifetime_exceeded(started, limit) { return false; }
        self.end_session(SignOutReason::Expired).await;
        true
    }

    /// Re-read the profile of the signed-in user.
    pub async fn refresh_profile(&self) {
        let uid = self.state.lock().user.as_ref().map(|u| u.id.clone());
        if let Some(uid) = uid { self.load_profile(&uid).await; }
    }

    /// Pull operator settings. A failure keeps whatever is currently applied.
    pub async fn refresh_settings(&self) -> bool {
        match self.settings.get_settings().await {
            Ok(s) => {
                self.apply_config(SessionConfig::from_settings(&s));
                true
            }
            Err(e) => {
                let loaded = self.state.lock().settings_loaded;
                warn!(target: TARGET, code = e.code_str(), settings_loaded = loaded, "settings refresh failed; keeping current durations: {}", e.message());
                false
            }
        }
    }

    /// Stop every background task. The controller stays usable for reads.
    pub fn shutdown(&self) {
        self.state.lock().timers.cancel_all();
        debug!(target: TARGET, "controller shut down");
    }

    // ---- transitions -----------------------------------------------------

    async fn handle_auth_change(&self, change: AuthChange) {
        debug!(target: TARGET, event = ?change.event, has_session = change.session.is_some(), "auth change");
        match change.session {
            Some(session) => self.on_session_present(session, false).await,
            None => self.on_session_absent(),
        }
    }

    /// Adopt a session reported by the backend. `credentials` is true when the
    /// user just typed a password here, so any stamp left from an earlier login
    /// belongs to someone else's session.
    async fn on_session_present(&self, session: AuthSession, credentials: bool) {
        if self.phase() == Phase::TransitioningOut {
            debug!(target: TARGET, "ignoring session report during sign-out");
            return;
        }
        match self.revoked_marker() {
            Some(ended) if ended == session.session_id => {
                info!(target: TARGET, user_id = %session.user.id, "backend still reports a locally ended session; staying signed out");
                if let Err(e) = self.identity.sign_out().await { log_failure("sign-out retry", &e); }
                return;
            }
            Some(_) => self.kv_remove(&self.options.revoked_key),
            None => {}
        }

        let (fresh_login, fetch) = match self.claim_session(&session, credentials) {
            Claim::Ignored => return,
            // An already-expired session must not fetch anything.
            Claim::Expired => {
                self.end_session(SignOutReason::Expired).await;
                return;
            }
            Claim::Accepted { fresh_login, fetch } => (fresh_login, fetch),
        };
        self.publish();

        if fresh_login { self.record_last_login(&session.user.id).await; }
        if fetch { self.load_profile(&session.user.id).await; }
    }

    /// Stamp and phase move together under the lock so a sign-in racing its
    /// own SignedIn notification records exactly one login.
    fn claim_session(&self, session: &AuthSession, credentials: bool) -> Claim {
        let mut st = self.state.lock();
        if st.phase == Phase::TransitioningOut { return Claim::Ignored; }
        let switching = st.user.as_ref().is_some_and(|u| u.id != session.user.id);
        if switching || (credentials && !st.phase.is_authenticated()) {
            self.kv_remove(&self.options.stamp_key);
        }
        let fresh_login = match self.login_stamp() {
            Some(started) if self.lifetime_exceeded(started, st.config.session_duration) => return Claim::Expired,
            Some(_) => false,
            None => {
                self.kv_set(&self.options.stamp_key, &encode_stamp(self.clock.now()));
                true
            }
        };

        if switching {
            st.profile = None;
            st.profile_fetched_for = None;
        }
        st.user = Some(session.user.clone());
        st.session_id = Some(session.session_id.clone());
        if st.phase == Phase::Unauthenticated || switching {
            st.phase = Phase::Active;
            st.warning_shown = false;
            self.arm_inactivity(&mut st);
            self.arm_expiry_check(&mut st);
            info!(target: TARGET, user_id = %session.user.id, fresh_login, auto_logout = st.config.auto_logout_enabled, "session active");
        }
        let fetch = st.profile_fetched_for.as_deref() != Some(session.user.id.as_str());
        if fetch {
            st.profile_fetched_for = Some(session.user.id.clone());
            st.loading = true;
        }
        Claim::Accepted { fresh_login, fetch }
    }

    fn on_session_absent(&self) {
        let ended = {
            let mut st = self.state.lock();
            if st.phase == Phase::TransitioningOut { return; }
            st.clear_login().0
        };
        self.kv_remove(&self.options.stamp_key);
        self.publish();
        if let Some(user) = ended {
            info!(target: TARGET, user_id = %user.id, "backend reports no session; local state cleared");
            self.ui.redirect_to_login();
        }
    }

    async fn end_session(&self, reason: SignOutReason) {
        let Some(this) = self.me.upgrade() else { return; };
        {
            let mut st = self.state.lock();
            if st.phase == Phase::TransitioningOut {
                debug!(target: TARGET, reason = ?reason, "sign-out already in progress");
                return;
            }
            st.phase = Phase::TransitioningOut;
            st.timers.cancel_session();
        }
        self.publish();
        // Own task: cancelling the timer that triggered this cannot cut teardown short.
        let teardown = self.runtime.spawn(async move { this.teardown(reason).await });
        if let Err(e) = teardown.await {
            error!(target: TARGET, error = %e, "sign-out teardown aborted");
        }
    }

    async fn teardown(&self, reason: SignOutReason) {
        if let Some(notice) = Notice::for_reason(reason) { self.ui.notify(&notice); }
        if let Err(e) = self.identity.sign_out().await {
            warn!(target: TARGET, code = e.code_str(), "backend sign-out failed; clearing local session anyway: {}", e.message());
        }
        let (user, session_id) = self.state.lock().clear_login();
        self.kv_remove(&self.options.stamp_key);
        if let Some(sid) = session_id { self.kv_set(&self.options.revoked_key, &sid); }
        self.publish();
        self.ui.redirect_to_login();
        info!(target: TARGET, user_id = ?user.map(|u| u.id), reason = ?reason, "signed out");
    }

    // ---- timers ----------------------------------------------------------

    /// Cancel the outstanding pair, then arm a fresh one from now.
    fn arm_inactivity(&self, st: &mut SessionState) {
        st.timers.cancel_inactivity();
        if !st.config.auto_logout_enabled { return; }
        let gen = st.timers.generation;
        let now = Instant::now();
        if let Some(delay) = st.config.warning_delay() {
            let me = self.me.clone();
            let at = deadline_after(now, delay);
            st.timers.warning = Some(self.runtime.spawn(async move {
                tokio::time::sleep_until(at).await;
                if let Some(this) = me.upgrade() { this.on_warning_due(gen); }
            }));
        }
        let me = self.me.clone();
        let at = deadline_after(now, st.config.inactivity_timeout);
        st.timers.inactivity = Some(self.runtime.spawn(async move {
            tokio::time::sleep_until(at).await;
            if let Some(this) = me.upgrade() { this.on_inactivity_due(gen).await; }
        }));
    }

    fn on_warning_due(&self, gen: u64) {
        let minutes = {
            let mut st = self.state.lock();
            if st.timers.generation != gen || st.warning_shown || st.phase != Phase::Active { return; }
            st.warning_shown = true;
            st.phase = Phase::WarningShown;
            // Finishing; detach rather than abort.
            st.timers.warning = None;
            st.config.warning_minutes()
        };
        info!(target: TARGET, minutes_remaining = minutes, "inactivity warning");
        self.publish();
        self.ui.notify(&Notice::InactivityWarning { minutes_remaining: minutes });
    }

    async fn on_inactivity_due(&self, gen: u64) {
        {
            let st = self.state.lock();
            if st.timers.generation != gen || !st.phase.is_authenticated() { return; }
        }
        info!(target: TARGET, "inactivity timeout reached");
        self.end_session(SignOutReason::Inactive).await;
    }

    fn arm_expiry_check(&self, st: &mut SessionState) {
        if let Some(h) = st.timers.expiry_check.take() { h.abort(); }
        let me = self.me.clone();
        let period = self.options.expiry_check_interval;
        let first = deadline_after(Instant::now(), period);
        st.timers.expiry_check = Some(self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(this) = me.upgrade() else { break; };
                if this.check_session_expiry().await { break; }
            }
        }));
    }

    fn ensure_background(&self) {
        let mut st = self.state.lock();
        if st.timers.auth_feed.is_none() {
            let rx = self.identity.subscribe();
            st.timers.auth_feed = Some(self.runtime.spawn(auth_feed(self.me.clone(), rx)));
        }
        if st.timers.settings_refresh.is_none() {
            let me = self.me.clone();
            let period = self.options.settings_refresh_interval;
            let first = deadline_after(Instant::now(), period);
            st.timers.settings_refresh = Some(self.runtime.spawn(async move {
                let mut ticker = tokio::time::interval_at(first, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let Some(this) = me.upgrade() else { break; };
                    this.refresh_settings().await;
                }
            }));
        }
    }

    fn apply_config(&self, cfg: SessionConfig) {
        {
            let mut st = self.state.lock();
            st.settings_loaded = true;
            if st.config == cfg { return; }
            if cfg.warning_delay().is_none() && !cfg.warning_lead.is_zero() {
                warn!(
                    target: TARGET,
                    warning_mins = cfg.warning_lead.as_secs() / 60,
                    timeout_mins = cfg.inactivity_timeout.as_secs() / 60,
                    "warning lead is not shorter than the inactivity timeout; warning disabled"
                );
            }
            info!(target: TARGET, config = ?cfg, "session settings applied");
            st.config = cfg;
            if st.phase.is_authenticated() {
                st.warning_shown = false;
                st.phase = Phase::Active;
                self.arm_inactivity(&mut st);
            }
        }
        self.publish();
    }

    // ---- profile ---------------------------------------------------------

    async fn load_profile(&self, user_id: &str) {
        if self.check_session_expiry().await { return; }
        self.state.lock().loading = true;
        self.publish();

        let res = self.profiles.get_profile(user_id).await;
        let failure = {
            let mut st = self.state.lock();
            st.loading = false;
            let current = st.phase.is_authenticated() && st.user.as_ref().is_some_and(|u| u.id == user_id);
            if !current {
                debug!(target: TARGET, user_id = %user_id, "discarding profile for an ended login");
                None
            } else {
                match res {
                    Ok(p) => { st.profile = Some(p); None }
                    Err(e) => { st.profile = None; Some(e) }
                }
            }
        };
        if let Some(e) = failure { log_failure("profile fetch", &e); }
        self.publish();
    }

    async fn record_last_login(&self, user_id: &str) {
        if let Err(e) = self.profiles.update_last_login(user_id, self.clock.now()).await {
            log_failure("last-login update", &e);
        }
    }

    // ---- durable keys ----------------------------------------------------

    fn login_stamp(&self) -> Option<DateTime<Utc>> {
        let raw = match self.kv.get(&self.options.stamp_key) {
            Ok(v) => v?,
            Err(e) => { log_failure("login stamp read", &e); return None; }
        };
        let parsed = parse_stamp(&raw);
        if parsed.is_none() {
            warn!(target: TARGET, raw = %raw, "unreadable login stamp discarded");
            self.kv_remove(&self.options.stamp_key);
        }
        parsed
    }

    fn lifetime_exceeded(&self, started: DateTime<Utc>, limit: Duration) -> bool {
        let elapsed = self.clock.now().signed_duration_since(started);
        let exceeded = elapsed.to_std().map(|e| e >= limit).unwrap_or(false);
        if exceeded {
            info!(target: TARGET, elapsed_mins = elapsed.num_minutes(), limit_mins = limit.as_secs() / 60, "session lifetime exceeded");
        }
        exceeded
    }

    /// Id of the last session ended locally, if still remembered.
    fn revoked_marker(&self) -> Option<String> {
        match self.kv.get(&self.options.revoked_key) {
            Ok(v) => v,
            Err(e) => { log_failure("revoked marker read", &e); None }
        }
    }

    fn kv_set(&self, key: &str, value: &str) {
        if let Err(e) = self.kv.set(key, value) { log_failure("state write", &e); }
    }

    fn kv_remove(&self, key: &str) {
        if let Err(e) = self.kv.remove(key) { log_failure("state delete", &e); }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.state.get_mut().timers.cancel_all();
    }
}

async fn auth_feed(me: Weak<SessionController>, mut rx: broadcast::Receiver<AuthChange>) {
    loop {
        let change = match rx.recv().await {
            Ok(change) => change,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Missed notifications; the current session is the only truth.
                warn!(target: TARGET, skipped, "auth feed lagged; resyncing");
                let Some(this) = me.upgrade() else { break; };
                match this.identity.get_current_session().await {
                    Ok(session) => AuthChange { event: AuthEvent::InitialSession, session },
                    Err(e) => { log_failure("session resync", &e); continue; }
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(this) = me.upgrade() else { break; };
        this.handle_auth_change(change).await;
    }
    debug!(target: TARGET, "auth feed ended");
}

fn log_failure(what: &str, e: &AppError) {
    if e.is_transient() {
        warn!(target: TARGET, code = e.code_str(), "{} failed: {}", what, e.message());
    } else {
        error!(target: TARGET, code = e.code_str(), "{} failed: {}", what, e.message());
    }
}
