//! In-process collaborators: an identity backend, a profile table and a
//! recording UI. The driver binary runs on them; tests use their counters and
//! failure/latency switches to exercise the error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::lifecycle::Notice;
use super::principal::{AuthSession, Profile, User};
use super::provider::{AuthChange, AuthEvent, IdentityBackend, ProfileStore};
use super::ui::SessionUi;
use crate::error::{AppError, AppResult};

pub struct InMemoryIdentity {
    accounts: RwLock<HashMap<String, (String, User)>>,
    current: Mutex<Option<AuthSession>>,
    tx: broadcast::Sender<AuthChange>,
    fail_lookup: AtomicBool,
    fail_sign_out: AtomicBool,
    /// Simulates a backend whose cached session outlives a sign-out.
    keep_session_on_sign_out: AtomicBool,
    sign_out_delay: Mutex<Duration>,
    sign_out_calls: AtomicU64,
    lookups: AtomicU64,
}

impl Default for InMemoryIdentity {
    fn default() -> Self { Self::new() }
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            accounts: RwLock::new(HashMap::new()),
            current: Mutex::new(None),
            tx,
            fail_lookup: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            keep_session_on_sign_out: AtomicBool::new(false),
            sign_out_delay: Mutex::new(Duration::ZERO),
            sign_out_calls: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
        }
    }

    pub fn add_account(&self, email: &str, password: &str) -> User {
        let user = User { id: Uuid::new_v4().to_string(), email: Some(email.to_string()) };
        self.accounts.write().insert(email.to_lowercase(), (password.to_string(), user.clone()));
        user
    }

    /// Install a cached session without notifying anyone (as found on reload).
    pub fn set_session(&self, session: Option<AuthSession>) { *self.current.lock() = session; }
    pub fn current_session(&self) -> Option<AuthSession> { self.current.lock().clone() }

    /// Sign a user in from outside the controller (another tab, SSO callback).
    pub fn sign_in_as(&self, user: &User) -> AuthSession {
        let session = new_session(user);
        *self.current.lock() = Some(session.clone());
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        session
    }

    /// Token refresh: same session id, new expiry.
    pub fn refresh_token(&self) -> Option<AuthSession> {
        let mut cur = self.current.lock();
        let s = cur.as_mut()?;
        s.expires_at = Some(Utc::now() + chrono::Duration::hours(1));
        let s = s.clone();
        drop(cur);
        self.emit(AuthEvent::TokenRefreshed, Some(s.clone()));
        Some(s)
    }

    /// Session revoked server-side (admin action, other tab logged out).
    pub fn revoke_externally(&self) {
        *self.current.lock() = None;
        self.emit(AuthEvent::SignedOut, None);
    }

    pub fn emit(&self, event: AuthEvent, session: Option<AuthSession>) {
        // No receivers is fine.
        let _ = self.tx.send(AuthChange { event, session });
    }

    pub fn set_fail_lookup(&self, v: bool) { self.fail_lookup.store(v, Ordering::SeqCst); }
    pub fn set_fail_sign_out(&self, v: bool) { self.fail_sign_out.store(v, Ordering::SeqCst); }
    pub fn set_keep_session_on_sign_out(&self, v: bool) { self.keep_session_on_sign_out.store(v, Ordering::SeqCst); }
    pub fn set_sign_out_delay(&self, d: Duration) { *self.sign_out_delay.lock() = d; }
    pub fn sign_out_calls(&self) -> u64 { self.sign_out_calls.load(Ordering::SeqCst) }
    pub fn lookups(&self) -> u64 { self.lookups.load(Ordering::SeqCst) }
}

fn new_session(user: &User) -> AuthSession {
    AuthSession {
        session_id: Uuid::new_v4().to_string(),
        user: user.clone(),
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
    }
}

#[async_trait]
impl IdentityBackend for InMemoryIdentity {
    async fn get_current_session(&self) -> AppResult<Option<AuthSession>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(AppError::backend("session_lookup_failed", "identity backend unreachable"));
        }
        Ok(self.current.lock().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> { self.tx.subscribe() }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let user = {
            let accounts = self.accounts.read();
            match accounts.get(&email.to_lowercase()) {
                Some((pw, user)) if pw == password => user.clone(),
                _ => return Err(AppError::auth("invalid_credentials", "invalid login credentials")),
            }
        };
        Ok(self.sign_in_as(&user))
    }

    async fn sign_out(&self) -> AppResult<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sign_out_delay.lock();
        if !delay.is_zero() { tokio::time::sleep(delay).await; }
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AppError::backend("sign_out_failed", "identity backend unreachable"));
        }
        if !self.keep_session_on_sign_out.load(Ordering::SeqCst) {
            *self.current.lock() = None;
            self.emit(AuthEvent::SignedOut, None);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProfiles {
    rows: RwLock<HashMap<String, Profile>>,
    last_logins: Mutex<Vec<(String, DateTime<Utc>)>>,
    fetches: AtomicU64,
    failing: AtomicBool,
    fetch_delay: Mutex<Duration>,
}

impl InMemoryProfiles {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, profile: Profile) { self.rows.write().insert(profile.user_id.clone(), profile); }
    pub fn set_failing(&self, v: bool) { self.failing.store(v, Ordering::SeqCst); }
    pub fn set_fetch_delay(&self, d: Duration) { *self.fetch_delay.lock() = d; }
    pub fn fetches(&self) -> u64 { self.fetches.load(Ordering::SeqCst) }
    pub fn last_logins(&self) -> Vec<(String, DateTime<Utc>)> { self.last_logins.lock().clone() }
}

#[async_trait]
impl ProfileStore for InMemoryProfiles {
    async fn get_profile(&self, user_id: &str) -> AppResult<Profile> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() { tokio::time::sleep(delay).await; }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::backend("profile_fetch_failed", "profiles table unreachable"));
        }
        self.rows
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("profile_missing".to_string(), format!("no profile for user {}", user_id)))
    }

    async fn update_last_login(&self, user_id: &str, at: DateTime<Utc>) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::backend("profile_update_failed", "profiles table unreachable"));
        }
        if let Some(p) = self.rows.write().get_mut(user_id) { p.last_login_at = Some(at); }
        self.last_logins.lock().push((user_id.to_string(), at));
        Ok(())
    }
}

/// Captures everything the controller shows, for assertions and demos.
#[derive(Debug, Default)]
pub struct RecordingUi {
    notices: Mutex<Vec<Notice>>,
    redirects: AtomicU64,
}

impl RecordingUi {
    pub fn new() -> Self { Self::default() }
    pub fn notices(&self) -> Vec<Notice> { self.notices.lock().clone() }
    pub fn redirects(&self) -> u64 { self.redirects.load(Ordering::SeqCst) }

    pub fn warnings(&self) -> usize {
        self.notices.lock().iter().filter(|n| matches!(n, Notice::InactivityWarning { .. })).count()
    }

    pub fn count(&self, notice: &Notice) -> usize {
        self.notices.lock().iter().filter(|n| *n == notice).count()
    }
}

impl SessionUi for RecordingUi {
    fn notify(&self, notice: &Notice) { self.notices.lock().push(notice.clone()); }
    fn redirect_to_login(&self) { self.redirects.fetch_add(1, Ordering::SeqCst); }
}
