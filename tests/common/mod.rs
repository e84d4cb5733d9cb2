#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use portal_session::clock::ManualClock;
use portal_session::config::ControllerOptions;
use portal_session::identity::memory::{InMemoryIdentity, InMemoryProfiles, RecordingUi};
use portal_session::identity::{Profile, User};
use portal_session::settings::{SessionSettings, StaticSettings};
use portal_session::storage::{KeyValueStore, MemoryKv};
use portal_session::{SessionController, SessionDeps};

pub const EMAIL: &str = "agent@portal.test";
pub const PASSWORD: &str = "s3cret";

pub const MIN: Duration = Duration::from_secs(60);
pub const MS: Duration = Duration::from_millis(1);

/// One controller wired to in-memory collaborators that tests can poke at.
pub struct Harness {
    pub ctrl: Arc<SessionController>,
    pub identity: Arc<InMemoryIdentity>,
    pub profiles: Arc<InMemoryProfiles>,
    pub settings: Arc<StaticSettings>,
    pub kv: Arc<MemoryKv>,
    pub ui: Arc<RecordingUi>,
    pub clock: Arc<ManualClock>,
    pub user: User,
}

pub fn settings(session_hours: u64, inactivity_mins: u64, warning_mins: u64, enabled: bool) -> SessionSettings {
    SessionSettings {
        session_duration_hours: session_hours,
        inactivity_timeout_minutes: inactivity_mins,
        warning_time_minutes: warning_mins,
        auto_logout_enabled: enabled,
    }
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-02T08:00:00Z").unwrap().with_timezone(&Utc)
}

impl Harness {
    pub fn new(s: SessionSettings) -> Self {
        let identity = Arc::new(InMemoryIdentity::new());
        let user = identity.add_account(EMAIL, PASSWORD);
        let profiles = Arc::new(InMemoryProfiles::new());
        profiles.insert(Profile {
            user_id: user.id.clone(),
            full_name: Some("Riley Agent".into()),
            email: Some(EMAIL.into()),
            role: "agent".into(),
            last_login_at: None,
        });
        let settings = Arc::new(StaticSettings::new(s));
        let kv = Arc::new(MemoryKv::new());
        let ui = Arc::new(RecordingUi::new());
        let clock = Arc::new(ManualClock::starting_at(start_time()));
        let ctrl = Self::controller(&identity, &profiles, &settings, &kv, &ui, &clock);
        Self { ctrl, identity, profiles, settings, kv, ui, clock, user }
    }

    fn controller(
        identity: &Arc<InMemoryIdentity>,
        profiles: &Arc<InMemoryProfiles>,
        settings: &Arc<StaticSettings>,
        kv: &Arc<MemoryKv>,
        ui: &Arc<RecordingUi>,
        clock: &Arc<ManualClock>,
    ) -> Arc<SessionController> {
        let deps = SessionDeps {
            identity: identity.clone(),
            profiles: profiles.clone(),
            settings: settings.clone(),
            kv: kv.clone(),
            ui: ui.clone(),
            clock: clock.clone(),
        };
        SessionController::new(deps, ControllerOptions::default()).expect("inside runtime")
    }

    /// A fresh controller over the same collaborators, as after a page reload.
    pub fn reload(&mut self) {
        self.ctrl.shutdown();
        self.ctrl = Self::controller(&self.identity, &self.profiles, &self.settings, &self.kv, &self.ui, &self.clock);
    }

    pub async fn login(&self) {
        self.ctrl.initialize().await;
        self.ctrl.sign_in(EMAIL, PASSWORD).await.expect("sign in");
        settle().await;
    }

    pub fn stamp(&self) -> Option<String> {
        self.kv.get(&ControllerOptions::default().stamp_key).unwrap()
    }
}

/// Let every ready task (timer callbacks, teardown, auth feed) run to quiescence
/// without moving the paused clock.
pub async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance(by: Duration) {
    tokio::time::advance(by).await;
    settle().await;
}
