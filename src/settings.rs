//! Operator-tunable session durations.
//!
//! `SessionSettings` is the shape the Settings Store hands out (whole hours and
//! minutes, as typed into the admin screen). `SessionConfig` is the resolved
//! form the controller runs on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, AppResult};

pub const DEFAULT_SESSION_HOURS: u64 = 8;
pub const DEFAULT_INACTIVITY_MINUTES: u64 = 30;
pub const DEFAULT_WARNING_MINUTES: u64 = 5;
pub const MAX_SESSION_HOURS: u64 = 366 * 24;
pub const MAX_TIMER_MINUTES: u64 = 366 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    #[serde(default = "SessionSettings::default_session_hours")]
    pub session_duration_hours: u64,
    #[serde(default = "SessionSettings::default_inactivity_minutes")]
    pub inactivity_timeout_minutes: u64,
    #[serde(default = "SessionSettings::default_warning_minutes")]
    pub warning_time_minutes: u64,
    #[serde(default = "SessionSettings::default_enabled")]
    pub auto_logout_enabled: bool,
}

impl SessionSettings {
    fn default_session_hours() -> u64 { DEFAULT_SESSION_HOURS }
    fn default_inactivity_minutes() -> u64 { DEFAULT_INACTIVITY_MINUTES }
    fn default_warning_minutes() -> u64 { DEFAULT_WARNING_MINUTES }
    fn default_enabled() -> bool { true }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_duration_hours: DEFAULT_SESSION_HOURS,
            inactivity_timeout_minutes: DEFAULT_INACTIVITY_MINUTES,
            warning_time_minutes: DEFAULT_WARNING_MINUTES,
            auto_logout_enabled: true,
        }
    }
}

/// Resolved durations the controller arms its timers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub session_duration: Duration,
    pub inactivity_timeout: Duration,
    pub warning_lead: Duration,
    pub auto_logout_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self { Self::from_settings(&SessionSettings::default()) }
}

impl SessionConfig {
    /// Convert store values. A zero session length or zero inactivity timeout
    /// cannot be meant literally and falls back to the shipped default; values
    /// past a year are capped so a deadline can always be computed.
    /// The warning lead is taken as-is; the controller decides whether it is usable.
    pub fn from_settings(s: &SessionSettings) -> Self {
        let hours = resolve("sessionDurationHours", s.session_duration_hours, DEFAULT_SESSION_HOURS, MAX_SESSION_HOURS);
        let inactivity = resolve("inactivityTimeoutMinutes", s.inactivity_timeout_minutes, DEFAULT_INACTIVITY_MINUTES, MAX_TIMER_MINUTES);
        let warning = if s.warning_time_minutes > MAX_TIMER_MINUTES {
            warn!(target: "portal_session::settings", "warningTimeMinutes={} capped at {}", s.warning_time_minutes, MAX_TIMER_MINUTES);
            MAX_TIMER_MINUTES
        } else {
            s.warning_time_minutes
        };
        Self {
            session_duration: Duration::from_secs(hours * 3600),
            inactivity_timeout: Duration::from_secs(inactivity * 60),
            warning_lead: Duration::from_secs(warning * 60),
            auto_logout_enabled: s.auto_logout_enabled,
        }
    }

    /// Delay from the last activity until the warning, when the lead is usable.
    pub fn warning_delay(&self) -> Option<Duration> {
        if self.warning_lead.is_zero() || self.warning_lead >= self.inactivity_timeout {
            return None;
        }
        Some(self.inactivity_timeout - self.warning_lead)
    }

    /// Whole minutes left when the warning appears, rounded up.
    pub fn warning_minutes(&self) -> u64 {
        self.warning_lead.as_secs().div_ceil(60)
    }
}

impl From<&SessionSettings> for SessionConfig {
    fn from(s: &SessionSettings) -> Self { Self::from_settings(s) }
}

fn resolve(name: &str, value: u64, default: u64, max: u64) -> u64 {
    match value {
        0 => {
            warn!(target: "portal_session::settings", "{}=0 ignored; using {}", name, default);
            default
        }
        v if v > max => {
            warn!(target: "portal_session::settings", "{}={} capped at {}", name, v, max);
            max
        }
        v => v,
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_settings(&self) -> AppResult<SessionSettings>;
}

/// In-process settings source with a failure switch.
#[derive(Debug, Default)]
pub struct StaticSettings {
    current: Mutex<SessionSettings>,
    failing: AtomicBool,
    calls: AtomicU64,
}

impl StaticSettings {
    pub fn new(settings: SessionSettings) -> Self {
        Self { current: Mutex::new(settings), ..Default::default() }
    }

    pub fn set(&self, settings: SessionSettings) { *self.current.lock() = settings; }
    pub fn set_failing(&self, failing: bool) { self.failing.store(failing, Ordering::SeqCst); }
    pub fn calls(&self) -> u64 { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl SettingsStore for StaticSettings {
    async fn get_settings(&self) -> AppResult<SessionSettings> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::backend("settings_unavailable", "settings store did not respond"));
        }
        Ok(self.current.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_values() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.session_duration, Duration::from_secs(8 * 3600));
        assert_eq!(cfg.inactivity_timeout, Duration::from_secs(30 * 60));
        assert_eq!(cfg.warning_lead, Duration::from_secs(5 * 60));
        assert!(cfg.auto_logout_enabled);
        assert_eq!(cfg.warning_delay(), Some(Duration::from_secs(25 * 60)));
        assert_eq!(cfg.warning_minutes(), 5);
    }

    #[test]
    fn parses_camel_case_and_fills_missing_fields() {
        let s: SessionSettings = serde_json::from_str(
            r#"{"sessionDurationHours": 12, "inactivityTimeoutMinutes": 15, "autoLogoutEnabled": false}"#,
        ).unwrap();
        assert_eq!(s.session_duration_hours, 12);
        assert_eq!(s.inactivity_timeout_minutes, 15);
        assert_eq!(s.warning_time_minutes, DEFAULT_WARNING_MINUTES);
        assert!(!s.auto_logout_enabled);
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let s = SessionSettings { session_duration_hours: 0, inactivity_timeout_minutes: 0, ..Default::default() };
        let cfg = SessionConfig::from(&s);
        assert_eq!(cfg.session_duration, Duration::from_secs(DEFAULT_SESSION_HOURS * 3600));
        assert_eq!(cfg.inactivity_timeout, Duration::from_secs(DEFAULT_INACTIVITY_MINUTES * 60));
    }

    #[test]
    fn huge_durations_are_capped() {
        let s = SessionSettings {
            session_duration_hours: u64::MAX,
            inactivity_timeout_minutes: u64::MAX,
            warning_time_minutes: u64::MAX,
            auto_logout_enabled: true,
        };
        let cfg = SessionConfig::from(&s);
        assert_eq!(cfg.session_duration, Duration::from_secs(MAX_SESSION_HOURS * 3600));
        assert_eq!(cfg.inactivity_timeout, Duration::from_secs(MAX_TIMER_MINUTES * 60));
        assert_eq!(cfg.warning_lead, cfg.inactivity_timeout);
        assert_eq!(cfg.warning_delay(), None);
    }

    #[test]
    fn unusable_warning_lead_disables_warning_only() {
        let s = SessionSettings { inactivity_timeout_minutes: 10, warning_time_minutes: 10, ..Default::default() };
        let cfg = SessionConfig::from(&s);
        assert_eq!(cfg.warning_delay(), None);
        assert_eq!(cfg.inactivity_timeout, Duration::from_secs(600));

        let s = SessionSettings { warning_time_minutes: 0, ..Default::default() };
        assert_eq!(SessionConfig::from(&s).warning_delay(), None);
    }
}
